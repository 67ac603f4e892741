//! A validated workflow: typed nodes with levels assigned, plus their graph.

use serde_json::{Map, Value};

use nodes::NodeConfig;

use crate::blueprint::Blueprint;
use crate::graph::DependencyGraph;
use crate::EngineError;

#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: String,
    /// Declaration order; `level` is set on each node.
    pub nodes: Vec<NodeConfig>,
    pub metadata: Map<String, Value>,
    graph: DependencyGraph,
}

impl Workflow {
    /// Build and validate the graph, then stamp each node with its level.
    pub fn new(id: impl Into<String>, mut nodes: Vec<NodeConfig>) -> Result<Self, EngineError> {
        let graph = DependencyGraph::build(&nodes)?;
        for node in &mut nodes {
            node.level = graph.get_node_level(&node.id).unwrap_or_default();
        }
        Ok(Self {
            id: id.into(),
            nodes,
            metadata: Map::new(),
            graph,
        })
    }

    pub fn from_blueprint(blueprint: &Blueprint) -> Result<Self, EngineError> {
        let id = blueprint
            .blueprint_id
            .clone()
            .unwrap_or_else(|| "blueprint".into());
        let mut workflow = Self::new(id, blueprint.node_configs()?)?;
        workflow.metadata = blueprint.metadata.clone();
        Ok(workflow)
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn node(&self, id: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn levels_are_stamped_onto_nodes() {
        let bp = Blueprint::from_value(json!({
            "blueprint_id": "etl",
            "nodes": [
                { "id": "load", "type": "tool", "tool_name": "db", "dependencies": ["extract"] },
                { "id": "extract", "type": "tool", "tool_name": "http" }
            ],
            "metadata": { "owner": "data" }
        }))
        .unwrap();

        let wf = Workflow::from_blueprint(&bp).unwrap();

        assert_eq!(wf.id, "etl");
        assert_eq!(wf.node("extract").map(|n| n.level), Some(0));
        assert_eq!(wf.node("load").map(|n| n.level), Some(1));
        assert_eq!(wf.metadata["owner"], "data");
    }

    #[test]
    fn structural_errors_surface_unchanged() {
        let bp = Blueprint::from_value(json!({
            "nodes": [ { "id": "a", "type": "tool", "tool_name": "t", "dependencies": ["ghost"] } ]
        }))
        .unwrap();
        let err = Workflow::from_blueprint(&bp).unwrap_err();
        assert!(err.is_structural());
    }
}

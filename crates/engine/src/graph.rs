//! Dependency graph construction and queries.
//!
//! Rules enforced by [`DependencyGraph::build`], in order:
//! 1. Node IDs must be unique and each config must pass its own validation.
//! 2. Every dependency (and recursive source) must name a node in the set.
//! 3. The graph must be acyclic once recursive feedback edges are set aside.
//! 4. Input mappings must reference direct dependencies and declared outputs.
//! 5. Sensitive data may not flow straight into external I/O, and air-gapped
//!    workflows may not contain external I/O at all.
//!
//! A *feedback edge* is a dependency `d -> r` where `r` is a recursive node
//! that lists `d` in its `recursive_sources`. Those edges describe the loop
//! the recursive node closes through re-invocation, so they are recorded but
//! kept out of the forward graph, cycle detection and level assignment.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tracing::debug;

use nodes::{InputMapping, NodeConfig, WHOLE_PAYLOAD};

use crate::EngineError;

/// Validated DAG over a node list.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
    dependencies: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
    levels: HashMap<String, usize>,
    level_nodes: BTreeMap<usize, Vec<String>>,
    feedback: Vec<(String, String)>,
}

impl DependencyGraph {
    /// Build and validate the graph. No partial graph is ever returned.
    ///
    /// # Errors
    /// Any structural [`EngineError`]: duplicate or invalid node, missing
    /// dependency, cycle (with an example path), schema mismatch, or
    /// security policy violation.
    pub fn build(nodes: &[NodeConfig]) -> Result<Self, EngineError> {
        // -------------------------------------------------------------------
        // 1. Unique, individually valid nodes
        // -------------------------------------------------------------------
        let mut seen: HashSet<&str> = HashSet::new();
        for node in nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(EngineError::DuplicateNodeId(node.id.clone()));
            }
            node.validate().map_err(|message| EngineError::InvalidNode {
                node_id: node.id.clone(),
                message,
            })?;
        }

        // -------------------------------------------------------------------
        // 2. Dependencies resolve
        // -------------------------------------------------------------------
        for node in nodes {
            for dependency in node.dependencies.iter().chain(node.recursive_sources()) {
                if !seen.contains(dependency.as_str()) {
                    return Err(EngineError::MissingDependency {
                        node_id: node.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        // -------------------------------------------------------------------
        // 3. Forward graph, feedback edges aside
        // -------------------------------------------------------------------
        let mut graph = DiGraph::<String, ()>::new();
        let mut index = HashMap::new();
        for node in nodes {
            index.insert(node.id.clone(), graph.add_node(node.id.clone()));
        }

        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut feedback = Vec::new();
        for node in nodes {
            let forward = dependencies.entry(node.id.clone()).or_default();
            dependents.entry(node.id.clone()).or_default();
            for dependency in &node.dependencies {
                if node.recursive_sources().contains(dependency) {
                    feedback.push((dependency.clone(), node.id.clone()));
                    continue;
                }
                if forward.contains(dependency) {
                    continue;
                }
                forward.push(dependency.clone());
                graph.add_edge(index[dependency], index[&node.id], ());
            }
        }
        for node in nodes {
            for dependency in &dependencies[&node.id] {
                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .push(node.id.clone());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| EngineError::CycleDetected {
            path: cycle_path(&graph, cycle.node_id()),
        })?;

        // -------------------------------------------------------------------
        // 4. Levels
        // -------------------------------------------------------------------
        let mut levels: HashMap<String, usize> = HashMap::new();
        for idx in order {
            let id = &graph[idx];
            let level = graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter_map(|dep| levels.get(&graph[dep]))
                .max()
                .map_or(0, |deepest| deepest + 1);
            levels.insert(id.clone(), level);
        }
        let mut level_nodes: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for node in nodes {
            level_nodes
                .entry(levels[&node.id])
                .or_default()
                .push(node.id.clone());
        }

        let built = Self {
            graph,
            index,
            dependencies,
            dependents,
            levels,
            level_nodes,
            feedback,
        };

        // -------------------------------------------------------------------
        // 5. Side validations
        // -------------------------------------------------------------------
        built.validate_schema_alignment(nodes)?;
        built.validate_security(nodes)?;

        debug!(
            nodes = nodes.len(),
            levels = built.level_nodes.len(),
            feedback_edges = built.feedback.len(),
            "dependency graph built"
        );
        Ok(built)
    }

    fn validate_schema_alignment(&self, nodes: &[NodeConfig]) -> Result<(), EngineError> {
        let by_id: HashMap<&str, &NodeConfig> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        for node in nodes {
            for (placeholder, mapping) in &node.input_mappings {
                let InputMapping::Reference {
                    source_node_id,
                    source_output_key,
                } = mapping
                else {
                    continue;
                };
                if !node.dependencies.contains(source_node_id) {
                    return Err(EngineError::SchemaMismatch {
                        node_id: node.id.clone(),
                        message: format!(
                            "mapping '{placeholder}' references '{source_node_id}', which is not a direct dependency"
                        ),
                    });
                }
                if source_output_key == WHOLE_PAYLOAD {
                    continue;
                }
                let top = source_output_key.split('.').next().unwrap_or_default();
                let Some(schema) = by_id
                    .get(source_node_id.as_str())
                    .and_then(|source| source.output_schema.as_ref())
                else {
                    continue;
                };
                if !schema.contains_key(top) {
                    return Err(EngineError::SchemaMismatch {
                        node_id: node.id.clone(),
                        message: format!(
                            "mapping '{placeholder}' reads output key '{top}', which is not declared in the output schema of '{source_node_id}'"
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_security(&self, nodes: &[NodeConfig]) -> Result<(), EngineError> {
        let by_id: HashMap<&str, &NodeConfig> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        for node in nodes.iter().filter(|n| n.contains_sensitive_data) {
            for dependent in self.get_node_dependents(&node.id) {
                if by_id
                    .get(dependent.as_str())
                    .is_some_and(|d| d.requires_external_io)
                {
                    return Err(EngineError::SecurityPolicy(format!(
                        "sensitive node '{}' feeds external I/O node '{dependent}'",
                        node.id
                    )));
                }
            }
        }

        if let Some(airgapped) = nodes.iter().find(|n| n.airgap_mode) {
            if let Some(external) = nodes.iter().find(|n| n.requires_external_io) {
                return Err(EngineError::SecurityPolicy(format!(
                    "node '{}' requires external I/O but '{}' declares airgap mode",
                    external.id, airgapped.id
                )));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Direct predecessors (feedback edges excluded).
    pub fn get_node_dependencies(&self, id: &str) -> &[String] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct successors (feedback edges excluded).
    pub fn get_node_dependents(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get_node_level(&self, id: &str) -> Option<usize> {
        self.levels.get(id).copied()
    }

    /// Level → node ids at that level, in declaration order.
    pub fn get_level_nodes(&self) -> &BTreeMap<usize, Vec<String>> {
        &self.level_nodes
    }

    /// Nodes nothing depends on.
    pub fn get_leaf_nodes(&self) -> Vec<String> {
        self.level_nodes
            .values()
            .flatten()
            .filter(|id| {
                self.index
                    .get(id.as_str())
                    .is_some_and(|&idx| {
                        self.graph
                            .neighbors_directed(idx, Direction::Outgoing)
                            .next()
                            .is_none()
                    })
            })
            .cloned()
            .collect()
    }

    /// `(source, recursive node)` pairs set aside as feedback edges.
    pub fn feedback_edges(&self) -> &[(String, String)] {
        &self.feedback
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

/// Shortest cycle through `start`, rendered as `a -> b -> a`.
fn cycle_path(graph: &DiGraph<String, ()>, start: NodeIndex) -> String {
    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);
    while let Some(current) = queue.pop_front() {
        for next in graph.neighbors_directed(current, Direction::Outgoing) {
            if next == start {
                let mut path = vec![graph[start].clone()];
                let mut walk = Vec::new();
                let mut at = current;
                while at != start {
                    walk.push(graph[at].clone());
                    at = parent[&at];
                }
                path.extend(walk.into_iter().rev());
                path.push(graph[start].clone());
                return path.join(" -> ");
            }
            if next != start && !parent.contains_key(&next) {
                parent.insert(next, current);
                queue.push_back(next);
            }
        }
    }
    graph[start].clone()
}

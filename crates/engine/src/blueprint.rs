//! Blueprint documents: the JSON form a workflow is submitted in.
//!
//! Node specs stay untyped until [`Blueprint::node_configs`] checks their
//! `type` tag against the closed [`NodeType`] set, so an unknown type is
//! reported as such instead of as a generic decode error.

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use nodes::{NodeConfig, NodeType};

use crate::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    #[serde(default)]
    pub blueprint_id: Option<String>,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub nodes: Vec<Map<String, Value>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_schema_version() -> String {
    "1.0.0".into()
}

impl Blueprint {
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        serde_json::from_str(text).map_err(|e| EngineError::InvalidBlueprint(e.to_string()))
    }

    pub fn from_value(value: Value) -> Result<Self, EngineError> {
        serde_json::from_value(value).map_err(|e| EngineError::InvalidBlueprint(e.to_string()))
    }

    /// Decode every node spec into a typed [`NodeConfig`].
    ///
    /// # Errors
    /// - [`EngineError::InvalidBlueprint`] when a spec lacks `id`/`type` or
    ///   does not decode.
    /// - [`EngineError::UnknownNodeType`] for a `type` outside the node set.
    /// - [`EngineError::DuplicateNodeId`] when two specs share an id.
    pub fn node_configs(&self) -> Result<Vec<NodeConfig>, EngineError> {
        let mut seen = HashSet::new();
        let mut configs = Vec::with_capacity(self.nodes.len());

        for (position, spec) in self.nodes.iter().enumerate() {
            let id = spec.get("id").and_then(Value::as_str).ok_or_else(|| {
                EngineError::InvalidBlueprint(format!("node #{position} has no string 'id'"))
            })?;
            let type_tag = spec.get("type").and_then(Value::as_str).ok_or_else(|| {
                EngineError::InvalidBlueprint(format!("node '{id}' has no string 'type'"))
            })?;
            NodeType::from_str(type_tag)
                .map_err(|_| EngineError::UnknownNodeType(type_tag.to_owned()))?;
            if !seen.insert(id.to_owned()) {
                return Err(EngineError::DuplicateNodeId(id.to_owned()));
            }

            let config: NodeConfig = serde_json::from_value(Value::Object(spec.clone()))
                .map_err(|e| EngineError::InvalidBlueprint(format!("node '{id}': {e}")))?;
            configs.push(config);
        }
        Ok(configs)
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blueprint(nodes: Value) -> Blueprint {
        Blueprint::from_value(json!({ "blueprint_id": "bp", "nodes": nodes })).unwrap()
    }

    #[test]
    fn decodes_typed_nodes_and_defaults_schema_version() {
        let bp = blueprint(json!([
            { "id": "a", "type": "tool", "tool_name": "fetch" },
            { "id": "b", "type": "operator", "prompt": "Sum {a}", "dependencies": ["a"] }
        ]));
        assert_eq!(bp.schema_version, "1.0.0");

        let configs = bp.node_configs().unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[1].node_type(), NodeType::Llm);
        assert_eq!(configs[1].dependencies, vec!["a"]);
    }

    #[test]
    fn unknown_type_is_reported_by_name() {
        let bp = blueprint(json!([{ "id": "a", "type": "teleport" }]));
        assert!(matches!(
            bp.node_configs(),
            Err(EngineError::UnknownNodeType(t)) if t == "teleport"
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let bp = blueprint(json!([
            { "id": "a", "type": "tool", "tool_name": "x" },
            { "id": "a", "type": "tool", "tool_name": "y" }
        ]));
        assert!(matches!(bp.node_configs(), Err(EngineError::DuplicateNodeId(id)) if id == "a"));
    }

    #[test]
    fn missing_required_field_is_invalid() {
        let bp = blueprint(json!([{ "id": "a", "type": "tool" }]));
        assert!(matches!(bp.node_configs(), Err(EngineError::InvalidBlueprint(_))));
    }

    #[test]
    fn malformed_document_is_invalid() {
        assert!(matches!(
            Blueprint::from_json("{\"nodes\": 3}"),
            Err(EngineError::InvalidBlueprint(_))
        ));
    }
}

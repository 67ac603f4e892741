//! The uniform result every executor produces.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{NodeConfig, NodeError};

/// Identity and timing of one node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub node_id: String,
    pub node_type: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Seconds.
    pub duration: f64,
    pub error_type: Option<String>,
}

/// Outcome of running one node.
///
/// Build through [`NodeExecutionResult::success`] or
/// [`NodeExecutionResult::failure`]: a successful result never carries an
/// error, a failed one always does and has an empty output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub success: bool,
    pub output: Map<String, Value>,
    pub error: Option<String>,
    pub metadata: NodeMetadata,
    /// Seconds.
    pub execution_time: f64,
}

/// Wall-clock start of a node execution, captured before dispatch.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionTimer {
    started_at: DateTime<Utc>,
    started: Instant,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    fn metadata(&self, node: &NodeConfig, error_type: Option<String>) -> NodeMetadata {
        let duration = self.started.elapsed().as_secs_f64();
        NodeMetadata {
            node_id: node.id.clone(),
            node_type: node.node_type().to_string(),
            name: node.display_name().to_owned(),
            start_time: self.started_at,
            end_time: Utc::now(),
            duration,
            error_type,
        }
    }
}

impl NodeExecutionResult {
    pub fn success(node: &NodeConfig, output: Map<String, Value>, timer: ExecutionTimer) -> Self {
        let metadata = timer.metadata(node, None);
        Self {
            success: true,
            output,
            error: None,
            execution_time: metadata.duration,
            metadata,
        }
    }

    pub fn failure(node: &NodeConfig, error: &NodeError, timer: ExecutionTimer) -> Self {
        let metadata = timer.metadata(node, Some(error.error_type().to_owned()));
        Self {
            success: false,
            output: Map::new(),
            error: Some(error.to_string()),
            execution_time: metadata.duration,
            metadata,
        }
    }

    /// Convenience for executors written as `Result`-returning helpers.
    pub fn from_outcome(
        node: &NodeConfig,
        outcome: Result<Map<String, Value>, NodeError>,
        timer: ExecutionTimer,
    ) -> Self {
        match outcome {
            Ok(output) => Self::success(node, output, timer),
            Err(err) => Self::failure(node, &err, timer),
        }
    }

    pub fn error_type(&self) -> Option<&str> {
        self.metadata.error_type.as_deref()
    }
}

/// Turn an arbitrary capability return value into an output map.
///
/// Objects are used as-is; anything else is wrapped under `result`.
pub fn into_output(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".into(), other);
            map
        }
    }
}

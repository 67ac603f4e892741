use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::warn;

use super::kind_mismatch;
use crate::expression::evaluate_bool;
use crate::{
    ExecutionTimer, MonitorAction, MonitorNode, NodeConfig, NodeError, NodeExecutionResult,
    NodeExecutor, NodeKind, NodeType, RunContext,
};

/// Evaluates a metric expression and acts when it triggers.
pub struct MonitorExecutor;

#[async_trait]
impl NodeExecutor for MonitorExecutor {
    async fn execute(
        &self,
        _ctx: &dyn RunContext,
        node: &NodeConfig,
        input: Map<String, Value>,
    ) -> NodeExecutionResult {
        let timer = ExecutionTimer::start();
        let outcome = match &node.kind {
            NodeKind::Monitor(cfg) => check(node, cfg, &input),
            _ => Err(kind_mismatch(node, NodeType::Monitor)),
        };
        NodeExecutionResult::from_outcome(node, outcome, timer)
    }
}

fn check(
    node: &NodeConfig,
    cfg: &MonitorNode,
    input: &Map<String, Value>,
) -> Result<Map<String, Value>, NodeError> {
    let triggered = evaluate_bool(&cfg.metric_expression, input)?;
    let mut output = Map::new();
    output.insert("triggered".into(), json!(triggered));
    if !triggered {
        return Ok(output);
    }

    let action = match cfg.action_on_trigger {
        MonitorAction::AlertOnly => "alert",
        MonitorAction::PauseWorkflow => "pause",
        MonitorAction::AbortWorkflow => {
            return Err(NodeError::MonitorAbort(format!(
                "'{}' triggered on node '{}'",
                cfg.metric_expression, node.id
            )))
        }
    };
    warn!(
        node_id = %node.id,
        expression = %cfg.metric_expression,
        channels = ?cfg.alert_channels,
        action,
        "monitor triggered"
    );
    output.insert("action_taken".into(), json!(action));
    output.insert("alert_channels".into(), json!(cfg.alert_channels));
    Ok(output)
}

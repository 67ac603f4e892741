use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::warn;

use super::kind_mismatch;
use crate::template::lookup_path;
use crate::{
    ExecutionTimer, LoopNode, NodeConfig, NodeError, NodeExecutionResult, NodeExecutor, NodeKind,
    NodeType, RunContext,
};

/// Runs `body_nodes` as a child workflow once per item.
pub struct LoopExecutor;

#[async_trait]
impl NodeExecutor for LoopExecutor {
    async fn execute(
        &self,
        ctx: &dyn RunContext,
        node: &NodeConfig,
        input: Map<String, Value>,
    ) -> NodeExecutionResult {
        let timer = ExecutionTimer::start();
        let outcome = match &node.kind {
            NodeKind::Loop(cfg) => run_loop(ctx, node, cfg, input).await,
            _ => Err(kind_mismatch(node, NodeType::Loop)),
        };
        NodeExecutionResult::from_outcome(node, outcome, timer)
    }
}

async fn run_loop(
    ctx: &dyn RunContext,
    node: &NodeConfig,
    cfg: &LoopNode,
    input: Map<String, Value>,
) -> Result<Map<String, Value>, NodeError> {
    let items = lookup_path(&input, &cfg.items_source)
        .ok_or_else(|| {
            NodeError::MissingInput(format!("items_source '{}' not found", cfg.items_source))
        })?
        .as_array()
        .cloned()
        .ok_or_else(|| {
            NodeError::InvalidInput(format!("items_source '{}' is not a list", cfg.items_source))
        })?;

    if items.len() > cfg.max_iterations {
        warn!(
            node_id = %node.id,
            items = items.len(),
            max_iterations = cfg.max_iterations,
            "loop truncated to max_iterations"
        );
    }

    let mut results = Vec::new();
    for (index, item) in items.into_iter().take(cfg.max_iterations).enumerate() {
        let mut scope = input.clone();
        scope.insert(cfg.item_var.clone(), item);
        scope.insert("index".into(), json!(index));

        let child = ctx.run_child(node, cfg.body_nodes.clone(), scope).await?;
        if !child.success {
            return Err(NodeError::ChildWorkflow(format!(
                "iteration {index} failed: {}",
                child.errors.join("; ")
            )));
        }
        results.push(Value::Object(child.final_output));
    }

    let mut output = Map::new();
    output.insert("iterations".into(), json!(results.len()));
    output.insert("results".into(), Value::Array(results));
    Ok(output)
}

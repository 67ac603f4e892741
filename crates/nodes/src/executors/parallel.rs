use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::kind_mismatch;
use crate::{
    ChildRun, ExecutionTimer, NodeConfig, NodeError, NodeExecutionResult, NodeExecutor, NodeKind,
    NodeType, ParallelNode, RunContext, WaitStrategy,
};

/// Runs each branch as an isolated child workflow, concurrently.
pub struct ParallelExecutor;

#[async_trait]
impl NodeExecutor for ParallelExecutor {
    async fn execute(
        &self,
        ctx: &dyn RunContext,
        node: &NodeConfig,
        input: Map<String, Value>,
    ) -> NodeExecutionResult {
        let timer = ExecutionTimer::start();
        let outcome = match &node.kind {
            NodeKind::Parallel(cfg) => run_parallel(ctx, node, cfg, input).await,
            _ => Err(kind_mismatch(node, NodeType::Parallel)),
        };
        NodeExecutionResult::from_outcome(node, outcome, timer)
    }
}

fn branch_error(run: &Result<ChildRun, NodeError>) -> Option<String> {
    match run {
        Ok(child) if child.success => None,
        Ok(child) => Some(child.errors.join("; ")),
        Err(e) => Some(e.to_string()),
    }
}

async fn run_parallel(
    ctx: &dyn RunContext,
    node: &NodeConfig,
    cfg: &ParallelNode,
    input: Map<String, Value>,
) -> Result<Map<String, Value>, NodeError> {
    let limit = cfg
        .max_concurrency
        .unwrap_or(cfg.branches.len())
        .max(1);
    debug!(node_id = %node.id, branches = cfg.branches.len(), limit, "running branches");

    let mut runs: Vec<(usize, Result<ChildRun, NodeError>)> =
        stream::iter(cfg.branches.iter().cloned().enumerate())
            .map(|(index, branch)| {
                let scope = input.clone();
                async move { (index, ctx.run_child(node, branch, scope).await) }
            })
            .buffer_unordered(limit)
            .collect()
            .await;
    runs.sort_by_key(|(index, _)| *index);

    let mut completed = 0usize;
    let mut failures = Vec::new();
    let mut branches = Vec::with_capacity(runs.len());
    for (index, run) in &runs {
        match branch_error(run) {
            None => {
                completed += 1;
                let output = run
                    .as_ref()
                    .map(|child| child.final_output.clone())
                    .unwrap_or_default();
                branches.push(Value::Object(output));
            }
            Some(error) => {
                failures.push(format!("branch {index}: {error}"));
                branches.push(json!({ "error": error }));
            }
        }
    }

    let satisfied = match cfg.wait_strategy {
        WaitStrategy::All => failures.is_empty(),
        WaitStrategy::Any => completed > 0,
    };
    if !satisfied {
        return Err(NodeError::ChildWorkflow(failures.join("; ")));
    }

    let mut output = Map::new();
    output.insert("branches".into(), Value::Array(branches));
    output.insert("completed".into(), json!(completed));
    Ok(output)
}

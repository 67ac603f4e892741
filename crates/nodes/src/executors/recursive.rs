use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::kind_mismatch;
use crate::expression::evaluate_bool;
use crate::{
    AgentNode, ExecutionTimer, NodeConfig, NodeError, NodeExecutionResult, NodeExecutor,
    NodeKind, NodeType, RecursiveNode, RunContext,
};

/// Rounds completed so far, carried in the node's input context.
pub const ITERATION_KEY: &str = "_recursive_iteration";
/// Set on a round's output when the scheduler should invoke the node again.
pub const CAN_RECURSE_KEY: &str = "_can_recurse";

/// One round of a recursive node per invocation.
///
/// Terminal outputs carry `converged`/`reason`/`iterations`; a non-terminal
/// round returns the delegate's output with the iteration counter bumped and
/// [`CAN_RECURSE_KEY`] set.
pub struct RecursiveExecutor;

#[async_trait]
impl NodeExecutor for RecursiveExecutor {
    async fn execute(
        &self,
        ctx: &dyn RunContext,
        node: &NodeConfig,
        input: Map<String, Value>,
    ) -> NodeExecutionResult {
        let timer = ExecutionTimer::start();
        let outcome = match &node.kind {
            NodeKind::Recursive(cfg) => run_round(ctx, node, cfg, input).await,
            _ => Err(kind_mismatch(node, NodeType::Recursive)),
        };
        NodeExecutionResult::from_outcome(node, outcome, timer)
    }
}

fn terminal(converged: bool, reason: &str, iterations: u32) -> Map<String, Value> {
    let mut output = Map::new();
    output.insert("converged".into(), json!(converged));
    output.insert("reason".into(), json!(reason));
    output.insert("iterations".into(), json!(iterations));
    output
}

fn converged(
    cfg: &RecursiveNode,
    iteration: u32,
    input: &Map<String, Value>,
) -> Result<bool, NodeError> {
    let Some(condition) = &cfg.convergence_condition else {
        return Ok(false);
    };
    match evaluate_bool(condition, input) {
        Ok(met) => Ok(met),
        // Before the first round the condition usually names outputs that
        // do not exist yet.
        Err(e) if iteration == 0 => {
            debug!(error = %e, "convergence condition not evaluable before first round");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

async fn run_round(
    ctx: &dyn RunContext,
    node: &NodeConfig,
    cfg: &RecursiveNode,
    input: Map<String, Value>,
) -> Result<Map<String, Value>, NodeError> {
    let iteration = input
        .get(ITERATION_KEY)
        .and_then(Value::as_u64)
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
        .unwrap_or(0);

    if iteration >= cfg.max_iterations {
        info!(node_id = %node.id, iterations = iteration, "recursive node hit max_iterations");
        return Ok(terminal(false, "max_iterations_reached", iteration));
    }
    if converged(cfg, iteration, &input)? {
        info!(node_id = %node.id, iterations = iteration, "recursive node converged");
        return Ok(terminal(true, "condition_met", iteration));
    }

    let mut output = match (&cfg.agent_package, &cfg.workflow_ref) {
        (Some(package), _) => {
            let delegate = NodeConfig {
                kind: NodeKind::Agent(AgentNode::for_package(package.clone())),
                ..node.clone()
            };
            let round = ctx.dispatch(&delegate, input).await;
            if !round.success {
                return Err(NodeError::ChildWorkflow(format!(
                    "round {} failed: {}",
                    iteration + 1,
                    round.error.unwrap_or_default()
                )));
            }
            round.output
        }
        (None, Some(name)) => {
            let nodes = ctx
                .capabilities()
                .get_workflow(name)
                .map_err(|e| NodeError::ChildWorkflow(e.to_string()))?
                .instantiate();
            let child = ctx.run_child(node, nodes, input).await?;
            if !child.success {
                return Err(NodeError::ChildWorkflow(format!(
                    "round {} failed: {}",
                    iteration + 1,
                    child.errors.join("; ")
                )));
            }
            child.final_output
        }
        (None, None) => {
            return Err(NodeError::InvalidConfig(
                "exactly one of agent_package or workflow_ref is required".into(),
            ))
        }
    };

    debug!(node_id = %node.id, round = iteration + 1, "recursive round complete");
    output.insert(ITERATION_KEY.into(), json!(iteration + 1));
    output.insert(CAN_RECURSE_KEY.into(), json!(true));
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRunContext, ScriptedAgent};
    use crate::{Capabilities, ToolNode, WorkflowSource};
    use std::sync::Arc;

    fn recursive(agent: Option<&str>, workflow: Option<&str>, condition: Option<&str>) -> NodeConfig {
        NodeConfig::new(
            "refine",
            NodeKind::Recursive(RecursiveNode {
                agent_package: agent.map(Into::into),
                workflow_ref: workflow.map(Into::into),
                recursive_sources: vec!["refine".into()],
                convergence_condition: condition.map(Into::into),
                max_iterations: 3,
            }),
        )
    }

    fn at_iteration(n: u32, extra: Value) -> Map<String, Value> {
        let mut input = extra.as_object().cloned().unwrap_or_default();
        input.insert(ITERATION_KEY.into(), json!(n));
        input
    }

    #[tokio::test]
    async fn round_delegates_to_agent_and_flags_recursion() {
        let agent = Arc::new(ScriptedAgent::finishing(json!({ "quality": 0.4 })));
        let ctx = MockRunContext::new(Capabilities::new().with_agent("writer", agent.clone()));
        let node = recursive(Some("writer"), None, Some("quality > 0.9"));

        let result = RecursiveExecutor.execute(&ctx, &node, Map::new()).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output["quality"], 0.4);
        assert_eq!(result.output[ITERATION_KEY], 1);
        assert_eq!(result.output[CAN_RECURSE_KEY], true);
        assert_eq!(agent.decision_count(), 1);
    }

    #[tokio::test]
    async fn cap_reached_is_terminal() {
        let ctx = MockRunContext::new(Capabilities::new());
        let node = recursive(Some("writer"), None, Some("quality > 0.9"));

        let result = RecursiveExecutor
            .execute(&ctx, &node, at_iteration(3, json!({ "quality": 0.5 })))
            .await;

        assert_eq!(
            Value::Object(result.output),
            json!({ "converged": false, "reason": "max_iterations_reached", "iterations": 3 })
        );
    }

    #[tokio::test]
    async fn condition_met_is_terminal() {
        let ctx = MockRunContext::new(Capabilities::new());
        let node = recursive(Some("writer"), None, Some("quality > 0.9"));

        let result = RecursiveExecutor
            .execute(&ctx, &node, at_iteration(2, json!({ "quality": 0.95 })))
            .await;

        assert_eq!(result.output["converged"], true);
        assert_eq!(result.output["reason"], "condition_met");
        assert_eq!(result.output["iterations"], 2);
    }

    #[tokio::test]
    async fn broken_condition_after_first_round_fails() {
        let ctx = MockRunContext::new(Capabilities::new());
        let node = recursive(Some("writer"), None, Some("nonexistent > 1"));

        let result = RecursiveExecutor.execute(&ctx, &node, at_iteration(1, json!({}))).await;

        assert!(!result.success);
        assert_eq!(result.error_type(), Some("ExpressionError"));
    }

    #[tokio::test]
    async fn workflow_round_runs_child() {
        let step = NodeConfig::new(
            "draft",
            NodeKind::Tool(ToolNode {
                tool_name: "noop".into(),
                tool_args: Map::new(),
            }),
        );
        let caps = Capabilities::new().with_workflow("improve", WorkflowSource::Nodes(vec![step]));
        let ctx = MockRunContext::new(caps);
        let node = recursive(None, Some("improve"), None);

        let result = RecursiveExecutor
            .execute(&ctx, &node, at_iteration(1, json!({ "text": "v1" })))
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output["text"], "v1");
        assert_eq!(result.output[ITERATION_KEY], 2);
        assert_eq!(ctx.child_calls.lock().unwrap().len(), 1);
    }
}

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::kind_mismatch;
use crate::{
    ChildRun, ExecutionTimer, NestedChainNode, NodeConfig, NodeError, NodeExecutionResult,
    NodeExecutor, NodeKind, NodeType, RunContext,
};

/// Runs a child workflow in its own scope and optionally narrows its output
/// through `exposed_outputs`.
pub struct NestedChainExecutor;

#[async_trait]
impl NodeExecutor for NestedChainExecutor {
    async fn execute(
        &self,
        ctx: &dyn RunContext,
        node: &NodeConfig,
        input: Map<String, Value>,
    ) -> NodeExecutionResult {
        let timer = ExecutionTimer::start();
        let outcome = match &node.kind {
            NodeKind::NestedChain(cfg) => run_nested(ctx, node, cfg, input).await,
            _ => Err(kind_mismatch(node, NodeType::NestedChain)),
        };
        NodeExecutionResult::from_outcome(node, outcome, timer)
    }
}

async fn run_nested(
    ctx: &dyn RunContext,
    node: &NodeConfig,
    cfg: &NestedChainNode,
    input: Map<String, Value>,
) -> Result<Map<String, Value>, NodeError> {
    let nodes = match (&cfg.workflow, &cfg.workflow_ref) {
        (Some(inline), _) => inline.clone(),
        (None, Some(name)) => ctx
            .capabilities()
            .get_workflow(name)
            .map_err(|e| NodeError::ChildWorkflow(e.to_string()))?
            .instantiate(),
        (None, None) => {
            return Err(NodeError::InvalidConfig(
                "exactly one of workflow_ref or workflow is required".into(),
            ))
        }
    };

    let child = ctx.run_child(node, nodes, input).await?;
    if !child.success {
        return Err(NodeError::ChildWorkflow(child.errors.join("; ")));
    }

    if cfg.exposed_outputs.is_empty() {
        return Ok(child.final_output);
    }
    match expose(&cfg.exposed_outputs, &child) {
        Ok(mapped) => Ok(mapped),
        Err(reason) => {
            warn!(node_id = %node.id, %reason, "exposed_outputs mapping failed; passing child output through");
            Ok(child.final_output)
        }
    }
}

/// Evaluate each JSONPath against the child's per-node outputs.
fn expose(paths: &BTreeMap<String, String>, child: &ChildRun) -> Result<Map<String, Value>, String> {
    let root = Value::Object(child.outputs.clone());
    let mut mapped = Map::new();
    for (key, path) in paths {
        let expr = if path.starts_with('$') {
            path.clone()
        } else {
            format!("$.{path}")
        };
        let found = jsonpath_lib::select(&root, &expr).map_err(|e| format!("{key}: {e:?}"))?;
        let value = match found.as_slice() {
            [] => return Err(format!("{key}: nothing matched {expr}")),
            [single] => (*single).clone(),
            many => Value::Array(many.iter().map(|v| (*v).clone()).collect()),
        };
        debug!(key = %key, path = %expr, "exposed output");
        mapped.insert(key.clone(), value);
    }
    Ok(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRunContext;
    use crate::{Capabilities, ToolNode, WorkflowSource};
    use serde_json::json;
    use std::sync::Arc;

    fn step(id: &str) -> NodeConfig {
        NodeConfig::new(
            id,
            NodeKind::Tool(ToolNode {
                tool_name: "noop".into(),
                tool_args: Map::new(),
            }),
        )
    }

    fn nested(cfg: NestedChainNode) -> NodeConfig {
        NodeConfig::new("sub", NodeKind::NestedChain(cfg))
    }

    fn child_run(outputs: Value, final_output: Value) -> ChildRun {
        ChildRun {
            success: true,
            outputs: outputs.as_object().cloned().unwrap(),
            final_output: final_output.as_object().cloned().unwrap(),
            errors: vec![],
        }
    }

    #[tokio::test]
    async fn registered_factory_is_instantiated_for_the_child() {
        let factory = WorkflowSource::Factory(Arc::new(|| vec![step("a"), step("b")]));
        let ctx = MockRunContext::new(Capabilities::new().with_workflow("etl", factory));
        let cfg = NestedChainNode {
            workflow_ref: Some("etl".into()),
            workflow: None,
            exposed_outputs: BTreeMap::new(),
        };

        let result = NestedChainExecutor
            .execute(&ctx, &nested(cfg), json!({ "q": 1 }).as_object().cloned().unwrap())
            .await;

        assert!(result.success, "{:?}", result.error);
        let calls = ctx.child_calls.lock().unwrap();
        assert_eq!(calls[0].0, "sub");
        assert_eq!(calls[0].1, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(result.output["q"], 1);
    }

    #[tokio::test]
    async fn exposed_outputs_narrow_child_output() {
        let ctx = MockRunContext::new(Capabilities::new());
        ctx.push_child_result(Ok(child_run(
            json!({ "fetch": { "rows": [1, 2] }, "sum": { "total": 3, "debug": "x" } }),
            json!({ "total": 3, "debug": "x" }),
        )));
        let cfg = NestedChainNode {
            workflow_ref: None,
            workflow: Some(vec![step("fetch"), step("sum")]),
            exposed_outputs: BTreeMap::from([
                ("total".to_string(), "sum.total".to_string()),
                ("rows".to_string(), "$.fetch.rows".to_string()),
            ]),
        };

        let result = NestedChainExecutor.execute(&ctx, &nested(cfg), Map::new()).await;

        assert_eq!(
            Value::Object(result.output),
            json!({ "total": 3, "rows": [1, 2] })
        );
    }

    #[tokio::test]
    async fn broken_mapping_passes_raw_output_through() {
        let ctx = MockRunContext::new(Capabilities::new());
        ctx.push_child_result(Ok(child_run(json!({ "a": { "v": 1 } }), json!({ "v": 1 }))));
        let cfg = NestedChainNode {
            workflow_ref: None,
            workflow: Some(vec![step("a")]),
            exposed_outputs: BTreeMap::from([("v".to_string(), "missing.key".to_string())]),
        };

        let result = NestedChainExecutor.execute(&ctx, &nested(cfg), Map::new()).await;

        assert!(result.success);
        assert_eq!(Value::Object(result.output), json!({ "v": 1 }));
    }

    #[tokio::test]
    async fn failed_child_fails_the_node() {
        let ctx = MockRunContext::new(Capabilities::new());
        ctx.push_child_result(Ok(ChildRun {
            success: false,
            errors: vec!["a: boom".into()],
            ..Default::default()
        }));
        let cfg = NestedChainNode {
            workflow_ref: None,
            workflow: Some(vec![step("a")]),
            exposed_outputs: BTreeMap::new(),
        };

        let result = NestedChainExecutor.execute(&ctx, &nested(cfg), Map::new()).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("child workflow failed: a: boom"));
    }

    #[tokio::test]
    async fn unknown_workflow_ref_fails() {
        let ctx = MockRunContext::new(Capabilities::new());
        let cfg = NestedChainNode {
            workflow_ref: Some("nope".into()),
            workflow: None,
            exposed_outputs: BTreeMap::new(),
        };

        let result = NestedChainExecutor.execute(&ctx, &nested(cfg), Map::new()).await;
        assert_eq!(result.error_type(), Some("ChildWorkflowError"));
    }
}

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use super::kind_mismatch;
use crate::result::into_output;
use crate::template::substitute;
use crate::{
    ExecutionTimer, NodeConfig, NodeError, NodeExecutionResult, NodeExecutor, NodeKind, NodeType,
    RunContext, ToolNode,
};

/// Calls a registered tool with its static args, placeholders substituted
/// from the input context.
pub struct ToolExecutor;

#[async_trait]
impl NodeExecutor for ToolExecutor {
    async fn execute(
        &self,
        ctx: &dyn RunContext,
        node: &NodeConfig,
        input: Map<String, Value>,
    ) -> NodeExecutionResult {
        let timer = ExecutionTimer::start();
        let outcome = match &node.kind {
            NodeKind::Tool(cfg) => run_tool(ctx, node, cfg, &input).await,
            _ => Err(kind_mismatch(node, NodeType::Tool)),
        };
        NodeExecutionResult::from_outcome(node, outcome, timer)
    }
}

async fn run_tool(
    ctx: &dyn RunContext,
    node: &NodeConfig,
    cfg: &ToolNode,
    input: &Map<String, Value>,
) -> Result<Map<String, Value>, NodeError> {
    let tool = ctx
        .capabilities()
        .get_tool(&cfg.tool_name)
        .map_err(|_| NodeError::ToolNotFound(cfg.tool_name.clone()))?;

    let mut args: Map<String, Value> = cfg
        .tool_args
        .iter()
        .map(|(k, v)| (k.clone(), substitute(v, input)))
        .collect();

    // Mapped inputs fill in whatever the static args leave open.
    for key in node.input_mappings.keys() {
        if args.contains_key(key) {
            continue;
        }
        if let Some(value) = input.get(key) {
            args.insert(key.clone(), value.clone());
        }
    }

    debug!(node_id = %node.id, tool = %cfg.tool_name, "calling tool");
    let value = tool.call(args).await?;
    Ok(into_output(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRunContext, MockTool};
    use crate::{Capabilities, InputMapping};
    use serde_json::json;

    fn tool_node(args: Value) -> NodeConfig {
        NodeConfig::new(
            "write",
            NodeKind::Tool(ToolNode {
                tool_name: "fs".into(),
                tool_args: args.as_object().cloned().unwrap(),
            }),
        )
    }

    #[tokio::test]
    async fn unresolved_placeholder_is_passed_through() {
        let tool = MockTool::echoing();
        let calls = tool.calls.clone();
        let ctx = MockRunContext::new(Capabilities::new().with_tool("fs", tool));
        let node = tool_node(json!({ "path": "{missing}" }));

        let result = ToolExecutor.execute(&ctx, &node, Map::new()).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output["path"], "{missing}");
        assert_eq!(calls.lock().unwrap()[0]["path"], "{missing}");
    }

    #[tokio::test]
    async fn mapped_inputs_are_merged_under_static_args() {
        let ctx = MockRunContext::new(Capabilities::new().with_tool("fs", MockTool::echoing()));
        let node = tool_node(json!({ "path": "/tmp/{name}", "mode": "w" }))
            .with_mapping("mode", InputMapping::Literal(json!("a")))
            .with_mapping("content", InputMapping::reference("gen", "text"));
        let input = json!({ "name": "out.txt", "mode": "a", "content": "hello" });

        let result = ToolExecutor
            .execute(&ctx, &node, input.as_object().cloned().unwrap())
            .await;

        assert_eq!(result.output["path"], "/tmp/out.txt");
        assert_eq!(result.output["mode"], "w");
        assert_eq!(result.output["content"], "hello");
    }

    #[tokio::test]
    async fn missing_tool_fails_with_named_error() {
        let ctx = MockRunContext::new(Capabilities::new());
        let result = ToolExecutor.execute(&ctx, &tool_node(json!({})), Map::new()).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("tool 'fs' not found"));
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn tool_failure_becomes_failed_result() {
        let ctx = MockRunContext::new(Capabilities::new().with_tool("fs", MockTool::failing("disk full")));
        let result = ToolExecutor.execute(&ctx, &tool_node(json!({})), Map::new()).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("disk full"));
        assert_eq!(result.metadata.error_type.as_deref(), Some("CapabilityError"));
    }
}

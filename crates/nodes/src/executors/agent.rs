use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{call_timeout, kind_mismatch};
use crate::agent::{run_agent, AgentLimits};
use crate::result::into_output;
use crate::{
    AgentDefinition, AgentHandle, AgentNode, ExecutionTimer, NodeConfig, NodeError,
    NodeExecutionResult, NodeExecutor, NodeKind, NodeType, RunContext,
};

/// Runs a bounded agent loop for a packaged or inline agent.
pub struct AgentExecutor;

#[async_trait]
impl NodeExecutor for AgentExecutor {
    async fn execute(
        &self,
        ctx: &dyn RunContext,
        node: &NodeConfig,
        input: Map<String, Value>,
    ) -> NodeExecutionResult {
        let timer = ExecutionTimer::start();
        let outcome = match &node.kind {
            NodeKind::Agent(cfg) => run_agent_node(ctx, node, cfg, input).await,
            _ => Err(kind_mismatch(node, NodeType::Agent)),
        };
        NodeExecutionResult::from_outcome(node, outcome, timer)
    }
}

/// Resolve the agent and its effective tool allow-list.
fn resolve(ctx: &dyn RunContext, cfg: &AgentNode) -> Result<(AgentHandle, Vec<String>), NodeError> {
    let handle = match (&cfg.agent_package, &cfg.system_prompt) {
        (Some(package), _) => ctx.capabilities().get_agent(package)?,
        (None, Some(prompt)) => AgentHandle::Data(AgentDefinition {
            system_prompt: prompt.clone(),
            tools: Vec::new(),
            llm_config: cfg.llm_config.clone().unwrap_or_default(),
        }),
        (None, None) => {
            return Err(NodeError::InvalidConfig(
                "agent requires either agent_package or an inline system_prompt".into(),
            ))
        }
    };

    let mut allowed = cfg.tools.clone();
    let handle = match handle {
        AgentHandle::Data(mut definition) => {
            for tool in &definition.tools {
                if !allowed.contains(tool) {
                    allowed.push(tool.clone());
                }
            }
            if let Some(llm) = &cfg.llm_config {
                definition.llm_config = llm.clone();
            }
            AgentHandle::Data(definition)
        }
        code => code,
    };
    Ok((handle, allowed))
}

pub(super) async fn run_agent_node(
    ctx: &dyn RunContext,
    node: &NodeConfig,
    cfg: &AgentNode,
    input: Map<String, Value>,
) -> Result<Map<String, Value>, NodeError> {
    let (handle, allowed) = resolve(ctx, cfg)?;
    let limits = AgentLimits {
        allowed_tools: &allowed,
        max_iterations: cfg.max_iterations,
        llm_timeout: call_timeout(node),
    };

    let run = run_agent(ctx.capabilities(), &handle, input, limits).await?;
    if run.completed {
        debug!(node_id = %node.id, iterations = run.iterations, "agent finished");
    } else {
        warn!(
            node_id = %node.id,
            iterations = run.iterations,
            "agent hit its iteration cap without a final answer"
        );
    }

    let mut output = into_output(run.result);
    output.insert(
        "agent_package".into(),
        cfg.agent_package.clone().map(Value::String).unwrap_or(Value::Null),
    );
    output.insert("agent_executed".into(), Value::Bool(true));
    output.insert("iterations".into(), Value::from(run.iterations));
    output.insert("completed".into(), Value::Bool(run.completed));
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRunContext, MockTool, ScriptedAgent, ScriptedLlm};
    use crate::{AgentAction, Capabilities};
    use serde_json::json;
    use std::sync::Arc;

    fn agent_node(cfg: AgentNode) -> NodeConfig {
        NodeConfig::new("planner", NodeKind::Agent(cfg))
    }

    #[tokio::test]
    async fn packaged_agent_output_carries_markers() {
        let caps = Capabilities::new()
            .with_agent("planner", Arc::new(ScriptedAgent::finishing(json!({ "plan": "ship" }))));
        let ctx = MockRunContext::new(caps);

        let result = AgentExecutor
            .execute(&ctx, &agent_node(AgentNode::for_package("planner")), Map::new())
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output["plan"], "ship");
        assert_eq!(result.output["agent_package"], "planner");
        assert_eq!(result.output["agent_executed"], true);
        assert_eq!(result.output["completed"], true);
    }

    #[tokio::test]
    async fn definition_tools_join_the_allow_list() {
        let llm = ScriptedLlm::new(vec![
            crate::LlmResponse::text(r#"{"action":"tool_call","tool":"lookup","args":{"q":"x"}}"#),
            crate::LlmResponse::text(r#"{"action":"final","result":{"done":true}}"#),
        ]);
        let lookup = MockTool::returning(json!({ "found": 1 }));
        let calls = lookup.calls.clone();
        let caps = Capabilities::new()
            .with_default_llm(Arc::new(llm))
            .with_tool("lookup", lookup)
            .with_agent_definition(
                "researcher",
                AgentDefinition {
                    system_prompt: "Research things.".into(),
                    tools: vec!["lookup".into()],
                    llm_config: Default::default(),
                },
            );
        let ctx = MockRunContext::new(caps);

        let result = AgentExecutor
            .execute(&ctx, &agent_node(AgentNode::for_package("researcher")), Map::new())
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output["done"], true);
        assert_eq!(result.output["iterations"], 2);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn iteration_cap_is_reported_not_failed() {
        let agent = ScriptedAgent::new(vec![AgentAction::ToolCall {
            tool: "ping".into(),
            args: Map::new(),
        }]);
        let caps = Capabilities::new()
            .with_agent("pinger", Arc::new(agent))
            .with_tool("ping", MockTool::returning(json!("pong")));
        let ctx = MockRunContext::new(caps);
        let mut cfg = AgentNode::for_package("pinger");
        cfg.tools = vec!["ping".into()];
        cfg.max_iterations = 2;

        let result = AgentExecutor.execute(&ctx, &agent_node(cfg), Map::new()).await;

        assert!(result.success);
        assert_eq!(result.output["completed"], false);
        assert_eq!(result.output["result"], "pong");
    }

    #[tokio::test]
    async fn unknown_package_fails() {
        let ctx = MockRunContext::new(Capabilities::new());
        let result = AgentExecutor
            .execute(&ctx, &agent_node(AgentNode::for_package("ghost")), Map::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("agent 'ghost' not found"));
    }
}

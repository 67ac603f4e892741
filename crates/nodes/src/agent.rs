//! Bounded think/decide loop shared by agent, recursive and swarm nodes.

use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::{
    AgentAction, AgentDefinition, AgentHandle, AgentStep, AgentTurn, Capabilities, NodeError,
};

/// Outcome of an agent loop.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRun {
    pub result: Value,
    /// `false` when the loop hit its iteration cap before a final action.
    pub completed: bool,
    pub iterations: u32,
    pub history: Vec<AgentStep>,
}

/// Limits and permissions for one agent loop.
#[derive(Debug, Clone)]
pub struct AgentLimits<'a> {
    pub allowed_tools: &'a [String],
    pub max_iterations: u32,
    pub llm_timeout: Duration,
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// Parse an LLM reply as an action; free text counts as a final answer.
pub fn parse_action(text: &str) -> AgentAction {
    serde_json::from_str::<AgentAction>(strip_code_fence(text)).unwrap_or_else(|_| {
        AgentAction::Final {
            result: json!({ "response": text }),
        }
    })
}

fn agent_prompt(definition: &AgentDefinition, turn: &AgentTurn) -> String {
    let input = Value::Object(turn.input.clone());
    let history = serde_json::to_value(&turn.history).unwrap_or(Value::Null);
    format!(
        "{system}\n\nInput: {input}\nPrevious steps: {history}\nAvailable tools: {tools}\n\n\
         Respond with JSON only: {{\"action\": \"tool_call\", \"tool\": <name>, \"args\": {{...}}}} \
         or {{\"action\": \"final\", \"result\": {{...}}}}.",
        system = definition.system_prompt,
        tools = turn.tools.join(", "),
    )
}

async fn decide(
    capabilities: &Capabilities,
    handle: &AgentHandle,
    turn: &AgentTurn,
    llm_timeout: Duration,
) -> Result<AgentAction, NodeError> {
    match handle {
        AgentHandle::Code(agent) => Ok(agent.decide(turn).await?),
        AgentHandle::Data(definition) => {
            let provider = capabilities.get_llm_instance(&definition.llm_config.model)?;
            let prompt = agent_prompt(definition, turn);
            let response = provider
                .generate(
                    &definition.llm_config,
                    &prompt,
                    &turn.input,
                    Some(&turn.tools),
                    llm_timeout,
                    1,
                )
                .await;
            if let Some(err) = response.error {
                return Err(NodeError::Provider(err));
            }
            Ok(parse_action(&response.text))
        }
    }
}

/// Run the loop until a final action or `max_iterations` turns.
///
/// Tool failures are fed back to the agent as observations; a tool call
/// outside `allowed_tools` aborts the loop.
pub async fn run_agent(
    capabilities: &Capabilities,
    handle: &AgentHandle,
    input: Map<String, Value>,
    limits: AgentLimits<'_>,
) -> Result<AgentRun, NodeError> {
    let mut history: Vec<AgentStep> = Vec::new();

    for iteration in 0..limits.max_iterations {
        let turn = AgentTurn {
            iteration,
            input: input.clone(),
            history: history.clone(),
            tools: limits.allowed_tools.to_vec(),
        };

        match decide(capabilities, handle, &turn, limits.llm_timeout).await? {
            AgentAction::Final { result } => {
                return Ok(AgentRun {
                    result,
                    completed: true,
                    iterations: iteration + 1,
                    history,
                });
            }
            AgentAction::ToolCall { tool, args } => {
                if !limits.allowed_tools.iter().any(|t| t == &tool) {
                    return Err(NodeError::AgentAction(format!(
                        "tool '{tool}' is not in the agent's allow-list"
                    )));
                }
                let callable = capabilities
                    .get_tool(&tool)
                    .map_err(|_| NodeError::ToolNotFound(tool.clone()))?;
                debug!(tool = %tool, iteration, "agent tool call");
                let observation = match callable.call(args.clone()).await {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(tool = %tool, error = %e, "agent tool call failed");
                        json!({ "error": e.to_string() })
                    }
                };
                history.push(AgentStep {
                    tool,
                    args,
                    observation,
                });
            }
        }
    }

    let result = history
        .last()
        .map(|step| step.observation.clone())
        .unwrap_or(Value::Null);
    Ok(AgentRun {
        result,
        completed: false,
        iterations: limits.max_iterations,
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockTool, ScriptedAgent, ScriptedLlm};
    use std::sync::Arc;

    fn limits(tools: &[String], max: u32) -> AgentLimits<'_> {
        AgentLimits {
            allowed_tools: tools,
            max_iterations: max,
            llm_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn free_text_is_a_final_answer() {
        assert_eq!(
            parse_action("just words"),
            AgentAction::Final { result: json!({ "response": "just words" }) }
        );
        assert!(matches!(
            parse_action("```json\n{\"action\":\"final\",\"result\":1}\n```"),
            AgentAction::Final { result } if result == json!(1)
        ));
    }

    #[tokio::test]
    async fn code_agent_calls_tool_then_finishes() {
        let search = MockTool::returning(json!({ "hits": 2 }));
        let calls = search.calls.clone();
        let caps = Capabilities::new().with_tool("search", search);
        let agent = ScriptedAgent::new(vec![
            AgentAction::ToolCall { tool: "search".into(), args: Map::new() },
            AgentAction::Final { result: json!({ "answer": 42 }) },
        ]);
        let handle = AgentHandle::Code(Arc::new(agent));
        let tools = vec!["search".to_string()];

        let run = run_agent(&caps, &handle, Map::new(), limits(&tools, 5)).await.unwrap();

        assert!(run.completed);
        assert_eq!(run.iterations, 2);
        assert_eq!(run.result, json!({ "answer": 42 }));
        assert_eq!(run.history[0].observation, json!({ "hits": 2 }));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tool_outside_allow_list_is_rejected() {
        let caps = Capabilities::new().with_tool("rm", MockTool::returning(json!({})));
        let agent = ScriptedAgent::new(vec![AgentAction::ToolCall {
            tool: "rm".into(),
            args: Map::new(),
        }]);
        let handle = AgentHandle::Code(Arc::new(agent));

        let err = run_agent(&caps, &handle, Map::new(), limits(&[], 3)).await.unwrap_err();
        assert!(matches!(err, NodeError::AgentAction(_)));
    }

    #[tokio::test]
    async fn data_agent_stops_at_iteration_cap() {
        let llm = ScriptedLlm::repeating(r#"{"action":"tool_call","tool":"ping","args":{}}"#);
        let caps = Capabilities::new()
            .with_default_llm(Arc::new(llm))
            .with_tool("ping", MockTool::returning(json!({ "pong": true })));
        let handle = AgentHandle::Data(AgentDefinition {
            system_prompt: "You ping.".into(),
            tools: vec!["ping".into()],
            llm_config: Default::default(),
        });
        let tools = vec!["ping".to_string()];

        let run = run_agent(&caps, &handle, Map::new(), limits(&tools, 3)).await.unwrap();

        assert!(!run.completed);
        assert_eq!(run.iterations, 3);
        assert_eq!(run.history.len(), 3);
        assert_eq!(run.result, json!({ "pong": true }));
    }
}

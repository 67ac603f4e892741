use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::kind_mismatch;
use crate::template::substitute;
use crate::{
    ApprovalType, ExecutionTimer, HumanNode, HumanRequest, NodeConfig, NodeError,
    NodeExecutionResult, NodeExecutor, NodeKind, NodeType, RunContext,
};

/// Asks the human-input channel and waits for an answer.
pub struct HumanExecutor;

#[async_trait]
impl NodeExecutor for HumanExecutor {
    async fn execute(
        &self,
        ctx: &dyn RunContext,
        node: &NodeConfig,
        input: Map<String, Value>,
    ) -> NodeExecutionResult {
        let timer = ExecutionTimer::start();
        let outcome = match &node.kind {
            NodeKind::Human(cfg) => run_human(ctx, node, cfg, &input).await,
            _ => Err(kind_mismatch(node, NodeType::Human)),
        };
        NodeExecutionResult::from_outcome(node, outcome, timer)
    }
}

fn is_approval(response: &Value) -> bool {
    match response {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "approve" | "approved" | "yes" | "y"
        ),
        _ => false,
    }
}

async fn ask(
    ctx: &dyn RunContext,
    node: &NodeConfig,
    cfg: &HumanNode,
    prompt: String,
) -> Result<Option<Value>, NodeError> {
    let Some(channel) = ctx.capabilities().human_input() else {
        warn!(node_id = %node.id, "no human input channel configured");
        return Ok(None);
    };
    let request = HumanRequest {
        node_id: node.id.clone(),
        prompt,
        approval_type: cfg.approval_type,
        choices: cfg.choices.clone(),
    };
    let budget = Duration::try_from_secs_f64(cfg.response_timeout_seconds)
        .map_err(|e| NodeError::InvalidConfig(format!("response_timeout_seconds: {e}")))?;
    match tokio::time::timeout(budget, channel.request(request)).await {
        Ok(Ok(response)) => Ok(Some(response)),
        Ok(Err(e)) => Err(NodeError::HumanInput(e.to_string())),
        Err(_) => {
            warn!(node_id = %node.id, seconds = cfg.response_timeout_seconds, "human response timed out");
            Ok(None)
        }
    }
}

async fn run_human(
    ctx: &dyn RunContext,
    node: &NodeConfig,
    cfg: &HumanNode,
    input: &Map<String, Value>,
) -> Result<Map<String, Value>, NodeError> {
    let prompt = match substitute(&Value::String(cfg.prompt.clone()), input) {
        Value::String(s) => s,
        other => other.to_string(),
    };

    let (response, used_default) = match ask(ctx, node, cfg, prompt).await? {
        Some(response) => (response, false),
        None => match &cfg.default_response {
            Some(fallback) => (fallback.clone(), true),
            None => {
                return Err(NodeError::HumanInput(format!(
                    "no response within {}s and no default_response",
                    cfg.response_timeout_seconds
                )))
            }
        },
    };

    let mut output = Map::new();
    match cfg.approval_type {
        ApprovalType::ApproveReject => {
            output.insert("approved".into(), json!(is_approval(&response)));
        }
        ApprovalType::Choice => {
            let picked = response.as_str().unwrap_or_default();
            if !cfg.choices.iter().any(|c| c == picked) {
                return Err(NodeError::InvalidInput(format!(
                    "response {response} is not one of [{}]",
                    cfg.choices.join(", ")
                )));
            }
        }
        ApprovalType::InputRequired => {}
    }
    info!(node_id = %node.id, used_default, "human response recorded");
    output.insert("response".into(), response);
    output.insert("used_default".into(), json!(used_default));
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockHuman, MockRunContext};
    use crate::Capabilities;
    use std::sync::Arc;

    fn human(approval_type: ApprovalType, default_response: Option<Value>) -> NodeConfig {
        NodeConfig::new(
            "review",
            NodeKind::Human(HumanNode {
                prompt: "Approve {doc}?".into(),
                approval_type,
                choices: vec!["red".into(), "blue".into()],
                response_timeout_seconds: 0.05,
                default_response,
            }),
        )
    }

    fn with_human(response: Option<Value>) -> MockRunContext {
        MockRunContext::new(Capabilities::new().with_human_input(Arc::new(MockHuman {
            response,
            delay: Duration::from_millis(1),
        })))
    }

    #[tokio::test]
    async fn approval_is_interpreted() {
        let ctx = with_human(Some(json!("approve")));
        let result = HumanExecutor
            .execute(&ctx, &human(ApprovalType::ApproveReject, None), Map::new())
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output["approved"], true);
        assert_eq!(result.output["used_default"], false);
    }

    #[tokio::test]
    async fn timeout_falls_back_to_default_response() {
        let ctx = with_human(None);
        let result = HumanExecutor
            .execute(&ctx, &human(ApprovalType::ApproveReject, Some(json!(false))), Map::new())
            .await;

        assert!(result.success);
        assert_eq!(result.output["approved"], false);
        assert_eq!(result.output["used_default"], true);
    }

    #[tokio::test]
    async fn timeout_without_default_fails() {
        let ctx = with_human(None);
        let result = HumanExecutor
            .execute(&ctx, &human(ApprovalType::InputRequired, None), Map::new())
            .await;

        assert_eq!(result.error_type(), Some("HumanInputError"));
    }

    #[tokio::test]
    async fn choice_must_be_listed() {
        let ctx = with_human(Some(json!("green")));
        let result = HumanExecutor
            .execute(&ctx, &human(ApprovalType::Choice, None), Map::new())
            .await;

        assert_eq!(result.error_type(), Some("InputValidationError"));
    }
}

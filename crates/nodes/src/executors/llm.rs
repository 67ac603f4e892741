use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use super::{call_timeout, kind_mismatch};
use crate::template::render_strict;
use crate::{
    ExecutionTimer, LlmNode, NodeConfig, NodeError, NodeExecutionResult, NodeExecutor, NodeKind,
    NodeType, RunContext,
};

const TEMPLATE_PREFIX: &str = "template:";

/// Renders the prompt strictly and calls the LLM provider.
pub struct LlmExecutor;

#[async_trait]
impl NodeExecutor for LlmExecutor {
    async fn execute(
        &self,
        ctx: &dyn RunContext,
        node: &NodeConfig,
        input: Map<String, Value>,
    ) -> NodeExecutionResult {
        let timer = ExecutionTimer::start();
        let outcome = match &node.kind {
            NodeKind::Llm(cfg) => run_llm(ctx, node, cfg, &input).await,
            _ => Err(kind_mismatch(node, NodeType::Llm)),
        };
        NodeExecutionResult::from_outcome(node, outcome, timer)
    }
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

async fn run_llm(
    ctx: &dyn RunContext,
    node: &NodeConfig,
    cfg: &LlmNode,
    input: &Map<String, Value>,
) -> Result<Map<String, Value>, NodeError> {
    let template = match cfg.prompt.strip_prefix(TEMPLATE_PREFIX) {
        Some(name) => ctx.capabilities().get_template(name.trim())?.to_owned(),
        None => cfg.prompt.clone(),
    };
    // Fail before the provider ever sees a literal `{var}`.
    let prompt = render_strict(&template, input)?;

    let provider = ctx.capabilities().get_llm_instance(&cfg.llm_config.model)?;
    let tools = (!cfg.tools.is_empty()).then_some(cfg.tools.as_slice());

    debug!(node_id = %node.id, model = %cfg.llm_config.model, "calling llm");
    let response = provider
        .generate(
            &cfg.llm_config,
            &prompt,
            input,
            tools,
            call_timeout(node),
            cfg.max_retries,
        )
        .await;
    if let Some(err) = response.error {
        return Err(NodeError::Provider(err));
    }

    let mut output = Map::new();
    output.insert("usage".into(), serde_json::to_value(&response.usage).unwrap_or(Value::Null));
    if ctx.preferences().require_json_output {
        let parsed: Value = serde_json::from_str(strip_code_fence(&response.text))
            .map_err(|e| NodeError::Provider(format!("response is not valid JSON: {e}")))?;
        output.insert("json".into(), parsed);
    }
    output.insert("text".into(), Value::String(response.text));
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{EchoLlm, MockRunContext, ScriptedLlm};
    use crate::{Capabilities, ExecutionPreferences, LlmConfig};
    use serde_json::json;
    use std::sync::Arc;

    fn llm_node(prompt: &str) -> NodeConfig {
        NodeConfig::new(
            "ask",
            NodeKind::Llm(LlmNode {
                prompt: prompt.into(),
                llm_config: LlmConfig::default(),
                tools: vec![],
                max_retries: 0,
            }),
        )
    }

    fn input(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn unresolved_prompt_fails_before_provider_call() {
        let llm = Arc::new(ScriptedLlm::repeating("unused"));
        let ctx = MockRunContext::new(Capabilities::new().with_default_llm(llm.clone()));

        let result = LlmExecutor.execute(&ctx, &llm_node("Hello {name}"), Map::new()).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("name"));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn rendered_prompt_is_returned_as_text_with_usage() {
        let ctx = MockRunContext::new(Capabilities::new().with_default_llm(Arc::new(EchoLlm)));

        let result = LlmExecutor
            .execute(&ctx, &llm_node("Hello {name}"), input(json!({ "name": "Ada" })))
            .await;

        assert!(result.success);
        assert_eq!(result.output["text"], "Hello Ada");
        assert_eq!(result.output["usage"]["prompt_tokens"], 2);
    }

    #[tokio::test]
    async fn named_template_is_resolved() {
        let caps = Capabilities::new()
            .with_default_llm(Arc::new(EchoLlm))
            .with_template("greet", "Hi {who}");
        let ctx = MockRunContext::new(caps);

        let result = LlmExecutor
            .execute(&ctx, &llm_node("template:greet"), input(json!({ "who": "Bob" })))
            .await;

        assert_eq!(result.output["text"], "Hi Bob");
    }

    #[tokio::test]
    async fn provider_error_maps_to_failure() {
        let ctx = MockRunContext::new(
            Capabilities::new().with_default_llm(Arc::new(ScriptedLlm::failing("rate limited"))),
        );
        let result = LlmExecutor.execute(&ctx, &llm_node("hi"), Map::new()).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("provider error: rate limited"));
        assert_eq!(result.metadata.error_type.as_deref(), Some("ProviderError"));
    }

    #[tokio::test]
    async fn json_output_is_enforced_when_required() {
        let prefs = ExecutionPreferences {
            require_json_output: true,
            ..Default::default()
        };
        let caps = Capabilities::new().with_default_llm(Arc::new(EchoLlm));

        let ctx = MockRunContext::new(caps.clone()).with_preferences(prefs.clone());
        let bad = LlmExecutor.execute(&ctx, &llm_node("not json"), Map::new()).await;
        assert!(!bad.success);

        let ctx = MockRunContext::new(caps).with_preferences(prefs);
        let good = LlmExecutor
            .execute(&ctx, &llm_node(r#"{"ok": true}"#), Map::new())
            .await;
        assert!(good.success, "{:?}", good.error);
        assert_eq!(good.output["json"], json!({ "ok": true }));
    }
}

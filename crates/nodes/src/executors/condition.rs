use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::kind_mismatch;
use crate::expression::evaluate_bool;
use crate::{
    ExecutionTimer, NodeConfig, NodeExecutionResult, NodeExecutor, NodeKind, NodeType, RunContext,
};

/// Evaluates the branch expression; the run loop feeds `result` into the
/// branch gating resolver.
pub struct ConditionExecutor;

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    async fn execute(
        &self,
        _ctx: &dyn RunContext,
        node: &NodeConfig,
        input: Map<String, Value>,
    ) -> NodeExecutionResult {
        let timer = ExecutionTimer::start();
        let outcome = match &node.kind {
            NodeKind::Condition(cfg) => evaluate_bool(&cfg.expression, &input).map(|result| {
                let branch = if result { "true" } else { "false" };
                let mut output = Map::new();
                output.insert("result".into(), json!(result));
                output.insert("branch".into(), json!(branch));
                output
            }),
            _ => Err(kind_mismatch(node, NodeType::Condition)),
        };
        NodeExecutionResult::from_outcome(node, outcome, timer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRunContext;
    use crate::{Capabilities, ConditionNode};

    fn condition(expression: &str) -> NodeConfig {
        NodeConfig::new(
            "gate",
            NodeKind::Condition(ConditionNode {
                expression: expression.into(),
                true_branch: vec!["yes".into()],
                false_branch: vec!["no".into()],
            }),
        )
    }

    #[tokio::test]
    async fn reports_result_and_branch() {
        let ctx = MockRunContext::new(Capabilities::new());
        let input = json!({ "score": 0.9 }).as_object().cloned().unwrap();

        let result = ConditionExecutor
            .execute(&ctx, &condition("score > 0.5"), input)
            .await;

        assert!(result.success);
        assert_eq!(result.output["result"], true);
        assert_eq!(result.output["branch"], "true");
    }

    #[tokio::test]
    async fn evaluation_error_names_the_expression() {
        let ctx = MockRunContext::new(Capabilities::new());
        let result = ConditionExecutor
            .execute(&ctx, &condition("undefined_var > 1"), Map::new())
            .await;

        assert!(!result.success);
        assert!(result.error.as_ref().unwrap().contains("undefined_var > 1"));
        assert_eq!(result.error_type(), Some("ExpressionError"));
    }
}

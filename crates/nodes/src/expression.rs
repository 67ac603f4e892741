//! Restricted boolean expressions for condition, recursive and monitor nodes.
//!
//! Expressions run on a raw Rhai engine: no standard packages are loaded,
//! statements are rejected, and the operation count is capped. The only
//! names in scope are the top-level keys of the input context.

use rhai::{Dynamic, Engine, Scope};
use serde_json::{Map, Value};

use crate::NodeError;

const MAX_OPERATIONS: u64 = 10_000;

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Convert serde_json::Value to Rhai Dynamic.
fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(items) => {
            let array: rhai::Array = items.iter().map(json_to_dynamic).collect();
            Dynamic::from(array)
        }
        Value::Object(map) => {
            let mut rhai_map = rhai::Map::new();
            for (k, v) in map {
                rhai_map.insert(k.as_str().into(), json_to_dynamic(v));
            }
            Dynamic::from(rhai_map)
        }
    }
}

/// Evaluate `expression` against `ctx` and require a boolean result.
///
/// # Errors
/// [`NodeError::Expression`] naming the expression on parse errors, unknown
/// variables or functions, non-boolean results, or exceeding the operation
/// limit.
pub fn evaluate_bool(expression: &str, ctx: &Map<String, Value>) -> Result<bool, NodeError> {
    let mut engine = Engine::new_raw();
    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_expr_depths(64, 32);

    let mut scope = Scope::new();
    for (key, value) in ctx.iter().filter(|(k, _)| is_identifier(k)) {
        scope.push_dynamic(key.as_str(), json_to_dynamic(value));
    }

    engine
        .eval_expression_with_scope::<bool>(&mut scope, expression)
        .map_err(|e| NodeError::Expression {
            expression: expression.to_owned(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn compares_numbers_strings_and_nested_fields() {
        let c = ctx(json!({ "score": 0.8, "status": "ok", "fetch": { "count": 3 } }));
        assert!(evaluate_bool("score > 0.5 && status == \"ok\"", &c).unwrap());
        assert!(evaluate_bool("fetch.count >= 3", &c).unwrap());
        assert!(!evaluate_bool("fetch.count > 3", &c).unwrap());
    }

    #[test]
    fn non_boolean_result_is_an_error() {
        let err = evaluate_bool("1 + 1", &ctx(json!({}))).unwrap_err();
        assert!(matches!(err, NodeError::Expression { ref expression, .. } if expression == "1 + 1"));
    }

    #[test]
    fn unknown_names_and_functions_fail() {
        assert!(evaluate_bool("missing > 1", &ctx(json!({}))).is_err());
        assert!(evaluate_bool("open(\"/etc/passwd\") == 1", &ctx(json!({}))).is_err());
    }

    #[test]
    fn statements_are_rejected() {
        assert!(evaluate_bool("let x = true; x", &ctx(json!({}))).is_err());
    }

    #[test]
    fn keys_that_are_not_identifiers_are_skipped() {
        let c = ctx(json!({ "my-node": 1, "ok": true }));
        assert!(evaluate_bool("ok", &c).unwrap());
    }
}

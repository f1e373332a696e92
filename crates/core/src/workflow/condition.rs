//! Gate expressions for nodes and edges.
//!
//! The grammar is deliberately tiny and must stay that way, since stored
//! definitions depend on which nodes it lets through:
//! - `!name` is true when `name` is absent, empty or falsy
//! - `name==value` / `name!=value` compare the stringified entry with `value`
//! - bare `name` is true when the entry is present and truthy
//!
//! There is no `&&` / `||` composition.

use super::context::ExecutionContext;
use serde_json::Value;

/// Evaluate a condition against the execution context. An empty expression
/// always passes.
pub fn evaluate_condition(expr: &str, context: &ExecutionContext) -> bool {
    let expr = expr.trim();
    if expr.is_empty() {
        return true;
    }

    if let Some((name, literal)) = split_operator(expr, "!=") {
        return match context.get(name).and_then(stringify) {
            Some(actual) => actual != literal,
            None => true,
        };
    }

    if let Some((name, literal)) = split_operator(expr, "==") {
        return context
            .get(name)
            .and_then(stringify)
            .is_some_and(|actual| actual == literal);
    }

    if let Some(name) = expr.strip_prefix('!') {
        return !is_truthy(context.get(name.trim()));
    }

    is_truthy(context.get(expr))
}

/// JavaScript-style truthiness: absent, null, false, 0 and "" are falsy
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn split_operator<'a>(expr: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    let (name, literal) = expr.split_once(op)?;
    let literal = literal.trim();
    let literal = literal
        .strip_prefix('"')
        .and_then(|l| l.strip_suffix('"'))
        .or_else(|| literal.strip_prefix('\'').and_then(|l| l.strip_suffix('\'')))
        .unwrap_or(literal);
    Some((name.trim(), literal))
}

fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Values;
    use serde_json::json;

    fn ctx(value: serde_json::Value) -> ExecutionContext {
        let values: Values = value.as_object().cloned().unwrap_or_default();
        ExecutionContext::from_values(values)
    }

    #[test]
    fn test_negation_on_empty_string() {
        let context = ctx(json!({"logoUrl": ""}));
        assert!(evaluate_condition("!logoUrl", &context));
        assert!(!evaluate_condition("logoUrl", &context));
    }

    #[test]
    fn test_negation_on_missing_and_present() {
        let context = ctx(json!({"logoUrl": "https://cdn.example/logo.png"}));
        assert!(!evaluate_condition("!logoUrl", &context));
        assert!(evaluate_condition("!missing", &context));
    }

    #[test]
    fn test_equality() {
        let context = ctx(json!({"plan": "pro"}));
        assert!(evaluate_condition("plan==pro", &context));
        assert!(!evaluate_condition("plan!=pro", &context));
        assert!(evaluate_condition("plan != free", &context));
        assert!(evaluate_condition(r#"plan == "pro""#, &context));
        assert!(!evaluate_condition("plan==free", &context));
    }

    #[test]
    fn test_equality_against_missing_key() {
        let context = ctx(json!({}));
        assert!(!evaluate_condition("plan==pro", &context));
        assert!(evaluate_condition("plan!=pro", &context));
    }

    #[test]
    fn test_non_string_values_are_stringified() {
        let context = ctx(json!({"count": 3, "enabled": true}));
        assert!(evaluate_condition("count==3", &context));
        assert!(evaluate_condition("enabled==true", &context));
    }

    #[test]
    fn test_truthiness() {
        let context = ctx(json!({
            "zero": 0, "one": 1, "no": false, "nothing": null,
            "list": [], "text": "x"
        }));
        assert!(!evaluate_condition("zero", &context));
        assert!(evaluate_condition("one", &context));
        assert!(!evaluate_condition("no", &context));
        assert!(!evaluate_condition("nothing", &context));
        assert!(evaluate_condition("list", &context));
        assert!(evaluate_condition("text", &context));
        assert!(evaluate_condition("  ", &context));
    }

    #[test]
    fn test_no_boolean_composition() {
        // `&&` is not an operator; the whole string is treated as one key
        let context = ctx(json!({"a": true, "b": true}));
        assert!(!evaluate_condition("a && b", &context));
    }
}

//! `{placeholder}` substitution against an input context.
//!
//! Placeholders are identifiers with optional dot-separated path segments
//! (`{name}`, `{fetch.body}`, `{rows.0}`). Anything else between braces, such
//! as JSON in a prompt, is left alone.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::NodeError;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\}")
        .expect("placeholder pattern is valid")
});

/// Resolve a dot path (`a.b.0`) inside `ctx`.
pub fn lookup_path<'a>(ctx: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = ctx.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Like [`lookup_path`] but rooted at an arbitrary value.
pub fn lookup_value<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => lookup_path(map, path),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Tolerant substitution through strings, maps and lists.
///
/// Unresolvable placeholders stay verbatim. A string that is exactly one
/// placeholder is replaced by the referenced value itself, keeping its JSON
/// type.
pub fn substitute(value: &Value, ctx: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => substitute_str(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_str(s: &str, ctx: &Map<String, Value>) -> Value {
    if let Some(caps) = PLACEHOLDER.captures(s) {
        let whole = caps.get(0).map(|m| m.as_str().len()) == Some(s.len());
        if whole {
            if let Some(v) = lookup_path(ctx, &caps[1]) {
                return v.clone();
            }
        }
    }
    let rendered = PLACEHOLDER.replace_all(s, |caps: &Captures<'_>| {
        lookup_path(ctx, &caps[1])
            .map(as_text)
            .unwrap_or_else(|| caps[0].to_owned())
    });
    Value::String(rendered.into_owned())
}

/// Strict rendering: every placeholder must resolve.
///
/// # Errors
/// [`NodeError::UnresolvedPlaceholder`] listing each missing name once.
pub fn render_strict(template: &str, ctx: &Map<String, Value>) -> Result<String, NodeError> {
    let mut missing: Vec<String> = Vec::new();
    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
        match lookup_path(ctx, &caps[1]) {
            Some(v) => as_text(v),
            None => {
                if !missing.iter().any(|m| m == &caps[1]) {
                    missing.push(caps[1].to_owned());
                }
                caps[0].to_owned()
            }
        }
    });
    if missing.is_empty() {
        Ok(rendered.into_owned())
    } else {
        Err(NodeError::UnresolvedPlaceholder(missing))
    }
}

//! Template variable substitution for message subjects and bodies.
//!
//! Placeholders look like `{{user.first_name}}` (inner whitespace allowed).
//! Paths that do not resolve to a scalar are left exactly as written.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*\}\}")
        .expect("placeholder pattern is valid")
});

/// Substitute every placeholder in `template` from `context`.
pub fn render(template: &str, context: &Value) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let path = &caps[1];
            match lookup(context, path).and_then(scalar_text) {
                Some(text) => text,
                None => {
                    tracing::debug!(path = path, "Template variable not found; left as-is");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(context, |value, key| value.as_object()?.get(key))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

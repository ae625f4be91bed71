//! Secret redaction and size bounding for audit records.

use serde_json::{Map, Value};

pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Inputs keep strings up to this many characters.
pub const INPUT_STRING_LIMIT: usize = 500;
/// Results keep strings up to this many characters.
pub const RESULT_STRING_LIMIT: usize = 2000;
/// Results keep arrays up to this many items.
pub const RESULT_ITEM_LIMIT: usize = 20;

const SECRET_KEY_PARTS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "credential",
    "private_key",
    "access_key",
    "authorization",
];

const NON_SECRET_KEYS: &[&str] = &["max_tokens", "max_completion_tokens"];

/// True when a field with this name is expected to carry a secret.
pub fn is_secret_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase().replace('-', "_");
    if NON_SECRET_KEYS.contains(&lowered.as_str()) {
        return false;
    }
    SECRET_KEY_PARTS.iter().any(|part| lowered.contains(part))
}

/// Replace every secret-bearing field, at any depth, with [`REDACTION_MARKER`].
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    let replaced = if is_secret_key(key) {
                        Value::String(REDACTION_MARKER.to_string())
                    } else {
                        redact(inner)
                    };
                    (key.clone(), replaced)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// Bound tool inputs for the audit log.
pub fn bound_inputs(value: &Value) -> Value {
    bound(value, INPUT_STRING_LIMIT, None)
}

/// Bound tool results for the audit log.
pub fn bound_result(value: &Value) -> Value {
    bound(value, RESULT_STRING_LIMIT, Some(RESULT_ITEM_LIMIT))
}

fn bound(value: &Value, max_chars: usize, max_items: Option<usize>) -> Value {
    match value {
        Value::String(text) => Value::String(clip(text, max_chars)),
        Value::Array(items) => Value::Array(bound_items(items, max_chars, max_items)),
        Value::Object(map) => {
            let mut bounded = Map::new();
            for (key, inner) in map {
                if let (Value::Array(items), Some(limit)) = (inner, max_items)
                    && items.len() > limit
                {
                    bounded.insert(format!("{key}_total"), Value::from(items.len()));
                }
                bounded.insert(key.clone(), bound(inner, max_chars, max_items));
            }
            Value::Object(bounded)
        }
        other => other.clone(),
    }
}

fn bound_items(items: &[Value], max_chars: usize, max_items: Option<usize>) -> Vec<Value> {
    let keep = max_items.unwrap_or(items.len());
    items
        .iter()
        .take(keep)
        .map(|item| bound(item, max_chars, max_items))
        .collect()
}

/// Keep the first `max_chars` characters and note how many were dropped.
pub fn clip(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}... [truncated {} chars]", total - max_chars)
}

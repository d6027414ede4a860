//! Response Parser
//!
//! Pulls structured JSON out of raw model text. Total: any input yields an
//! object, an array, or the empty object. Malformed output is never an error.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

const FENCE: &str = "```";

/// Parse model text into a JSON object or array.
///
/// Tries the whole text first, then the first fenced code block. Anything
/// else, including scalars, yields `{}`.
pub fn parse_json(text: &str) -> Value {
    if let Some(value) = parse_structured(text) {
        return value;
    }
    if let Some(value) = first_fenced_block(text).and_then(parse_structured) {
        return value;
    }
    debug!("No structured JSON in model response ({} chars)", text.len());
    empty()
}

/// Parse model text into `T`, falling back to `T::default()` on any mismatch.
pub fn parse_json_as<T: DeserializeOwned + Default>(text: &str) -> T {
    serde_json::from_value(parse_json(text)).unwrap_or_default()
}

/// `{}` or `[]`: nothing was extracted.
pub fn is_empty_structure(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => true,
    }
}

pub fn empty() -> Value {
    Value::Object(Map::new())
}

fn parse_structured(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

fn first_fenced_block(text: &str) -> Option<&str> {
    let start = text.find(FENCE)? + FENCE.len();
    let rest = &text[start..];
    let block = &rest[..rest.find(FENCE)?];

    // Drop the info string, e.g. the `json` in ```json
    let body = match block.find('\n') {
        Some(i) if block[..i].trim().chars().all(|c| c.is_ascii_alphanumeric()) => &block[i + 1..],
        _ => block.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    Some(body.trim())
}

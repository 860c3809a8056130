//! Parsing and JSON Schema validation of raw backend responses.

use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use jsonschema::validator_for;
use regex::Regex;
use serde_json::Value;

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```(?:json)?\s*\n(.*?)\n?```\s*$").expect("fence regex is valid")
});

/// Parse a backend response as JSON, tolerating a surrounding Markdown code fence.
pub fn parse_response(raw: &str) -> Result<Value, String> {
    let body = FENCED_JSON
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map_or(raw, |m| m.as_str());
    serde_json::from_str(body.trim()).map_err(|err| format!("response is not valid JSON: {err}"))
}

/// Validate `instance` against `schema` (raw JSON Schema text).
///
/// Returns the list of violations; empty means valid. Errors only when the
/// schema itself is broken.
pub fn schema_violations(schema: &str, instance: &Value) -> Result<Vec<String>> {
    let schema_value: Value =
        serde_json::from_str(schema).map_err(|err| anyhow!("parse schema: {err}"))?;
    let compiled = validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {err}"))?;
    Ok(compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect())
}

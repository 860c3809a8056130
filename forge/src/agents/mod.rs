//! Agent roles that turn prompts into validated records or workspace edits.

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::types::Record;
use crate::io::backend::{Backend, StructuredRequest};
use crate::io::schema::{parse_response, schema_violations};

pub mod architect;
pub mod coder;
pub mod planner;

/// A backend response that did not parse or did not match its record shape.
#[derive(Debug, Error)]
#[error("{shape} response violates its schema: {}\nraw response:\n{raw}", .messages.join("; "))]
pub struct SchemaViolationError {
    pub shape: &'static str,
    pub raw: String,
    pub messages: Vec<String>,
}

/// Ask the backend for one record of shape `R` and validate it.
pub(crate) fn infer_record<R: Record, B: Backend + ?Sized>(
    backend: &B,
    prompt: String,
    label: &str,
) -> Result<R> {
    let request = StructuredRequest {
        shape: R::SHAPE,
        schema: R::SCHEMA,
        prompt,
        label: label.to_string(),
    };
    let raw = backend.infer_structured(&request)?;
    decode_record(&raw)
}

/// Parse, validate and deserialize a raw response as `R`.
pub fn decode_record<R: Record>(raw: &str) -> Result<R> {
    let violation = |messages: Vec<String>| SchemaViolationError {
        shape: R::SHAPE,
        raw: raw.to_string(),
        messages,
    };
    let value = parse_response(raw).map_err(|err| violation(vec![err]))?;
    let messages = schema_violations(R::SCHEMA, &value)?;
    if !messages.is_empty() {
        warn!(shape = R::SHAPE, violations = messages.len(), "response rejected");
        return Err(violation(messages).into());
    }
    let record = serde_json::from_value(value).map_err(|err| violation(vec![err.to_string()]))?;
    debug!(shape = R::SHAPE, "response accepted");
    Ok(record)
}

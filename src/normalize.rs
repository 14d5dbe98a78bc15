// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Response normalization
//!
//! Turns raw backend text into the canonical payload for the requested
//! response format. Structured-output failures are recoverable errors
//! carrying the raw text, never hard failures.

use crate::error::{Result, SwitchboardError};
use crate::llm::message::ResponseFormat;
use crate::llm::provider::ResponseContent;

/// Strip a markdown code fence wrapped around a JSON reply.
///
/// Some backends answer structured requests with
/// ```` ```json {...} ``` ````; the decode step needs the bare payload.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Interpret raw backend output per the requested format
pub fn normalize(raw: &str, format: &ResponseFormat) -> Result<ResponseContent> {
    match format {
        ResponseFormat::PlainText => Ok(ResponseContent::Text(raw.to_string())),
        ResponseFormat::JsonFreeform => {
            let stripped = strip_code_fences(raw);
            let value: serde_json::Value = serde_json::from_str(stripped).map_err(|_| {
                SwitchboardError::MalformedStructuredOutput {
                    raw: raw.to_string(),
                }
            })?;
            Ok(ResponseContent::Json(value))
        }
        ResponseFormat::JsonSchema(schema) => {
            let stripped = strip_code_fences(raw);
            let value: serde_json::Value = serde_json::from_str(stripped).map_err(|_| {
                SwitchboardError::MalformedStructuredOutput {
                    raw: raw.to_string(),
                }
            })?;
            validate_against_schema(&value, schema, raw)?;
            Ok(ResponseContent::Json(value))
        }
    }
}

fn validate_against_schema(
    value: &serde_json::Value,
    schema: &serde_json::Value,
    raw: &str,
) -> Result<()> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| SwitchboardError::Config(format!("invalid response schema: {e}")))?;

    if let Err(error) = validator.validate(value) {
        return Err(SwitchboardError::SchemaViolation {
            raw: raw.to_string(),
            detail: error.to_string(),
        });
    }
    Ok(())
}

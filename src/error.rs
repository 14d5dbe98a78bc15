// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Switchboard
//!
//! This module defines all error types used throughout the gateway.

use thiserror::Error;

/// Main error type for Switchboard operations
#[derive(Error, Debug)]
pub enum SwitchboardError {
    /// API-related errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Invalid input, rejected before dispatch
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No credential supplied and none found in the environment
    #[error("No credential for provider '{provider}': set {env_var} or pass an API key")]
    MissingCredential { provider: String, env_var: String },

    /// Structured output requested for a model that cannot produce it
    #[error("Model '{model}' does not support structured output")]
    UnsupportedFormatForModel { model: String },

    /// The backend returned text that could not be decoded as JSON
    #[error("Malformed structured output: {raw}")]
    MalformedStructuredOutput { raw: String },

    /// Decoded JSON did not conform to the requested schema
    #[error("Schema violation: {detail}")]
    SchemaViolation { raw: String, detail: String },

    /// An attachment could not be decoded; the attachment is dropped and
    /// the call proceeds
    #[error("Attachment decode error: {0}")]
    AttachmentDecode(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Conversation storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// API-specific error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    /// Rate limited by the API
    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u32),

    /// Requested model not found
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid response from API
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// API returned an error
    #[error("API error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamError(String),
}

/// Result type alias for Switchboard operations
pub type Result<T> = std::result::Result<T, SwitchboardError>;

impl SwitchboardError {
    /// Whether the caller can meaningfully retry or degrade after this error.
    ///
    /// Transport and structured-output failures are recoverable; the raw text
    /// is carried on the structured-output variants so callers can fall back
    /// to plain-text handling.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SwitchboardError::Api(_)
                | SwitchboardError::MalformedStructuredOutput { .. }
                | SwitchboardError::SchemaViolation { .. }
        )
    }

    /// The raw backend text attached to a structured-output failure, if any
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            SwitchboardError::MalformedStructuredOutput { raw } => Some(raw),
            SwitchboardError::SchemaViolation { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for SwitchboardError {
    fn from(err: toml::de::Error) -> Self {
        SwitchboardError::Toml(err.to_string())
    }
}

impl From<toml::ser::Error> for SwitchboardError {
    fn from(err: toml::ser::Error) -> Self {
        SwitchboardError::Toml(err.to_string())
    }
}

impl From<rusqlite::Error> for SwitchboardError {
    fn from(err: rusqlite::Error) -> Self {
        SwitchboardError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_display() {
        let err = SwitchboardError::InvalidInput("empty prompt".to_string());
        assert!(err.to_string().contains("Invalid input"));
        assert!(err.to_string().contains("empty prompt"));
    }

    #[test]
    fn test_missing_credential_display() {
        let err = SwitchboardError::MissingCredential {
            provider: "openai".to_string(),
            env_var: "OPENAI_API_KEY".to_string(),
        };
        assert!(err.to_string().contains("openai"));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_unsupported_format_display() {
        let err = SwitchboardError::UnsupportedFormatForModel {
            model: "deepseek-reasoner".to_string(),
        };
        assert!(err.to_string().contains("deepseek-reasoner"));
    }

    #[test]
    fn test_malformed_output_carries_raw() {
        let err = SwitchboardError::MalformedStructuredOutput {
            raw: "not json at all".to_string(),
        };
        assert_eq!(err.raw_text(), Some("not json at all"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_schema_violation_carries_raw() {
        let err = SwitchboardError::SchemaViolation {
            raw: r#"{"age": "ten"}"#.to_string(),
            detail: "\"ten\" is not of type \"number\"".to_string(),
        };
        assert_eq!(err.raw_text(), Some(r#"{"age": "ten"}"#));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_pre_dispatch_errors_not_recoverable() {
        let err = SwitchboardError::InvalidInput("bad".to_string());
        assert!(!err.is_recoverable());
        assert!(err.raw_text().is_none());

        let err = SwitchboardError::MissingCredential {
            provider: "anthropic".to_string(),
            env_var: "ANTHROPIC_API_KEY".to_string(),
        };
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_api_error_recoverable() {
        let err: SwitchboardError = ApiError::RateLimited(30).into();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn test_api_error_server_error() {
        let err = ApiError::ServerError {
            status: 500,
            message: "internal server error".to_string(),
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("internal server error"));
    }

    #[test]
    fn test_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SwitchboardError = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_from_rusqlite() {
        let err: SwitchboardError = rusqlite::Error::InvalidQuery.into();
        assert!(err.to_string().contains("Storage error"));
    }

    #[test]
    fn test_result_type_alias() {
        fn ok_fn() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(ok_fn().unwrap(), 42);
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat provider trait and related types
//!
//! Defines the abstraction layer over the different chat backends.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::{Result, SwitchboardError};
use crate::llm::message::{Message, ResponseFormat};

/// Models that only expose a reasoning interface and reject structured
/// output. Checked before dispatch, never discovered via a failed call.
const REASONING_MODELS: &[&str] = &[
    "deepseek-reasoner",
    "o1",
    "o1-mini",
    "o1-preview",
    "o3",
    "o3-mini",
];

/// Whether a model belongs to the reasoning class (exact or prefixed id,
/// e.g. "o1-2024-12-17" or "openai/o1-mini")
pub fn is_reasoning_model(model: &str) -> bool {
    let bare = model.rsplit('/').next().unwrap_or(model);
    REASONING_MODELS
        .iter()
        .any(|m| bare == *m || bare.starts_with(&format!("{m}-")))
}

/// Reject a structured format for a model that cannot produce it
pub fn ensure_format_supported(model: &str, format: &ResponseFormat) -> Result<()> {
    if format.is_structured() && is_reasoning_model(model) {
        return Err(SwitchboardError::UnsupportedFormatForModel {
            model: model.to_string(),
        });
    }
    Ok(())
}

/// Main trait for chat providers
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Get the provider name (e.g., "anthropic", "openai")
    fn name(&self) -> &str;

    /// Non-streaming completion
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Streaming completion. The stream is lazy, finite, and not
    /// restartable; retrying means issuing a new call.
    async fn complete_stream(&self, request: ChatRequest) -> Result<TokenStream>;
}

/// A lazy sequence of token chunks from a streaming call
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<TokenChunk>> + Send>>;

/// Request for a chat completion
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model to use
    pub model: String,

    /// Messages in the conversation; non-empty, last turn is the user's
    pub messages: Vec<Message>,

    /// Requested response format
    pub format: ResponseFormat,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum tokens in response
    pub max_tokens: u32,
}

impl ChatRequest {
    /// Create a new chat request
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            format: ResponseFormat::PlainText,
            temperature: 0.7,
            max_tokens: 8192,
        }
    }

    /// Set the response format
    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// The system directive, taken from the leading system messages
    pub fn system_text(&self) -> Option<String> {
        let parts: Vec<String> = self
            .messages
            .iter()
            .filter(|m| m.role == crate::llm::message::Role::System)
            .map(|m| m.text())
            .filter(|t| !t.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

/// Normalized response payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ResponseContent {
    /// Plain text
    Text(String),
    /// Parsed structured value
    Json(serde_json::Value),
}

impl ResponseContent {
    /// The text payload, if this is a text response
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseContent::Text(text) => Some(text),
            ResponseContent::Json(_) => None,
        }
    }

    /// The structured payload, if this is a JSON response
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ResponseContent::Json(value) => Some(value),
            ResponseContent::Text(_) => None,
        }
    }
}

/// Canonical result of a chat call
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Response payload (raw text from the adapter; the normalizer
    /// converts it per the requested format)
    pub content: ResponseContent,

    /// Updated message history, assistant turn appended exactly once
    pub messages: Vec<Message>,

    /// Non-fatal problems encountered on the way (dropped attachments)
    pub warnings: Vec<String>,
}

impl ChatResponse {
    /// Build a response from raw backend text, appending the assistant turn
    pub fn from_text(text: impl Into<String>, mut messages: Vec<Message>) -> Self {
        let text = text.into();
        messages.push(Message::assistant(text.clone()));
        Self {
            content: ResponseContent::Text(text),
            messages,
            warnings: Vec::new(),
        }
    }

    /// The raw text payload, when present
    pub fn text(&self) -> Option<&str> {
        self.content.as_text()
    }
}

/// One incremental unit of generated text delivered during streaming
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenChunk {
    /// Backend-assigned response id
    pub id: String,

    /// Model that produced the chunk
    pub model: String,

    /// Text delta carried by this chunk (may be empty on terminal chunks)
    pub content: String,

    /// Role reported by the backend, usually "assistant" on the first chunk
    pub role: Option<String>,

    /// Set on the final chunk ("stop", "length", ...)
    pub finish_reason: Option<String>,
}

impl TokenChunk {
    /// A plain text delta
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

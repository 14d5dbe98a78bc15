// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Ollama local engine provider implementation
//!
//! Implements the ChatProvider trait against Ollama's /api/chat endpoint.
//! Messages are flat role+string pairs with an optional per-message images
//! array, and streaming is newline-delimited JSON rather than SSE.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result, SwitchboardError};
use crate::llm::message::{Message, ResponseFormat, Role};
use crate::llm::provider::{ChatProvider, ChatRequest, ChatResponse, TokenChunk, TokenStream};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Ollama local engine provider. No API key required.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
}

impl OllamaProvider {
    /// Create a new Ollama provider with the default base URL
    pub fn new() -> Self {
        Self::with_client(Client::new(), DEFAULT_OLLAMA_URL)
    }

    /// Create with a shared HTTP client and base URL
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Create with a custom base URL
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Check if Ollama is running and reachable
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                if e.is_connect() {
                    Err(SwitchboardError::Api(ApiError::Network(
                        "Ollama is not running. Start the Ollama app or run 'ollama serve'"
                            .to_string(),
                    )))
                } else {
                    Err(SwitchboardError::Http(e))
                }
            }
        }
    }

    /// Convert canonical messages to the flat Ollama shape.
    /// Image parts become a per-message base64 images array.
    fn convert_messages(&self, messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };

                let images: Vec<String> =
                    m.images().iter().map(|img| img.data.clone()).collect();

                OllamaMessage {
                    role: role.to_string(),
                    content: m.text(),
                    images: if images.is_empty() { None } else { Some(images) },
                }
            })
            .collect()
    }

    /// Build the request body
    fn build_request(&self, request: &ChatRequest, stream: bool) -> OllamaRequest {
        let format = match &request.format {
            ResponseFormat::JsonSchema(schema) => Some(schema.clone()),
            ResponseFormat::JsonFreeform => Some(serde_json::Value::String("json".to_string())),
            ResponseFormat::PlainText => None,
        };

        OllamaRequest {
            model: request.model.clone(),
            messages: self.convert_messages(&request.messages),
            stream,
            format,
            options: Some(OllamaOptions {
                temperature: Some(request.temperature),
                num_predict: Some(request.max_tokens as i64),
            }),
        }
    }

    /// Parse an error response body
    fn parse_error(&self, status: u16, body: &str) -> SwitchboardError {
        if let Ok(error_response) = serde_json::from_str::<OllamaError>(body) {
            let message = error_response.error;
            if message.contains("model") && message.contains("not found") {
                SwitchboardError::Api(ApiError::ModelNotFound(message))
            } else {
                SwitchboardError::Api(ApiError::ServerError { status, message })
            }
        } else {
            SwitchboardError::Api(ApiError::ServerError {
                status,
                message: body.to_string(),
            })
        }
    }

    async fn send_request(&self, body: &OllamaRequest) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    SwitchboardError::Api(ApiError::Network(
                        "Ollama is not running. Start the Ollama app or run 'ollama serve'"
                            .to_string(),
                    ))
                } else {
                    SwitchboardError::Http(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status, &body));
        }
        Ok(response)
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = self.build_request(&request, false);
        let response = self.send_request(&body).await?;
        let api_response: OllamaChatResponse = response.json().await?;

        let text = api_response
            .message
            .map(|m| m.content)
            .ok_or_else(|| {
                SwitchboardError::Api(ApiError::InvalidResponse(
                    "response carried no message".to_string(),
                ))
            })?;

        Ok(ChatResponse::from_text(text, request.messages))
    }

    async fn complete_stream(&self, request: ChatRequest) -> Result<TokenStream> {
        let body = self.build_request(&request, true);
        let model = request.model.clone();
        let response = self.send_request(&body).await?;
        let byte_stream = response.bytes_stream();

        let chunk_stream = byte_stream
            .map(|result| {
                result.map_err(|e| {
                    SwitchboardError::Api(ApiError::StreamError(e.to_string()))
                })
            })
            .scan(String::new(), move |buffer, result| {
                let bytes = match result {
                    Ok(bytes) => bytes,
                    Err(e) => return futures::future::ready(Some(vec![Err(e)])),
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                let mut chunks = Vec::new();
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    *buffer = buffer[pos + 1..].to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if let Some(chunk) = parse_stream_line(&line, &model) {
                        chunks.push(Ok(chunk));
                    }
                }
                futures::future::ready(Some(chunks))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(chunk_stream))
    }
}

/// Parse one NDJSON line into a token chunk
fn parse_stream_line(line: &str, model: &str) -> Option<TokenChunk> {
    let parsed: OllamaChatResponse = serde_json::from_str(line).ok()?;
    let content = parsed.message.map(|m| m.content).unwrap_or_default();
    let finish_reason = if parsed.done {
        Some(parsed.done_reason.unwrap_or_else(|| "stop".to_string()))
    } else {
        None
    };
    Some(TokenChunk {
        id: String::new(),
        model: model.to_string(),
        content,
        role: Some("assistant".to_string()),
        finish_reason,
    })
}

// Ollama API types

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

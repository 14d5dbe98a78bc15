// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Anthropic Claude API provider implementation
//!
//! Implements the ChatProvider trait for Claude models. Anthropic offers no
//! native schema-constrained output, so structured formats fall back to
//! plain text plus client-side decoding in the normalizer.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result, SwitchboardError};
use crate::llm::message::{ContentPart, Message, Role};
use crate::llm::provider::{ChatProvider, ChatRequest, ChatResponse, TokenChunk, TokenStream};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_client(Client::new(), api_key)
    }

    /// Create with a shared HTTP client
    pub fn with_client(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    /// Create with a custom base URL
    pub fn with_base_url(
        client: Client,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    /// Convert canonical messages to Anthropic format.
    /// System messages are lifted into the top-level system field.
    fn convert_messages(&self, messages: &[Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => unreachable!("system messages are filtered"),
                };

                let blocks: Vec<AnthropicContentBlock> = m
                    .content
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => {
                            AnthropicContentBlock::Text { text: text.clone() }
                        }
                        ContentPart::Image { image } => AnthropicContentBlock::Image {
                            source: AnthropicImageSource {
                                source_type: "base64".to_string(),
                                media_type: image.media_type.clone(),
                                data: image.data.clone(),
                            },
                        },
                    })
                    .collect();

                AnthropicMessage {
                    role: role.to_string(),
                    content: blocks,
                }
            })
            .collect()
    }

    /// Build the request body
    fn build_request(&self, request: &ChatRequest, stream: bool) -> AnthropicRequest {
        AnthropicRequest {
            model: request.model.clone(),
            messages: self.convert_messages(&request.messages),
            system: request.system_text(),
            max_tokens: request.max_tokens,
            temperature: Some(request.temperature),
            stream: if stream { Some(true) } else { None },
        }
    }

    /// Extract Retry-After header value in seconds (numeric form only)
    fn extract_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
        headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
    }

    /// Parse an error response body
    fn parse_error(&self, status: u16, body: &str, retry_after: Option<u64>) -> SwitchboardError {
        if let Ok(error_response) = serde_json::from_str::<AnthropicError>(body) {
            match error_response.error.error_type.as_str() {
                "authentication_error" => {
                    SwitchboardError::Api(ApiError::AuthenticationFailed)
                }
                "rate_limit_error" => {
                    SwitchboardError::Api(ApiError::RateLimited(retry_after.unwrap_or(10) as u32))
                }
                "not_found_error" => SwitchboardError::Api(ApiError::ModelNotFound(
                    error_response.error.message,
                )),
                "invalid_request_error" => SwitchboardError::Api(ApiError::InvalidResponse(
                    error_response.error.message,
                )),
                _ => SwitchboardError::Api(ApiError::ServerError {
                    status,
                    message: error_response.error.message,
                }),
            }
        } else {
            SwitchboardError::Api(ApiError::ServerError {
                status,
                message: body.to_string(),
            })
        }
    }

    async fn send_request(&self, body: &AnthropicRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = Self::extract_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status, &body, retry_after));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = self.build_request(&request, false);
        let response = self.send_request(&body).await?;
        let api_response: AnthropicResponse = response.json().await?;

        let text = api_response
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
                AnthropicContentBlock::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(ChatResponse::from_text(text, request.messages))
    }

    async fn complete_stream(&self, request: ChatRequest) -> Result<TokenStream> {
        let body = self.build_request(&request, true);
        let response = self.send_request(&body).await?;
        let byte_stream = response.bytes_stream();

        let chunk_stream = byte_stream
            .map(|result| {
                result.map_err(|e| {
                    SwitchboardError::Api(ApiError::StreamError(e.to_string()))
                })
            })
            .scan(SseState::default(), |state, result| {
                let bytes = match result {
                    Ok(bytes) => bytes,
                    Err(e) => return futures::future::ready(Some(vec![Err(e)])),
                };
                state.buffer.push_str(&String::from_utf8_lossy(&bytes));

                let mut chunks = Vec::new();
                while let Some(pos) = state.buffer.find("\n\n") {
                    let event = state.buffer[..pos].to_string();
                    state.buffer = state.buffer[pos + 2..].to_string();
                    match parse_sse_event(&event, &mut state.id, &mut state.model) {
                        SseEvent::Chunk(chunk) => chunks.push(Ok(chunk)),
                        SseEvent::Error(message) => chunks.push(Err(SwitchboardError::Api(
                            ApiError::StreamError(message),
                        ))),
                        SseEvent::Ignore => {}
                    }
                }
                futures::future::ready(Some(chunks))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(chunk_stream))
    }
}

#[derive(Default)]
struct SseState {
    buffer: String,
    id: String,
    model: String,
}

enum SseEvent {
    Chunk(TokenChunk),
    Error(String),
    Ignore,
}

/// Parse a Server-Sent Event into a token chunk where one applies.
/// message_start primes the id/model carried on subsequent chunks.
fn parse_sse_event(event_str: &str, id: &mut String, model: &mut String) -> SseEvent {
    let mut event_type = None;
    let mut data = None;
    for line in event_str.lines() {
        if let Some(rest) = line.strip_prefix("event: ") {
            event_type = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("data: ") {
            data = Some(rest.to_string());
        }
    }
    let (Some(event_type), Some(data)) = (event_type, data) else {
        return SseEvent::Ignore;
    };

    match event_type.as_str() {
        "message_start" => {
            if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&data) {
                if let Some(msg_id) = parsed["message"]["id"].as_str() {
                    *id = msg_id.to_string();
                }
                if let Some(msg_model) = parsed["message"]["model"].as_str() {
                    *model = msg_model.to_string();
                }
            }
            SseEvent::Ignore
        }
        "content_block_delta" => {
            let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&data) else {
                return SseEvent::Ignore;
            };
            match parsed["delta"]["text"].as_str() {
                Some(text) => SseEvent::Chunk(TokenChunk {
                    id: id.clone(),
                    model: model.clone(),
                    content: text.to_string(),
                    role: Some("assistant".to_string()),
                    finish_reason: None,
                }),
                None => SseEvent::Ignore,
            }
        }
        "message_delta" => {
            let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&data) else {
                return SseEvent::Ignore;
            };
            match parsed["delta"]["stop_reason"].as_str() {
                Some(reason) => SseEvent::Chunk(TokenChunk {
                    id: id.clone(),
                    model: model.clone(),
                    content: String::new(),
                    role: None,
                    finish_reason: Some(reason.to_string()),
                }),
                None => SseEvent::Ignore,
            }
        }
        "error" => {
            let message = serde_json::from_str::<serde_json::Value>(&data)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(|s| s.to_string()))
                .unwrap_or_else(|| "unknown stream error".to_string());
            SseEvent::Error(message)
        }
        // ping, content_block_start/stop, message_stop carry no text
        _ => SseEvent::Ignore,
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    Image { source: AnthropicImageSource },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

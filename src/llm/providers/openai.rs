// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenAI chat-completions provider implementation
//!
//! Also the wire format shared by DeepSeek and generic OpenAI-compatible
//! endpoints, which wrap this adapter with a different base URL.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result, SwitchboardError};
use crate::llm::message::{ContentPart, Message, ResponseFormat, Role};
use crate::llm::provider::{ChatProvider, ChatRequest, ChatResponse, TokenChunk, TokenStream};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI chat provider
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    provider_name: String,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_client(Client::new(), api_key)
    }

    /// Create with a shared HTTP client
    pub fn with_client(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
            provider_name: "openai".to_string(),
        }
    }

    /// Create against a custom endpoint under a different provider name.
    /// Used for DeepSeek and generic OpenAI-compatible backends.
    pub fn with_base_url(
        client: Client,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
            provider_name: provider_name.into(),
        }
    }

    /// Convert canonical messages to the chat-completions shape
    fn convert_messages(&self, messages: &[Message]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };

                let content = if m.has_images() {
                    let parts = m
                        .content
                        .iter()
                        .map(|part| match part {
                            ContentPart::Text { text } => OpenAiContentPart::Text {
                                text: text.clone(),
                            },
                            ContentPart::Image { image } => OpenAiContentPart::ImageUrl {
                                image_url: OpenAiImageUrl {
                                    url: format!(
                                        "data:{};base64,{}",
                                        image.media_type, image.data
                                    ),
                                },
                            },
                        })
                        .collect();
                    OpenAiContent::Parts(parts)
                } else {
                    OpenAiContent::Text(m.text())
                };

                OpenAiMessage {
                    role: role.to_string(),
                    content,
                }
            })
            .collect()
    }

    /// Build the request body
    fn build_request(&self, request: &ChatRequest, stream: bool) -> OpenAiRequest {
        let response_format = match &request.format {
            ResponseFormat::JsonSchema(schema) => Some(serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "response",
                    "schema": schema,
                    "strict": true,
                }
            })),
            // Freeform JSON is decoded client-side; plain text needs nothing
            ResponseFormat::JsonFreeform | ResponseFormat::PlainText => None,
        };

        OpenAiRequest {
            model: request.model.clone(),
            messages: self.convert_messages(&request.messages),
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            response_format,
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
        if let Ok(error_response) = serde_json::from_str::<OpenAiError>(body) {
            let message = error_response.error.message;
            let code = error_response.error.code.as_deref().unwrap_or("");
            match (status, code) {
                (401, _) | (_, "invalid_api_key") => {
                    SwitchboardError::Api(ApiError::AuthenticationFailed)
                }
                (429, _) | (_, "rate_limit_exceeded") => {
                    SwitchboardError::Api(ApiError::RateLimited(retry_after.unwrap_or(10) as u32))
                }
                (_, "model_not_found") => {
                    SwitchboardError::Api(ApiError::ModelNotFound(message))
                }
                _ => SwitchboardError::Api(ApiError::ServerError { status, message }),
            }
        } else {
            SwitchboardError::Api(ApiError::ServerError {
                status,
                message: body.to_string(),
            })
        }
    }

    async fn send_request(&self, body: &OpenAiRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
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
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = self.build_request(&request, false);
        let response = self.send_request(&body).await?;
        let api_response: OpenAiResponse = response.json().await?;

        let text = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                SwitchboardError::Api(ApiError::InvalidResponse(
                    "response carried no choices".to_string(),
                ))
            })?;

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
            .scan(String::new(), |buffer, result| {
                let bytes = match result {
                    Ok(bytes) => bytes,
                    Err(e) => return futures::future::ready(Some(vec![Err(e)])),
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                let mut chunks = Vec::new();
                while let Some(pos) = buffer.find("\n\n") {
                    let event = buffer[..pos].to_string();
                    *buffer = buffer[pos + 2..].to_string();
                    for line in event.lines() {
                        if let Some(data) = line.strip_prefix("data: ") {
                            if data.trim() == "[DONE]" {
                                continue;
                            }
                            if let Some(chunk) = parse_stream_chunk(data) {
                                chunks.push(Ok(chunk));
                            }
                        }
                    }
                }
                futures::future::ready(Some(chunks))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(chunk_stream))
    }
}

/// Parse one SSE data payload into a token chunk
fn parse_stream_chunk(data: &str) -> Option<TokenChunk> {
    let parsed: OpenAiStreamChunk = serde_json::from_str(data).ok()?;
    let choice = parsed.choices.into_iter().next()?;
    Some(TokenChunk {
        id: parsed.id,
        model: parsed.model,
        content: choice.delta.content.unwrap_or_default(),
        role: choice.delta.role,
        finish_reason: choice.finish_reason,
    })
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: OpenAiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Debug, Serialize)]
struct OpenAiImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiDelta {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::message::{attach_image, build_messages, ImageData};

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new("test-key")
    }

    #[test]
    fn test_provider_name() {
        assert_eq!(provider().name(), "openai");
        let custom = OpenAiProvider::with_base_url(
            Client::new(),
            "k",
            "https://example.com/v1/chat/completions",
            "openai-like",
        );
        assert_eq!(custom.name(), "openai-like");
    }

    #[test]
    fn test_convert_messages_roles() {
        let messages = vec![
            Message::system("sys"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let converted = provider().convert_messages(&messages);
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[1].role, "user");
        assert_eq!(converted[2].role, "assistant");
    }

    #[test]
    fn test_convert_messages_with_image_uses_parts() {
        let mut messages = build_messages("look at this", None, vec![]).unwrap();
        attach_image(
            &mut messages,
            ImageData {
                name: "x.png".to_string(),
                media_type: "image/jpeg".to_string(),
                data: "QUJD".to_string(),
            },
        );

        let converted = provider().convert_messages(&messages);
        let json = serde_json::to_value(&converted[1]).unwrap();
        let parts = json["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(
            parts[1]["image_url"]["url"],
            "data:image/jpeg;base64,QUJD"
        );
    }

    #[test]
    fn test_convert_messages_text_only_stays_flat() {
        let messages = vec![Message::user("plain")];
        let converted = provider().convert_messages(&messages);
        let json = serde_json::to_value(&converted[0]).unwrap();
        assert_eq!(json["content"], "plain");
    }

    #[test]
    fn test_build_request_plain_text() {
        let request = ChatRequest::new("gpt-4o-mini", vec![Message::user("hi")]);
        let built = provider().build_request(&request, false);
        assert_eq!(built.model, "gpt-4o-mini");
        assert!(built.response_format.is_none());
        assert!(built.stream.is_none());
    }

    #[test]
    fn test_build_request_freeform_sends_no_response_format() {
        let request = ChatRequest::new("gpt-4o-mini", vec![Message::user("hi")])
            .with_format(ResponseFormat::JsonFreeform);
        let built = provider().build_request(&request, false);
        assert!(built.response_format.is_none());
    }

    #[test]
    fn test_build_request_schema_uses_native_structured_output() {
        let schema = serde_json::json!({"type": "object"});
        let request = ChatRequest::new("gpt-4o-mini", vec![Message::user("hi")])
            .with_format(ResponseFormat::JsonSchema(schema.clone()));
        let built = provider().build_request(&request, false);

        let rf = built.response_format.unwrap();
        assert_eq!(rf["type"], "json_schema");
        assert_eq!(rf["json_schema"]["schema"], schema);
        assert_eq!(rf["json_schema"]["strict"], true);
    }

    #[test]
    fn test_build_request_stream_flag() {
        let request = ChatRequest::new("gpt-4o-mini", vec![Message::user("hi")]);
        let built = provider().build_request(&request, true);
        assert_eq!(built.stream, Some(true));
    }

    #[test]
    fn test_parse_error_authentication() {
        let body = r#"{"error": {"message": "Invalid key", "code": "invalid_api_key"}}"#;
        let err = provider().parse_error(401, body, None);
        assert!(matches!(
            err,
            SwitchboardError::Api(ApiError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_parse_error_rate_limited_uses_retry_after() {
        let body = r#"{"error": {"message": "slow down", "code": "rate_limit_exceeded"}}"#;
        match provider().parse_error(429, body, Some(30)) {
            SwitchboardError::Api(ApiError::RateLimited(secs)) => assert_eq!(secs, 30),
            other => panic!("expected RateLimited, got {other:?}"),
        }
        match provider().parse_error(429, body, None) {
            SwitchboardError::Api(ApiError::RateLimited(secs)) => assert_eq!(secs, 10),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_model_not_found() {
        let body = r#"{"error": {"message": "no such model", "code": "model_not_found"}}"#;
        assert!(matches!(
            provider().parse_error(404, body, None),
            SwitchboardError::Api(ApiError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_parse_error_opaque_body() {
        match provider().parse_error(502, "bad gateway", None) {
            SwitchboardError::Api(ApiError::ServerError { status, message }) => {
                assert_eq!(status, 502);
                assert_eq!(message, "bad gateway");
            }
            other => panic!("expected ServerError, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_stream_chunk() {
        let data = r#"{"id":"c1","object":"chat.completion.chunk","model":"gpt-4o-mini","choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"},"finish_reason":null}]}"#;
        let chunk = parse_stream_chunk(data).unwrap();
        assert_eq!(chunk.id, "c1");
        assert_eq!(chunk.model, "gpt-4o-mini");
        assert_eq!(chunk.content, "Hel");
        assert_eq!(chunk.role.as_deref(), Some("assistant"));
        assert!(chunk.finish_reason.is_none());
    }

    #[test]
    fn test_parse_stream_chunk_finish() {
        let data = r#"{"id":"c1","model":"m","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#;
        let chunk = parse_stream_chunk(data).unwrap();
        assert!(chunk.content.is_empty());
        assert_eq!(chunk.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_parse_stream_chunk_invalid() {
        assert!(parse_stream_chunk("{not json").is_none());
        assert!(parse_stream_chunk(r#"{"id":"x","model":"m","choices":[]}"#).is_none());
    }
}

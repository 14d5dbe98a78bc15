// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Google Gemini API provider implementation
//!
//! Gemini speaks its own shape: messages are "contents" with parts lists,
//! the assistant role is called "model", and the system directive travels
//! as a separate systemInstruction. Gemini also tends to wrap JSON replies
//! in markdown fences, which this adapter strips before they reach the
//! normalizer.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result, SwitchboardError};
use crate::llm::message::{ContentPart, Message, ResponseFormat, Role};
use crate::llm::provider::{ChatProvider, ChatRequest, ChatResponse, TokenChunk, TokenStream};
use crate::normalize::strip_code_fences;

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini provider
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    /// Create a new Gemini provider
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_client(Client::new(), api_key)
    }

    /// Create with a shared HTTP client
    pub fn with_client(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: GEMINI_API_URL.to_string(),
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

    /// Convert canonical messages to Gemini contents.
    /// The assistant role maps to "model"; system messages are lifted out.
    fn convert_messages(&self, messages: &[Message]) -> Vec<GeminiContent> {
        messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                    Role::System => unreachable!("system messages are filtered"),
                };

                let parts = m
                    .content
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => GeminiPart::Text { text: text.clone() },
                        ContentPart::Image { image } => GeminiPart::InlineData {
                            inline_data: GeminiInlineData {
                                mime_type: image.media_type.clone(),
                                data: image.data.clone(),
                            },
                        },
                    })
                    .collect();

                GeminiContent {
                    role: role.to_string(),
                    parts,
                }
            })
            .collect()
    }

    /// Build the request body
    fn build_request(&self, request: &ChatRequest) -> GeminiRequest {
        let generation_config = match &request.format {
            ResponseFormat::JsonSchema(schema) => GeminiGenerationConfig {
                temperature: Some(request.temperature),
                max_output_tokens: Some(request.max_tokens),
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(schema.clone()),
            },
            // Freeform JSON is decoded client-side after fence stripping
            ResponseFormat::JsonFreeform | ResponseFormat::PlainText => GeminiGenerationConfig {
                temperature: Some(request.temperature),
                max_output_tokens: Some(request.max_tokens),
                response_mime_type: None,
                response_schema: None,
            },
        };

        GeminiRequest {
            contents: self.convert_messages(&request.messages),
            system_instruction: request.system_text().map(|text| GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart::Text { text }],
            }),
            generation_config,
        }
    }

    fn parse_error(&self, status: u16, body: &str) -> SwitchboardError {
        if let Ok(error_response) = serde_json::from_str::<GeminiError>(body) {
            let message = error_response.error.message;
            match error_response.error.status.as_deref() {
                Some("UNAUTHENTICATED") | Some("PERMISSION_DENIED") => {
                    SwitchboardError::Api(ApiError::AuthenticationFailed)
                }
                Some("RESOURCE_EXHAUSTED") => {
                    SwitchboardError::Api(ApiError::RateLimited(10))
                }
                Some("NOT_FOUND") => SwitchboardError::Api(ApiError::ModelNotFound(message)),
                _ => SwitchboardError::Api(ApiError::ServerError { status, message }),
            }
        } else {
            SwitchboardError::Api(ApiError::ServerError {
                status,
                message: body.to_string(),
            })
        }
    }

    async fn send_request(&self, url: &str, body: &GeminiRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status, &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);
        let body = self.build_request(&request);
        let response = self.send_request(&url, &body).await?;
        let api_response: GeminiResponse = response.json().await?;

        let text = api_response
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.text())
            .ok_or_else(|| {
                SwitchboardError::Api(ApiError::InvalidResponse(
                    "response carried no candidates".to_string(),
                ))
            })?;

        // Gemini wraps JSON replies in markdown fences
        let text = if request.format.is_structured() {
            strip_code_fences(&text).to_string()
        } else {
            text
        };

        Ok(ChatResponse::from_text(text, request.messages))
    }

    async fn complete_stream(&self, request: ChatRequest) -> Result<TokenStream> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, request.model
        );
        let body = self.build_request(&request);
        let model = request.model.clone();
        let response = self.send_request(&url, &body).await?;
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
                while let Some(pos) = buffer.find("\n\n") {
                    let event = buffer[..pos].to_string();
                    *buffer = buffer[pos + 2..].to_string();
                    for line in event.lines() {
                        if let Some(data) = line.strip_prefix("data: ") {
                            if let Some(chunk) = parse_stream_chunk(data, &model) {
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
fn parse_stream_chunk(data: &str, model: &str) -> Option<TokenChunk> {
    let parsed: GeminiResponse = serde_json::from_str(data).ok()?;
    let candidate = parsed.candidates.into_iter().next()?;
    Some(TokenChunk {
        id: parsed.response_id.unwrap_or_default(),
        model: model.to_string(),
        content: candidate.content.text(),
        role: Some("assistant".to_string()),
        finish_reason: candidate.finish_reason,
    })
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

impl GeminiContent {
    /// Concatenated text of all text parts
    fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                GeminiPart::Text { text } => Some(text.as_str()),
                GeminiPart::InlineData { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    response_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiContent,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Generic OpenAI-compatible provider
//!
//! For self-hosted or third-party backends that expose the chat-completions
//! wire behind a bearer token. The base URL is mandatory; everything else
//! rides on the OpenAI adapter.

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{Result, SwitchboardError};
use crate::llm::provider::{ChatProvider, ChatRequest, ChatResponse, TokenStream};
use crate::llm::providers::openai::OpenAiProvider;

/// Adapter for any endpoint speaking the OpenAI chat-completions wire
pub struct OpenAiCompatibleProvider {
    inner: OpenAiProvider,
}

impl OpenAiCompatibleProvider {
    /// Create a provider against an explicit endpoint URL
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        Self::with_client(Client::new(), base_url, api_key)
    }

    /// Create with a shared HTTP client
    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            return Err(SwitchboardError::Config(
                "openai-like provider requires a base URL".to_string(),
            ));
        }
        Ok(Self {
            inner: OpenAiProvider::with_base_url(client, api_key, base_url, "openai-like"),
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.inner.complete(request).await
    }

    async fn complete_stream(&self, request: ChatRequest) -> Result<TokenStream> {
        self.inner.complete_stream(request).await
    }
}

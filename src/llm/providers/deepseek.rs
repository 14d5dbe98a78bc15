// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! DeepSeek provider implementation
//!
//! DeepSeek speaks the OpenAI chat-completions wire at its own endpoint,
//! so this adapter delegates to the OpenAI adapter with a different base
//! URL. The reasoning model (deepseek-reasoner) rejects structured output;
//! that is enforced before dispatch by the capability table.

use async_trait::async_trait;
use reqwest::Client;

use crate::error::Result;
use crate::llm::provider::{ChatProvider, ChatRequest, ChatResponse, TokenStream};
use crate::llm::providers::openai::OpenAiProvider;

const DEEPSEEK_API_URL: &str = "https://api.deepseek.com/chat/completions";

/// DeepSeek chat provider
pub struct DeepSeekProvider {
    inner: OpenAiProvider,
}

impl DeepSeekProvider {
    /// Create a new DeepSeek provider
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_client(Client::new(), api_key)
    }

    /// Create with a shared HTTP client
    pub fn with_client(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            inner: OpenAiProvider::with_base_url(client, api_key, DEEPSEEK_API_URL, "deepseek"),
        }
    }

    /// Create against a custom endpoint
    pub fn with_base_url(
        client: Client,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            inner: OpenAiProvider::with_base_url(client, api_key, base_url, "deepseek"),
        }
    }
}

#[async_trait]
impl ChatProvider for DeepSeekProvider {
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

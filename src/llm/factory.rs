// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider factory for creating chat providers
//!
//! Adapters are selected by a static provider-name lookup. Credential
//! resolution order: explicit caller credential, then the provider's
//! environment variable, then a pre-dispatch MissingCredential failure.

use reqwest::Client;
use std::sync::Arc;

use crate::config::Settings;
use crate::error::{Result, SwitchboardError};
use crate::llm::provider::ChatProvider;
use crate::llm::providers::{
    AnthropicProvider, DeepSeekProvider, GeminiProvider, OllamaProvider,
    OpenAiCompatibleProvider, OpenAiProvider,
};

/// Factory for creating chat providers
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create a chat provider by name.
    ///
    /// `credential` is the caller-supplied API key; when absent the
    /// provider's configured key or environment variable is consulted.
    pub fn create(
        provider_name: &str,
        settings: &Settings,
        credential: Option<String>,
        client: &Client,
    ) -> Result<Arc<dyn ChatProvider>> {
        match provider_name {
            "openai" => {
                let api_key = Self::resolve_credential("openai", settings, credential)?;
                let provider = match settings.providers.openai.base_url.as_deref() {
                    Some(url) => OpenAiProvider::with_base_url(
                        client.clone(),
                        api_key,
                        url,
                        "openai",
                    ),
                    None => OpenAiProvider::with_client(client.clone(), api_key),
                };
                Ok(Arc::new(provider))
            }
            "anthropic" => {
                let api_key = Self::resolve_credential("anthropic", settings, credential)?;
                let provider = match settings.providers.anthropic.base_url.as_deref() {
                    Some(url) => AnthropicProvider::with_base_url(client.clone(), api_key, url),
                    None => AnthropicProvider::with_client(client.clone(), api_key),
                };
                Ok(Arc::new(provider))
            }
            "gemini" => {
                let api_key = Self::resolve_credential("gemini", settings, credential)?;
                let provider = match settings.providers.gemini.base_url.as_deref() {
                    Some(url) => GeminiProvider::with_base_url(client.clone(), api_key, url),
                    None => GeminiProvider::with_client(client.clone(), api_key),
                };
                Ok(Arc::new(provider))
            }
            "deepseek" => {
                let api_key = Self::resolve_credential("deepseek", settings, credential)?;
                let provider = match settings.providers.deepseek.base_url.as_deref() {
                    Some(url) => DeepSeekProvider::with_base_url(client.clone(), api_key, url),
                    None => DeepSeekProvider::with_client(client.clone(), api_key),
                };
                Ok(Arc::new(provider))
            }
            "ollama" => Ok(Arc::new(OllamaProvider::with_client(
                client.clone(),
                settings.providers.ollama.base_url.clone(),
            ))),
            "openai-like" => {
                let api_key = Self::resolve_credential("openai-like", settings, credential)?;
                let base_url = settings
                    .providers
                    .custom
                    .base_url
                    .clone()
                    .ok_or_else(|| {
                        SwitchboardError::Config(
                            "openai-like provider requires providers.custom.base_url".to_string(),
                        )
                    })?;
                Ok(Arc::new(OpenAiCompatibleProvider::with_client(
                    client.clone(),
                    base_url,
                    api_key,
                )?))
            }
            other => Err(SwitchboardError::Config(format!(
                "unknown provider '{other}'"
            ))),
        }
    }

    fn resolve_credential(
        provider_name: &str,
        settings: &Settings,
        credential: Option<String>,
    ) -> Result<String> {
        if let Some(key) = credential {
            return Ok(key);
        }
        let config = settings.provider_config(provider_name).ok_or_else(|| {
            SwitchboardError::Config(format!("unknown provider '{provider_name}'"))
        })?;
        config
            .resolve_api_key()
            .ok_or_else(|| SwitchboardError::MissingCredential {
                provider: provider_name.to_string(),
                env_var: config.api_key_env.clone(),
            })
    }

    /// List all supported provider names
    pub fn supported_providers() -> &'static [&'static str] {
        &[
            "openai",
            "anthropic",
            "gemini",
            "deepseek",
            "ollama",
            "openai-like",
        ]
    }

    /// Check if a provider has the credentials it needs
    pub fn is_configured(provider_name: &str, settings: &Settings) -> bool {
        match provider_name {
            "ollama" => true,
            other => settings
                .provider_config(other)
                .map(|c| c.resolve_api_key().is_some())
                .unwrap_or(false),
        }
    }
}

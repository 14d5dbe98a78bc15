// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for Switchboard
//!
//! Handles loading and saving settings from ~/.switchboard/settings.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// Main settings structure, stored in ~/.switchboard/settings.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Chat provider configurations
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Default settings for new calls
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Conversation storage settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Configuration for chat providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// OpenAI configuration
    #[serde(default)]
    pub openai: ProviderConfig,

    /// Anthropic Claude configuration
    #[serde(default)]
    pub anthropic: ProviderConfig,

    /// Google Gemini configuration
    #[serde(default)]
    pub gemini: ProviderConfig,

    /// DeepSeek configuration (OpenAI-compatible wire)
    #[serde(default)]
    pub deepseek: ProviderConfig,

    /// Ollama local engine configuration
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Generic OpenAI-compatible endpoint ("openai-like"); the base URL
    /// must be configured before use
    #[serde(default)]
    pub custom: ProviderConfig,
}

/// Per-provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    /// API key (if stored directly, not recommended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable name for API key; empty means no env lookup
    #[serde(default)]
    pub api_key_env: String,

    /// Default model to use
    #[serde(default)]
    pub default_model: String,

    /// Base URL for API (for custom endpoints)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    fn with_env(env: &str, model: &str) -> Self {
        Self {
            api_key: None,
            api_key_env: env.to_string(),
            default_model: model.to_string(),
            base_url: None,
        }
    }

    /// Resolve the credential: stored key first, then the environment
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }
        if self.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.api_key_env).ok()
    }
}

/// Ollama local engine configuration (no API key required)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL of the local server
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Default model to use
    #[serde(default = "default_ollama_model")]
    pub default_model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            default_model: default_ollama_model(),
        }
    }
}

/// Default settings for new calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default provider to use
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Default model when none is requested
    #[serde(default = "default_model")]
    pub model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens for a response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Conversation storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the conversation database
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Root directory for persisted attachments (segregated by media kind)
    #[serde(default = "default_attachment_dir")]
    pub attachment_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            attachment_dir: default_attachment_dir(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: ProviderConfig::with_env("OPENAI_API_KEY", "gpt-4o-mini"),
            anthropic: ProviderConfig::with_env("ANTHROPIC_API_KEY", "claude-3-5-haiku-20241022"),
            gemini: ProviderConfig::with_env("GEMINI_API_KEY", "gemini-2.0-flash-lite"),
            deepseek: ProviderConfig::with_env("DEEPSEEK_API_KEY", "deepseek-chat"),
            ollama: OllamaConfig::default(),
            custom: ProviderConfig::with_env("CUSTOM_API_KEY", ""),
        }
    }
}

impl Settings {
    /// Get the Switchboard home directory (~/.switchboard)
    pub fn switchboard_home() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".switchboard")
    }

    /// Path to the settings file
    pub fn settings_path() -> PathBuf {
        Self::switchboard_home().join("settings.toml")
    }

    /// Load settings from disk; a missing file yields defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::settings_path())
    }

    /// Load settings from an explicit path
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::settings_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Per-provider config lookup by name
    pub fn provider_config(&self, provider: &str) -> Option<&ProviderConfig> {
        match provider {
            "openai" => Some(&self.providers.openai),
            "anthropic" => Some(&self.providers.anthropic),
            "gemini" => Some(&self.providers.gemini),
            "deepseek" => Some(&self.providers.deepseek),
            "openai-like" => Some(&self.providers.custom),
            _ => None,
        }
    }

    /// Default model for a provider, falling back to the global default
    pub fn default_model_for(&self, provider: &str) -> String {
        match provider {
            "ollama" => self.providers.ollama.default_model.clone(),
            other => self
                .provider_config(other)
                .map(|c| c.default_model.clone())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| self.defaults.model.clone()),
        }
    }
}

// Default value functions

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.2".to_string()
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_db_path() -> PathBuf {
    Settings::switchboard_home().join("conversations.db")
}

fn default_attachment_dir() -> PathBuf {
    Settings::switchboard_home()
}

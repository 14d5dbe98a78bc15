// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Canonical call interface
//!
//! One `Gateway` instance holds the process-wide context (HTTP client,
//! conversation store, settings) and is injected into callers; nothing in
//! the crate reaches for globals. Pre-dispatch checks run in a fixed
//! order: format capability first, then input validation, then credential
//! resolution, so an unsupported format never costs a network call.

use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::attachments::{load_image, persist_file, MediaKind};
use crate::config::Settings;
use crate::error::{Result, SwitchboardError};
use crate::llm::factory::ProviderFactory;
use crate::llm::message::{attach_image, build_messages, Message, ResponseFormat, Role};
use crate::llm::provider::{
    ensure_format_supported, ChatProvider, ChatRequest, ChatResponse, TokenStream,
};
use crate::normalize::normalize;
use crate::relay::{FrameSink, RelayOutcome, StreamRelay};
use crate::store::{ConversationStore, StoredMessage};

/// A one-shot generation request
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    /// Prompt text for the new user turn
    pub prompt: String,
    /// Provider name; settings default when absent
    pub provider: Option<String>,
    /// Model id; provider default when absent
    pub model: Option<String>,
    /// System directive (a persona's primary directive)
    pub system: Option<String>,
    /// Image files to attach to the last message
    pub images: Vec<PathBuf>,
    /// Requested response format
    pub format: ResponseFormat,
    /// Prior turns; the prompt is appended as a new user turn
    pub messages: Vec<Message>,
    /// Explicit API key overriding configuration and environment
    pub credential: Option<String>,
}

impl GenerateRequest {
    /// Create a request for the given prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set the provider name
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Set the model id
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the system directive
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Attach an image file
    pub fn with_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.images.push(path.into());
        self
    }

    /// Set the response format
    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    /// Seed the conversation history
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Supply an explicit credential
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }
}

/// A streaming turn against a stored conversation
#[derive(Debug, Clone, Default)]
pub struct StreamTurn {
    /// Conversation to read history from and persist into
    pub conversation_id: String,
    /// Prompt text for the new user turn
    pub prompt: String,
    /// Provider name; settings default when absent
    pub provider: Option<String>,
    /// Model id; provider default when absent
    pub model: Option<String>,
    /// System directive for a fresh conversation
    pub system: Option<String>,
    /// Files to attach to the user turn
    pub attachments: Vec<PathBuf>,
    /// Caller's working directory, recorded on the stored rows
    pub directory: Option<String>,
    /// Persona label recorded on the stored rows
    pub npc: Option<String>,
    /// Explicit API key overriding configuration and environment
    pub credential: Option<String>,
}

impl StreamTurn {
    /// Create a turn for the given conversation and prompt
    pub fn new(conversation_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set the provider name
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Set the model id
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Attach a file
    pub fn with_attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachments.push(path.into());
        self
    }

    /// Record the caller's working directory
    pub fn with_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Record the persona label
    pub fn with_npc(mut self, npc: impl Into<String>) -> Self {
        self.npc = Some(npc.into());
        self
    }
}

/// Process-wide context for servicing chat calls
pub struct Gateway {
    client: Client,
    store: Arc<ConversationStore>,
    settings: Settings,
}

impl Gateway {
    /// Build a gateway, opening the conversation store from settings
    pub fn new(settings: Settings) -> Result<Self> {
        let store = Arc::new(ConversationStore::open(&settings.storage.db_path)?);
        Ok(Self::with_store(settings, store))
    }

    /// Build a gateway around an existing store
    pub fn with_store(settings: Settings, store: Arc<ConversationStore>) -> Self {
        Self {
            client: Client::new(),
            store,
            settings,
        }
    }

    /// The conversation store
    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// The active settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn resolve_provider_name(&self, requested: Option<&str>) -> String {
        requested
            .map(|s| s.to_string())
            .unwrap_or_else(|| self.settings.defaults.provider.clone())
    }

    fn resolve_model(&self, requested: Option<&str>, provider_name: &str) -> String {
        requested
            .map(|s| s.to_string())
            .unwrap_or_else(|| self.settings.default_model_for(provider_name))
    }

    fn provider_for(
        &self,
        provider_name: &str,
        credential: Option<String>,
    ) -> Result<Arc<dyn ChatProvider>> {
        ProviderFactory::create(provider_name, &self.settings, credential, &self.client)
    }

    /// Attach image files to the last message. Unreadable paths fail the
    /// call; undecodable images are dropped with a warning.
    fn attach_images(&self, messages: &mut [Message], images: &[PathBuf]) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        for path in images {
            match load_image(path) {
                Ok(data) => attach_image(messages, data),
                Err(SwitchboardError::AttachmentDecode(detail)) => {
                    warn!(path = %path.display(), %detail, "dropping undecodable image");
                    warnings.push(format!(
                        "attachment '{}' dropped: {detail}",
                        path.display()
                    ));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(warnings)
    }

    /// Service one canonical request and return the canonical result
    pub async fn generate(&self, request: GenerateRequest) -> Result<ChatResponse> {
        let provider_name = self.resolve_provider_name(request.provider.as_deref());
        let model = self.resolve_model(request.model.as_deref(), &provider_name);

        // Capability table first: an unsupported format never dispatches
        ensure_format_supported(&model, &request.format)?;

        let mut messages =
            build_messages(&request.prompt, request.system.as_deref(), request.messages)?;
        let warnings = self.attach_images(&mut messages, &request.images)?;

        let provider = self.provider_for(&provider_name, request.credential)?;
        debug!(provider = %provider_name, %model, "dispatching completion");

        let chat_request = ChatRequest::new(model.as_str(), messages)
            .with_format(request.format.clone())
            .with_temperature(self.settings.defaults.temperature)
            .with_max_tokens(self.settings.defaults.max_tokens);

        let mut response = provider.complete(chat_request).await?;

        let raw = response.text().unwrap_or_default().to_string();
        response.content = normalize(&raw, &request.format)?;
        response.warnings.extend(warnings);
        Ok(response)
    }

    /// Service one canonical request as a lazy token stream
    pub async fn generate_stream(&self, request: GenerateRequest) -> Result<TokenStream> {
        let provider_name = self.resolve_provider_name(request.provider.as_deref());
        let model = self.resolve_model(request.model.as_deref(), &provider_name);

        ensure_format_supported(&model, &request.format)?;

        let mut messages =
            build_messages(&request.prompt, request.system.as_deref(), request.messages)?;
        self.attach_images(&mut messages, &request.images)?;

        let provider = self.provider_for(&provider_name, request.credential)?;
        debug!(provider = %provider_name, %model, "dispatching stream");

        let chat_request = ChatRequest::new(model.as_str(), messages)
            .with_format(request.format)
            .with_temperature(self.settings.defaults.temperature)
            .with_max_tokens(self.settings.defaults.max_tokens);

        provider.complete_stream(chat_request).await
    }

    /// Run one streaming turn against a stored conversation: persist the
    /// user message (with attachments), open the backend stream, then
    /// relay frames to the sink while committing each increment.
    pub async fn run_streaming_turn<S: FrameSink + ?Sized>(
        &self,
        turn: StreamTurn,
        sink: &mut S,
    ) -> Result<RelayOutcome> {
        let provider_name = self.resolve_provider_name(turn.provider.as_deref());
        let model = self.resolve_model(turn.model.as_deref(), &provider_name);

        let history: Vec<Message> = self
            .store
            .list(&turn.conversation_id)?
            .into_iter()
            .map(|row| Message {
                role: row.role,
                content: vec![crate::llm::message::ContentPart::Text { text: row.content }],
            })
            .collect();

        let mut messages = build_messages(&turn.prompt, turn.system.as_deref(), history)?;

        // Stage attachments: every file is persisted and recorded under the
        // user message; images additionally ride inline on the last turn.
        let mut staged: Vec<(String, MediaKind, Vec<u8>)> = Vec::new();
        let mut warnings = Vec::new();
        for path in &turn.attachments {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "attachment".to_string());
            let kind = MediaKind::classify(&name);
            let bytes = std::fs::read(path).map_err(|e| {
                SwitchboardError::InvalidInput(format!(
                    "cannot read attachment '{}': {e}",
                    path.display()
                ))
            })?;

            if kind == MediaKind::Image {
                match load_image(path) {
                    Ok(data) => attach_image(&mut messages, data),
                    Err(SwitchboardError::AttachmentDecode(detail)) => {
                        warn!(path = %path.display(), %detail, "dropping undecodable image");
                        warnings.push(format!("attachment '{name}' dropped: {detail}"));
                    }
                    Err(e) => return Err(e),
                }
            }

            persist_file(
                &self.settings.storage.attachment_dir,
                kind.dir_name(),
                &name,
                &bytes,
            )?;
            staged.push((name, kind, bytes));
        }

        // Persist the user turn with its attachments
        let user_message_id = self.store.generate_message_id();
        let mut user_row = StoredMessage::new(
            &user_message_id,
            &turn.conversation_id,
            Role::User,
            &turn.prompt,
        )
        .with_model(&model)
        .with_provider(&provider_name);
        if let Some(ref npc) = turn.npc {
            user_row = user_row.with_npc(npc);
        }
        if let Some(ref dir) = turn.directory {
            user_row = user_row.with_directory(dir);
        }
        self.store.append(&user_row)?;
        for (name, kind, bytes) in &staged {
            self.store
                .add_attachment(&user_message_id, name, *kind, bytes)?;
        }

        // Open the backend stream before allocating the assistant row, so
        // a failed dispatch leaves no empty assistant turn behind
        let provider = self.provider_for(&provider_name, turn.credential)?;
        debug!(provider = %provider_name, %model, conversation = %turn.conversation_id, "opening stream");
        let chat_request = ChatRequest::new(model.as_str(), messages)
            .with_temperature(self.settings.defaults.temperature)
            .with_max_tokens(self.settings.defaults.max_tokens);
        let stream = provider.complete_stream(chat_request).await?;

        // The assistant message id is allocated here and owned exclusively
        // by this relay for the lifetime of the stream
        let assistant_message_id = self.store.generate_message_id();
        let mut assistant_row = StoredMessage::new(
            &assistant_message_id,
            &turn.conversation_id,
            Role::Assistant,
            "",
        )
        .with_model(&model)
        .with_provider(&provider_name);
        if let Some(ref npc) = turn.npc {
            assistant_row = assistant_row.with_npc(npc);
        }
        if let Some(ref dir) = turn.directory {
            assistant_row = assistant_row.with_directory(dir);
        }
        self.store.append(&assistant_row)?;

        let relay = StreamRelay::new(&assistant_message_id);
        relay.run(stream, sink, &self.store).await
    }
}

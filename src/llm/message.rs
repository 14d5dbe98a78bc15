// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Canonical message types for chat calls
//!
//! Every component outside a provider adapter works with these shapes;
//! vendor wire formats exist only inside the adapters.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SwitchboardError};

/// System directive used when no persona supplies one
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Role of the message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System directive
    System,
    /// User message
    User,
    /// Assistant response
    Assistant,
}

impl Role {
    /// Parse a stored role string back into the enum
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// An inline image attachment, compressed and base64-encoded
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageData {
    /// Original file name
    pub name: String,
    /// Media type after recompression ("image/jpeg")
    pub media_type: String,
    /// Base64-encoded payload
    pub data: String,
}

/// One part of a message's content
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content
    Text { text: String },
    /// Inline image content
    Image { image: ImageData },
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Role of the sender
    pub role: Role,

    /// Ordered content parts
    pub content: Vec<ContentPart>,
}

impl Message {
    /// Create a new system message
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// Create a new user message
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// Create a new assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// Append a content part
    pub fn push_part(&mut self, part: ContentPart) {
        self.content.push(part);
    }

    /// All text parts joined together
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Image parts of this message
    pub fn images(&self) -> Vec<&ImageData> {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Image { image } => Some(image),
                ContentPart::Text { .. } => None,
            })
            .collect()
    }

    /// Whether this message carries any image part
    pub fn has_images(&self) -> bool {
        self.content
            .iter()
            .any(|p| matches!(p, ContentPart::Image { .. }))
    }
}

/// How the caller wants the response interpreted
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    /// Raw text, no validation
    #[default]
    PlainText,
    /// Valid JSON of any shape
    JsonFreeform,
    /// Valid JSON conforming to the given JSON Schema
    JsonSchema(serde_json::Value),
}

impl ResponseFormat {
    /// Whether this format constrains the output to JSON
    pub fn is_structured(&self) -> bool {
        !matches!(self, ResponseFormat::PlainText)
    }

    /// The schema, when one was requested
    pub fn schema(&self) -> Option<&serde_json::Value> {
        match self {
            ResponseFormat::JsonSchema(schema) => Some(schema),
            _ => None,
        }
    }
}

/// Assemble the message sequence for a call.
///
/// Empty history seeds a two-message sequence (system directive + user
/// prompt); non-empty history gets the prompt appended as a new user turn.
pub fn build_messages(
    prompt: &str,
    system: Option<&str>,
    history: Vec<Message>,
) -> Result<Vec<Message>> {
    if prompt.trim().is_empty() {
        return Err(SwitchboardError::InvalidInput(
            "prompt must not be empty".to_string(),
        ));
    }

    let mut messages = history;
    if messages.is_empty() {
        messages.push(Message::system(
            system.unwrap_or(DEFAULT_SYSTEM_PROMPT),
        ));
    }
    messages.push(Message::user(prompt));
    Ok(messages)
}

/// Attach an image as an extra part on the last message.
///
/// Images never create a new message of their own.
pub fn attach_image(messages: &mut [Message], image: ImageData) {
    if let Some(last) = messages.last_mut() {
        last.push_part(ContentPart::Image { image });
    }
}

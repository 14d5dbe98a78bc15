// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Streaming relay
//!
//! Wraps a provider's token stream, mirrors each chunk to the client as a
//! wire frame, and persists the growing message so a dropped connection or
//! a restart never loses or duplicates text. Each persistence step is an
//! idempotent overwrite of the full accumulated text, so the store always
//! holds the longest prefix successfully flushed.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SwitchboardError};
use crate::llm::provider::{TokenChunk, TokenStream};
use crate::store::ConversationStore;

/// One newline-delimited JSON frame on the client push channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireFrame {
    /// Mirrors one upstream token chunk
    Content {
        id: String,
        model: String,
        choices: Vec<FrameChoice>,
    },
    /// Terminal sentinel; its absence means the stream aborted
    MessageStop,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameChoice {
    pub index: usize,
    pub delta: FrameDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameDelta {
    pub content: Option<String>,
    pub role: Option<String>,
}

impl WireFrame {
    /// Build a content frame mirroring an upstream chunk
    pub fn content(chunk: &TokenChunk) -> Self {
        WireFrame::Content {
            id: chunk.id.clone(),
            model: chunk.model.clone(),
            choices: vec![FrameChoice {
                index: 0,
                delta: FrameDelta {
                    content: if chunk.content.is_empty() {
                        None
                    } else {
                        Some(chunk.content.clone())
                    },
                    role: chunk.role.clone(),
                },
                finish_reason: chunk.finish_reason.clone(),
            }],
        }
    }

    /// Serialize to one newline-delimited JSON line
    pub fn to_ndjson(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// The client push channel went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Destination for wire frames. The excluded HTTP layer adapts this to its
/// server-push channel; tests collect frames in memory.
#[async_trait]
pub trait FrameSink: Send {
    /// Push one frame; an error means the client is gone
    async fn send(&mut self, frame: WireFrame) -> std::result::Result<(), SinkClosed>;
}

#[async_trait]
impl FrameSink for tokio::sync::mpsc::Sender<WireFrame> {
    async fn send(&mut self, frame: WireFrame) -> std::result::Result<(), SinkClosed> {
        tokio::sync::mpsc::Sender::send(self, frame)
            .await
            .map_err(|_| SinkClosed)
    }
}

/// Lifecycle of one in-flight streaming call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Opened,
    Relaying,
    Completed,
    Aborted,
}

/// Result of driving a relay to its terminal state
#[derive(Debug)]
pub struct RelayOutcome {
    /// The message id the stream wrote to
    pub message_id: String,
    /// Completed or Aborted
    pub state: RelayState,
    /// Full accumulated text (partial on abort, still valid history)
    pub content: String,
    /// Upstream error when the relay aborted because of one
    pub error: Option<SwitchboardError>,
}

/// Relay for one streaming call.
///
/// The message id is allocated once before the relay starts and is the
/// stream's exclusive write handle for its whole lifetime.
pub struct StreamRelay {
    message_id: String,
    accumulator: String,
    state: RelayState,
}

impl StreamRelay {
    /// Open a relay writing to the given message id
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            accumulator: String::new(),
            state: RelayState::Opened,
        }
    }

    /// Current state
    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Drive the upstream stream to completion.
    ///
    /// Per chunk: accumulate, push a frame, persist the full text so far.
    /// A closed sink stops upstream consumption (no further backend tokens
    /// are paid for) and leaves the partial accumulation persisted.
    pub async fn run<S: FrameSink + ?Sized>(
        mut self,
        mut stream: TokenStream,
        sink: &mut S,
        store: &ConversationStore,
    ) -> Result<RelayOutcome> {
        let mut upstream_error = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    self.state = RelayState::Relaying;
                    self.accumulator.push_str(&chunk.content);

                    if sink.send(WireFrame::content(&chunk)).await.is_err() {
                        debug!(message_id = %self.message_id, "client disconnected, aborting relay");
                        self.state = RelayState::Aborted;
                        break;
                    }

                    store.update_content(&self.message_id, &self.accumulator)?;
                }
                Err(e) => {
                    warn!(message_id = %self.message_id, error = %e, "upstream stream failed");
                    self.state = RelayState::Aborted;
                    upstream_error = Some(e);
                    break;
                }
            }
        }

        if self.state != RelayState::Aborted {
            if sink.send(WireFrame::MessageStop).await.is_err() {
                // The client missed the sentinel; to them this is an abort,
                // though the full content is persisted.
                self.state = RelayState::Aborted;
            } else {
                self.state = RelayState::Completed;
            }
            self.reconcile(store)?;
        }

        Ok(RelayOutcome {
            message_id: self.message_id,
            state: self.state,
            content: self.accumulator,
            error: upstream_error,
        })
    }

    /// Guarantee the stored content equals the accumulator exactly
    fn reconcile(&self, store: &ConversationStore) -> Result<()> {
        store.update_content(&self.message_id, &self.accumulator)?;
        if let Some(row) = store.get(&self.message_id)? {
            if row.content != self.accumulator {
                warn!(
                    message_id = %self.message_id,
                    "stored content diverged from accumulator after reconcile"
                );
            }
        }
        Ok(())
    }
}

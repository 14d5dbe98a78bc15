// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Switchboard - multi-provider chat gateway with streaming persistence.
//!
//! One canonical request - text, optional images, optional structured
//! output, optional running conversation - serviced by any of several
//! independently-shaped chat backends behind a uniform result shape.
//!
//! Architecture highlights:
//! - `llm`: canonical message model and provider adapters (OpenAI,
//!   Anthropic, Gemini, DeepSeek, Ollama, generic OpenAI-compatible)
//! - `relay`: streaming relay mirroring token chunks to the client while
//!   committing each increment to durable storage
//! - `store`: append-only SQLite conversation ledger with attachments
//! - `attachments`: media classification and inline image preparation
//! - `normalize`: structured-output decoding and schema validation
//! - `gateway`: the canonical call interface wiring it all together

pub mod attachments;
pub mod config;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod normalize;
pub mod relay;
pub mod store;

pub use error::{Result, SwitchboardError};
pub use gateway::{Gateway, GenerateRequest, StreamTurn};

/// Initialize tracing for embedding binaries. `RUST_LOG` takes precedence
/// over the warn-level default.
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversation storage
//!
//! Append-only message ledger backed by SQLite, queryable by conversation,
//! with attachment linkage. Streaming writers overwrite the full content of
//! their own message id; rows are never rewritten by anyone else.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use crate::attachments::MediaKind;
use crate::error::{Result, SwitchboardError};
use crate::llm::message::Role;

/// Parse a DateTime from a stored RFC3339 string, converting errors to
/// rusqlite errors so they surface through query_map
fn parse_datetime_from_db(
    timestamp: &str,
    column: usize,
) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn parse_role_from_db(role: &str, column: usize) -> std::result::Result<Role, rusqlite::Error> {
    Role::parse(role).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            format!("unknown role '{role}'").into(),
        )
    })
}

/// A durable message row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Identity of the logical message; reused across streaming updates
    pub message_id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// Role of the sender
    pub role: Role,
    /// Message text; grows during streaming
    pub content: String,
    /// Insertion timestamp
    pub timestamp: DateTime<Utc>,
    /// Model that produced or received the message
    pub model: Option<String>,
    /// Provider that serviced the call
    pub provider: Option<String>,
    /// Persona label active for the turn
    pub npc: Option<String>,
    /// Working directory of the caller
    pub directory_path: Option<String>,
}

impl StoredMessage {
    /// Create a new record stamped now
    pub fn new(
        message_id: impl Into<String>,
        conversation_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            model: None,
            provider: None,
            npc: None,
            directory_path: None,
        }
    }

    /// Set the model label
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the provider label
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Set the persona label
    pub fn with_npc(mut self, npc: impl Into<String>) -> Self {
        self.npc = Some(npc.into());
        self
    }

    /// Set the caller's working directory
    pub fn with_directory(mut self, dir: impl Into<String>) -> Self {
        self.directory_path = Some(dir.into());
        self
    }
}

/// A stored attachment, owned by its message
#[derive(Debug, Clone)]
pub struct Attachment {
    pub id: i64,
    pub message_id: String,
    pub name: String,
    pub kind: MediaKind,
    pub data: Vec<u8>,
    pub size: u64,
}

/// Summary row for conversation listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub started_at: DateTime<Utc>,
    pub preview: String,
}

/// SQLite-backed conversation store.
///
/// The connection is guarded by a mutex held only across individual
/// statements, so concurrent appends from different conversations and
/// concurrent content updates to different message ids do not interfere.
pub struct ConversationStore {
    conn: Mutex<Connection>,
}

impl ConversationStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory store (tests)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS conversation_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL UNIQUE,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                model TEXT,
                provider TEXT,
                npc TEXT,
                directory_path TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_conversation
                ON conversation_history(conversation_id);

            CREATE TABLE IF NOT EXISTS message_attachments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL
                    REFERENCES conversation_history(message_id)
                    ON DELETE CASCADE,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                data BLOB,
                size INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_attachment_message
                ON message_attachments(message_id);",
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means another thread panicked mid-statement;
        // the connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate a fresh message id, unique per call
    pub fn generate_message_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Append a message row
    pub fn append(&self, message: &StoredMessage) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO conversation_history
             (message_id, conversation_id, role, content, timestamp,
              model, provider, npc, directory_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.message_id,
                message.conversation_id,
                message.role.to_string(),
                message.content,
                message.timestamp.to_rfc3339(),
                message.model,
                message.provider,
                message.npc,
                message.directory_path,
            ],
        )?;
        Ok(())
    }

    /// Overwrite the full content of an existing message.
    ///
    /// Safe to call repeatedly with monotonically-growing text for the same
    /// message id: last write wins, identity and ordering are preserved.
    pub fn update_content(&self, message_id: &str, full_text: &str) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE conversation_history SET content = ?2 WHERE message_id = ?1",
            params![message_id, full_text],
        )?;
        if updated == 0 {
            return Err(SwitchboardError::Storage(format!(
                "no message with id '{message_id}'"
            )));
        }
        Ok(())
    }

    /// Fetch one message by id
    pub fn get(&self, message_id: &str) -> Result<Option<StoredMessage>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT message_id, conversation_id, role, content, timestamp,
                    model, provider, npc, directory_path
             FROM conversation_history WHERE message_id = ?1",
        )?;
        let message = stmt
            .query_row(params![message_id], Self::row_to_message)
            .ok();
        Ok(message)
    }

    /// All messages of a conversation in insertion order
    /// (timestamp, with the rowid as tie-break)
    pub fn list(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT message_id, conversation_id, role, content, timestamp,
                    model, provider, npc, directory_path
             FROM conversation_history
             WHERE conversation_id = ?1
             ORDER BY timestamp ASC, id ASC",
        )?;
        let messages = stmt
            .query_map(params![conversation_id], Self::row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    fn row_to_message(
        row: &rusqlite::Row<'_>,
    ) -> std::result::Result<StoredMessage, rusqlite::Error> {
        let role: String = row.get(2)?;
        let timestamp: String = row.get(4)?;
        Ok(StoredMessage {
            message_id: row.get(0)?,
            conversation_id: row.get(1)?,
            role: parse_role_from_db(&role, 2)?,
            content: row.get(3)?,
            timestamp: parse_datetime_from_db(&timestamp, 4)?,
            model: row.get(5)?,
            provider: row.get(6)?,
            npc: row.get(7)?,
            directory_path: row.get(8)?,
        })
    }

    /// Record an attachment under its owning message
    pub fn add_attachment(
        &self,
        message_id: &str,
        name: &str,
        kind: MediaKind,
        data: &[u8],
    ) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO message_attachments (message_id, name, kind, data, size)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![message_id, name, kind.dir_name(), data, data.len() as i64],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All attachments owned by a message
    pub fn attachments_for(&self, message_id: &str) -> Result<Vec<Attachment>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, message_id, name, kind, data, size
             FROM message_attachments WHERE message_id = ?1 ORDER BY id ASC",
        )?;
        let attachments = stmt
            .query_map(params![message_id], |row| {
                let kind: String = row.get(3)?;
                let data: Option<Vec<u8>> = row.get(4)?;
                let size: i64 = row.get(5)?;
                Ok(Attachment {
                    id: row.get(0)?,
                    message_id: row.get(1)?,
                    name: row.get(2)?,
                    kind: MediaKind::parse(&kind),
                    data: data.unwrap_or_default(),
                    size: size as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(attachments)
    }

    /// Conversation summaries, newest first, optionally scoped to a
    /// working directory
    pub fn conversations(&self, directory: Option<&str>) -> Result<Vec<ConversationSummary>> {
        let conn = self.lock();
        let sql = "SELECT conversation_id,
                          MIN(timestamp) AS start_time,
                          GROUP_CONCAT(content, ' ') AS preview
                   FROM conversation_history
                   WHERE (?1 IS NULL OR directory_path = ?1)
                   GROUP BY conversation_id
                   ORDER BY start_time DESC";
        let mut stmt = conn.prepare(sql)?;
        let summaries = stmt
            .query_map(params![directory], |row| {
                let start: String = row.get(1)?;
                let preview: Option<String> = row.get(2)?;
                let mut preview = preview.unwrap_or_default();
                if preview.len() > 100 {
                    preview = preview
                        .char_indices()
                        .take_while(|(i, _)| *i < 100)
                        .map(|(_, c)| c)
                        .collect::<String>()
                        + "...";
                }
                Ok(ConversationSummary {
                    conversation_id: row.get(0)?,
                    started_at: parse_datetime_from_db(&start, 1)?,
                    preview,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        ConversationStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_generate_message_id_unique() {
        let store = store();
        let a = store.generate_message_id();
        let b = store.generate_message_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_append_and_list_in_order() {
        let store = store();
        for i in 0..5 {
            let id = store.generate_message_id();
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store
                .append(&StoredMessage::new(id, "conv-1", role, format!("msg {i}")))
                .unwrap();
        }

        let messages = store.list("conv-1").unwrap();
        assert_eq!(messages.len(), 5);
        for (i, msg) in messages.iter().enumerate() {
            assert_eq!(msg.content, format!("msg {i}"));
        }
    }

    #[test]
    fn test_list_scoped_to_conversation() {
        let store = store();
        store
            .append(&StoredMessage::new("m1", "conv-a", Role::User, "a"))
            .unwrap();
        store
            .append(&StoredMessage::new("m2", "conv-b", Role::User, "b"))
            .unwrap();

        let a = store.list("conv-a").unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].content, "a");
        assert!(store.list("conv-missing").unwrap().is_empty());
    }

    #[test]
    fn test_update_content_idempotent_overwrite() {
        let store = store();
        let id = store.generate_message_id();
        store
            .append(&StoredMessage::new(&id, "conv-1", Role::Assistant, ""))
            .unwrap();

        store.update_content(&id, "X").unwrap();
        store.update_content(&id, "XY").unwrap();
        // Repeating the same write is harmless
        store.update_content(&id, "XY").unwrap();

        let messages = store.list("conv-1").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "XY");
        assert_eq!(messages[0].message_id, id);
    }

    #[test]
    fn test_update_content_unknown_id_fails() {
        let store = store();
        let err = store.update_content("missing", "text").unwrap_err();
        assert!(matches!(err, SwitchboardError::Storage(_)));
    }

    #[test]
    fn test_append_duplicate_message_id_rejected() {
        let store = store();
        let msg = StoredMessage::new("dup", "conv-1", Role::User, "first");
        store.append(&msg).unwrap();
        assert!(store.append(&msg).is_err());
    }

    #[test]
    fn test_get_message() {
        let store = store();
        let msg = StoredMessage::new("m1", "conv-1", Role::User, "hello")
            .with_model("gpt-4o-mini")
            .with_provider("openai")
            .with_npc("sibiji")
            .with_directory("/tmp/project");
        store.append(&msg).unwrap();

        let fetched = store.get("m1").unwrap().unwrap();
        assert_eq!(fetched.content, "hello");
        assert_eq!(fetched.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(fetched.provider.as_deref(), Some("openai"));
        assert_eq!(fetched.npc.as_deref(), Some("sibiji"));
        assert_eq!(fetched.directory_path.as_deref(), Some("/tmp/project"));

        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_attachments_roundtrip() {
        let store = store();
        store
            .append(&StoredMessage::new("m1", "conv-1", Role::User, "see attached"))
            .unwrap();

        store
            .add_attachment("m1", "photo.png", MediaKind::Image, b"fakebytes")
            .unwrap();
        store
            .add_attachment("m1", "weird.xyz", MediaKind::Other, b"123")
            .unwrap();

        let attachments = store.attachments_for("m1").unwrap();
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].name, "photo.png");
        assert_eq!(attachments[0].kind, MediaKind::Image);
        assert_eq!(attachments[0].size, 9);
        // Unknown extension classifies as other and still keeps size metadata
        assert_eq!(attachments[1].kind, MediaKind::Other);
        assert_eq!(attachments[1].size, 3);
    }

    #[test]
    fn test_attachment_requires_owner() {
        let store = store();
        let result = store.add_attachment("ghost", "a.png", MediaKind::Image, b"x");
        assert!(result.is_err());
    }

    #[test]
    fn test_attachments_for_empty() {
        let store = store();
        store
            .append(&StoredMessage::new("m1", "conv-1", Role::User, "plain"))
            .unwrap();
        assert!(store.attachments_for("m1").unwrap().is_empty());
    }

    #[test]
    fn test_conversations_summaries() {
        let store = store();
        store
            .append(
                &StoredMessage::new("m1", "conv-a", Role::User, "first question")
                    .with_directory("/proj"),
            )
            .unwrap();
        store
            .append(
                &StoredMessage::new("m2", "conv-b", Role::User, "other topic")
                    .with_directory("/elsewhere"),
            )
            .unwrap();

        let all = store.conversations(None).unwrap();
        assert_eq!(all.len(), 2);

        let scoped = store.conversations(Some("/proj")).unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].conversation_id, "conv-a");
        assert!(scoped[0].preview.contains("first question"));
    }

    #[test]
    fn test_conversations_preview_truncated() {
        let store = store();
        store
            .append(&StoredMessage::new(
                "m1",
                "conv-a",
                Role::User,
                "x".repeat(300),
            ))
            .unwrap();

        let all = store.conversations(None).unwrap();
        assert!(all[0].preview.len() <= 104);
        assert!(all[0].preview.ends_with("..."));
    }

    #[test]
    fn test_concurrent_appends_different_conversations() {
        use std::sync::Arc;

        let store = Arc::new(ConversationStore::open_in_memory().unwrap());
        let mut handles = Vec::new();
        for t in 0..4 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for i in 0..10 {
                    let id = store.generate_message_id();
                    store
                        .append(&StoredMessage::new(
                            id,
                            format!("conv-{t}"),
                            Role::User,
                            format!("msg {i}"),
                        ))
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for t in 0..4 {
            assert_eq!(store.list(&format!("conv-{t}")).unwrap().len(), 10);
        }
    }

    #[test]
    fn test_concurrent_updates_different_message_ids() {
        use std::sync::Arc;

        let store = Arc::new(ConversationStore::open_in_memory().unwrap());
        let ids: Vec<String> = (0..4).map(|_| store.generate_message_id()).collect();
        for id in &ids {
            store
                .append(&StoredMessage::new(id, "conv-1", Role::Assistant, ""))
                .unwrap();
        }

        let mut handles = Vec::new();
        for id in ids.clone() {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                let mut text = String::new();
                for i in 0..20 {
                    text.push_str(&format!("{i} "));
                    store.update_content(&id, &text).unwrap();
                }
                text
            }));
        }

        let finals: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for (id, expected) in ids.iter().zip(finals) {
            assert_eq!(store.get(id).unwrap().unwrap().content, expected);
        }
    }

    #[test]
    fn test_persisted_to_disk() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("conv.db");
        {
            let store = ConversationStore::open(&path).unwrap();
            store
                .append(&StoredMessage::new("m1", "conv-1", Role::User, "durable"))
                .unwrap();
        }
        let reopened = ConversationStore::open(&path).unwrap();
        let messages = reopened.list("conv-1").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "durable");
    }
}

//! SQLite persistence for conversations and messages

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{ffi, params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use crate::llm::MessageRole;
use super::{
    errors::{StoreError, StoreResult},
    models::{stored_now, Conversation, ConversationId, Message, MessageId, NewMessage},
    store::ConversationStore,
};

/// Database manager for conversation persistence
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file
    pub fn open<P: AsRef<Path>>(db_path: P) -> StoreResult<Self> {
        debug!("Opening conversation database at {}", db_path.as_ref().display());
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        // Other processes may hold the write lock briefly
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn: Mutex::new(conn) };
        store.create_tables()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Create the necessary database tables
    fn create_tables(&self) -> StoreResult<()> {
        self.conn()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                summary TEXT
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                model_name TEXT,
                FOREIGN KEY (conversation_id) REFERENCES conversations (id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation_id ON messages (conversation_id);
            CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages (created_at);
            CREATE INDEX IF NOT EXISTS idx_conversations_created_at ON conversations (created_at);",
        )?;

        Ok(())
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    // Fixed width keeps lexicographic and chronological order identical
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidColumnType(idx, "created_at".to_string(), rusqlite::types::Type::Text))
}

fn conversation_from_row(row: &Row) -> rusqlite::Result<Conversation> {
    let created_at: String = row.get(2)?;
    Ok(Conversation {
        id: row.get(0)?,
        session_id: row.get(1)?,
        created_at: parse_timestamp(2, &created_at)?,
        summary: row.get(3)?,
    })
}

fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    let role_str: String = row.get(2)?;
    let created_at: String = row.get(4)?;

    let role = MessageRole::parse(&role_str)
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(2, "role".to_string(), rusqlite::types::Type::Text))?;

    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role,
        content: row.get(3)?,
        created_at: parse_timestamp(4, &created_at)?,
        model_name: row.get(5)?,
    })
}

/// Map constraint failures onto the store's error vocabulary
fn classify(error: rusqlite::Error, session_id: Option<&str>, conversation_id: Option<ConversationId>) -> StoreError {
    if let rusqlite::Error::SqliteFailure(ref failure, _) = error {
        if failure.code == ErrorCode::ConstraintViolation {
            match (failure.extended_code, session_id, conversation_id) {
                (ffi::SQLITE_CONSTRAINT_UNIQUE, Some(session_id), _) => {
                    return StoreError::UniqueViolation(session_id.to_string());
                }
                (ffi::SQLITE_CONSTRAINT_FOREIGNKEY, _, Some(id)) => {
                    return StoreError::MissingConversation(id);
                }
                _ => {}
            }
        }
    }
    StoreError::Database(error)
}

const CONVERSATION_COLUMNS: &str = "id, session_id, created_at, summary";
const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, created_at, model_name";

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn find_by_session(&self, session_id: &str) -> StoreResult<Vec<Conversation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM conversations WHERE session_id = ?1 ORDER BY id ASC",
            CONVERSATION_COLUMNS
        ))?;

        let rows = stmt.query_map([session_id], conversation_from_row)?;
        let mut conversations = Vec::new();
        for conversation in rows {
            conversations.push(conversation?);
        }

        Ok(conversations)
    }

    async fn insert_conversation(&self, session_id: &str) -> StoreResult<Conversation> {
        let conn = self.conn()?;
        let created_at = stored_now();

        conn.execute(
            "INSERT INTO conversations (session_id, created_at) VALUES (?1, ?2)",
            params![session_id, format_timestamp(created_at)],
        )
        .map_err(|e| classify(e, Some(session_id), None))?;

        Ok(Conversation {
            id: conn.last_insert_rowid(),
            session_id: session_id.to_string(),
            created_at,
            summary: None,
        })
    }

    async fn delete_conversation(&self, id: ConversationId) -> StoreResult<()> {
        self.conn()?.execute("DELETE FROM conversations WHERE id = ?1", [id])?;
        Ok(())
    }

    async fn update_summary(&self, id: ConversationId, summary: &str) -> StoreResult<()> {
        let updated = self.conn()?.execute(
            "UPDATE conversations SET summary = ?1 WHERE id = ?2",
            params![summary, id],
        )?;

        if updated == 0 {
            return Err(StoreError::MissingConversation(id));
        }

        Ok(())
    }

    async fn list_conversations(&self) -> StoreResult<Vec<Conversation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM conversations ORDER BY created_at DESC, id DESC",
            CONVERSATION_COLUMNS
        ))?;

        let rows = stmt.query_map([], conversation_from_row)?;
        let mut conversations = Vec::new();
        for conversation in rows {
            conversations.push(conversation?);
        }

        Ok(conversations)
    }

    async fn insert_message(
        &self,
        conversation_id: ConversationId,
        message: &NewMessage,
    ) -> StoreResult<Message> {
        let conn = self.conn()?;

        // Never earlier than the conversation's latest message
        let latest: Option<String> = conn
            .query_row(
                "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let now = stored_now();
        let created_at = match latest {
            Some(latest) => parse_timestamp(0, &latest)?.max(now),
            None => now,
        };

        conn.execute(
            "INSERT INTO messages (conversation_id, role, content, created_at, model_name)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation_id,
                message.role.as_str(),
                message.content,
                format_timestamp(created_at),
                message.model_name,
            ],
        )
        .map_err(|e| classify(e, None, Some(conversation_id)))?;

        Ok(Message {
            id: conn.last_insert_rowid(),
            conversation_id,
            role: message.role,
            content: message.content.clone(),
            created_at,
            model_name: message.model_name.clone(),
        })
    }

    async fn list_messages(&self, conversation_id: ConversationId) -> StoreResult<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY created_at ASC, id ASC",
            MESSAGE_COLUMNS
        ))?;

        let rows = stmt.query_map([conversation_id], message_from_row)?;
        let mut messages = Vec::new();
        for message in rows {
            messages.push(message?);
        }

        Ok(messages)
    }

    async fn delete_messages(&self, ids: &[MessageId]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let deleted = self.conn()?.execute(
            &format!("DELETE FROM messages WHERE id IN ({})", placeholders),
            params_from_iter(ids.iter()),
        )?;

        Ok(deleted)
    }
}

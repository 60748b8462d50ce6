//! Conversation and message records

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::{ChatMessage, MessageRole};

pub type ConversationId = i64;
pub type MessageId = i64;

/// Current time at the microsecond precision rows are stored with
pub fn stored_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// The durable record of one session's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub summary: Option<String>,
}

impl Conversation {
    /// Whether a non-blank compaction summary is stored
    pub fn has_summary(&self) -> bool {
        self.summary.as_deref().map_or(false, |s| !s.trim().is_empty())
    }
}

/// A stored message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Backend that produced an assistant message
    pub model_name: Option<String>,
}

impl Message {
    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.clone())
    }
}

/// A message about to be appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub model_name: Option<String>,
}

impl NewMessage {
    pub fn new(role: MessageRole, content: impl Into<String>, model_name: Option<String>) -> Self {
        Self {
            role,
            content: content.into(),
            model_name,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content, None)
    }

    pub fn assistant(content: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content, Some(model_name.into()))
    }
}

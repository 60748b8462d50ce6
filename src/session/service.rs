//! Conversation service
//!
//! Facade over the resolver, store, and context builder. Everything that
//! reads by session id goes through the resolver so duplicates get folded.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::llm::{ChatMessage, MessageRole};
use crate::utils::text::string::truncate_with_ellipsis;
use super::{
    context::ContextBuilder,
    errors::SessionResult,
    models::{Conversation, Message, NewMessage},
    resolver::SessionResolver,
    store::ConversationStore,
    summarizer::Summarizer,
};

const TITLE_MAX_CHARS: usize = 50;
pub const UNTITLED: &str = "New Conversation";

/// Listing entry for one conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub message_count: usize,
    pub has_summary: bool,
    pub title: String,
    pub last_message_at: Option<DateTime<Utc>>,
    /// Assistant models in order of first reply
    pub models: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetails {
    #[serde(flatten)]
    pub overview: ConversationSummary,
    pub summary: Option<String>,
    pub messages: Vec<Message>,
}

/// History of a session, optionally with its stored summary
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHistory {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub messages: Vec<Message>,
}

pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
    resolver: SessionResolver,
    context: ContextBuilder,
}

impl ConversationService {
    pub fn new(store: Arc<dyn ConversationStore>, summarizer: Summarizer) -> Self {
        Self::build(store, Some(Arc::new(summarizer)))
    }

    /// Service that reads and writes history but never compacts it
    pub fn without_summarizer(store: Arc<dyn ConversationStore>) -> Self {
        Self::build(store, None)
    }

    fn build(store: Arc<dyn ConversationStore>, summarizer: Option<Arc<Summarizer>>) -> Self {
        let resolver = SessionResolver::new(store.clone());
        let context = ContextBuilder::new(resolver.clone(), store.clone(), summarizer);
        Self {
            store,
            resolver,
            context,
        }
    }

    pub async fn get_or_create(&self, session_id: &str) -> SessionResult<Conversation> {
        self.resolver.resolve(session_id).await
    }

    pub async fn append_message(
        &self,
        conversation: &Conversation,
        role: MessageRole,
        content: &str,
        model: Option<&str>,
    ) -> SessionResult<Message> {
        let message = NewMessage::new(role, content, model.map(str::to_string));
        let stored = self.store.insert_message(conversation.id, &message).await?;
        debug!(
            "Appended {} message {} to session {}",
            role, stored.id, conversation.session_id
        );
        Ok(stored)
    }

    /// Ordered messages; an unknown session has none
    pub async fn history(&self, session_id: &str) -> SessionResult<Vec<Message>> {
        match self.resolver.lookup(session_id).await? {
            Some(conversation) => Ok(self.store.list_messages(conversation.id).await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn history_with_summary(
        &self,
        session_id: &str,
        include_summary: bool,
    ) -> SessionResult<SessionHistory> {
        let Some(conversation) = self.resolver.lookup(session_id).await? else {
            return Ok(SessionHistory {
                session_id: session_id.to_string(),
                summary: None,
                messages: Vec::new(),
            });
        };

        let messages = self.store.list_messages(conversation.id).await?;
        let summary = if include_summary && conversation.has_summary() {
            conversation.summary
        } else {
            None
        };

        Ok(SessionHistory {
            session_id: conversation.session_id,
            summary,
            messages,
        })
    }

    /// Remove every conversation row for `session_id`; returns how many went
    pub async fn clear_history(&self, session_id: &str) -> SessionResult<usize> {
        let rows = self.resolver.all_rows(session_id).await?;
        for conversation in &rows {
            self.store.delete_conversation(conversation.id).await?;
        }
        info!("Cleared {} conversation(s) for session {}", rows.len(), session_id);
        Ok(rows.len())
    }

    pub async fn delete_conversation(&self, session_id: &str) -> SessionResult<usize> {
        self.clear_history(session_id).await
    }

    pub async fn list_conversations(&self) -> SessionResult<Vec<ConversationSummary>> {
        let conversations = self.store.list_conversations().await?;
        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in &conversations {
            let messages = self.store.list_messages(conversation.id).await?;
            summaries.push(overview(conversation, &messages));
        }
        Ok(summaries)
    }

    pub async fn conversation_details(&self, session_id: &str) -> SessionResult<Option<ConversationDetails>> {
        let Some(conversation) = self.resolver.lookup(session_id).await? else {
            return Ok(None);
        };

        let messages = self.store.list_messages(conversation.id).await?;
        Ok(Some(ConversationDetails {
            overview: overview(&conversation, &messages),
            summary: conversation.summary.filter(|s| !s.trim().is_empty()),
            messages,
        }))
    }

    pub async fn context_for_single_model(&self, session_id: &str, utterance: &str) -> Vec<ChatMessage> {
        self.context.single_model_context(session_id, utterance).await
    }

    pub async fn context_for_comparison(&self, session_id: &str) -> Vec<ChatMessage> {
        self.context.comparison_context(session_id).await
    }
}

fn overview(conversation: &Conversation, messages: &[Message]) -> ConversationSummary {
    ConversationSummary {
        session_id: conversation.session_id.clone(),
        created_at: conversation.created_at,
        message_count: messages.len(),
        has_summary: conversation.has_summary(),
        title: title(messages),
        last_message_at: messages.last().map(|m| m.created_at),
        models: models_used(messages),
    }
}

/// First user message, else first message, shortened for display
pub fn title(messages: &[Message]) -> String {
    messages
        .iter()
        .find(|m| m.role == MessageRole::User)
        .or_else(|| messages.first())
        .map(|m| truncate_with_ellipsis(&m.content, TITLE_MAX_CHARS))
        .unwrap_or_else(|| UNTITLED.to_string())
}

fn models_used(messages: &[Message]) -> Vec<String> {
    let mut models: Vec<String> = Vec::new();
    for name in messages
        .iter()
        .filter(|m| m.role == MessageRole::Assistant)
        .filter_map(|m| m.model_name.as_deref())
    {
        if !models.iter().any(|seen| seen == name) {
            models.push(name.to_string());
        }
    }
    models
}

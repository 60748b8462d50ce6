//! Model context assembly
//!
//! Both modes have a fallible `try_*` form and a degrading form. Building
//! context is never the reason a request fails: the degrading form falls
//! back to the smallest context that still makes sense.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::llm::{ChatMessage, MessageRole};
use super::{
    errors::SessionResult,
    models::Message,
    resolver::SessionResolver,
    store::ConversationStore,
    summarizer::Summarizer,
};

/// System entry carrying a compaction summary
pub fn summary_memory(summary: &str) -> String {
    format!(
        "Past conversation summary: {}. Do not repeat this in your response, just use it as memory.",
        summary
    )
}

/// `[system summary]? + recent + [user utterance]`
///
/// The system entry is present only for a non-blank summary.
pub fn build_context_with_summary(
    summary: Option<&str>,
    recent: &[Message],
    utterance: &str,
) -> Vec<ChatMessage> {
    let mut context = Vec::with_capacity(recent.len() + 2);

    if let Some(summary) = summary.filter(|s| !s.trim().is_empty()) {
        context.push(ChatMessage::system(summary_memory(summary)));
    }

    context.extend(recent.iter().map(Message::to_chat));
    context.push(ChatMessage::user(utterance));
    context
}

/// User turns only, in order
pub fn user_turns(history: &[Message]) -> Vec<ChatMessage> {
    history
        .iter()
        .filter(|m| m.role == MessageRole::User)
        .map(Message::to_chat)
        .collect()
}

pub struct ContextBuilder {
    resolver: SessionResolver,
    store: Arc<dyn ConversationStore>,
    /// Without one, history is never compacted
    summarizer: Option<Arc<Summarizer>>,
}

impl ContextBuilder {
    pub fn new(
        resolver: SessionResolver,
        store: Arc<dyn ConversationStore>,
        summarizer: Option<Arc<Summarizer>>,
    ) -> Self {
        Self {
            resolver,
            store,
            summarizer,
        }
    }

    /// Context for comparing models: every stored user turn, nothing else
    pub async fn comparison_context(&self, session_id: &str) -> Vec<ChatMessage> {
        match self.try_comparison_context(session_id).await {
            Ok(context) => context,
            Err(e) => {
                warn!("Comparison context for session {} degraded to empty: {}", session_id, e);
                Vec::new()
            }
        }
    }

    pub async fn try_comparison_context(&self, session_id: &str) -> SessionResult<Vec<ChatMessage>> {
        let Some(conversation) = self.resolver.lookup(session_id).await? else {
            return Ok(Vec::new());
        };

        let history = self.store.list_messages(conversation.id).await?;
        Ok(user_turns(&history))
    }

    /// Context for a single model, compacting the history when it is too long
    pub async fn single_model_context(&self, session_id: &str, utterance: &str) -> Vec<ChatMessage> {
        match self.try_single_model_context(session_id, utterance).await {
            Ok(context) => context,
            Err(e) => {
                warn!("Context for session {} degraded to the new message only: {}", session_id, e);
                vec![ChatMessage::user(utterance)]
            }
        }
    }

    pub async fn try_single_model_context(
        &self,
        session_id: &str,
        utterance: &str,
    ) -> SessionResult<Vec<ChatMessage>> {
        let Some(conversation) = self.resolver.lookup(session_id).await? else {
            return Ok(vec![ChatMessage::user(utterance)]);
        };

        let history = self.store.list_messages(conversation.id).await?;
        let summarizer = match &self.summarizer {
            Some(summarizer) if summarizer.should_compact(&history) => summarizer,
            _ => {
                debug!("Session {}: sending {} messages uncompacted", session_id, history.len());
                return Ok(build_context_with_summary(None, &history, utterance));
            }
        };

        let compaction = summarizer
            .compact(&history, conversation.summary.as_deref())
            .await;

        if !compaction.summary.is_empty() {
            self.store.update_summary(conversation.id, &compaction.summary).await?;
        }

        if !compaction.summarized.is_empty() {
            let deleted = self.store.delete_messages(&compaction.summarized).await?;
            info!(
                "Session {}: compacted {} messages, {} kept",
                session_id,
                deleted,
                compaction.recent.len()
            );
        }

        Ok(build_context_with_summary(
            Some(&compaction.summary),
            &compaction.recent,
            utterance,
        ))
    }
}

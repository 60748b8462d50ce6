//! Storage contract for conversations and messages
//!
//! The store only promises row storage, a uniqueness check on the session
//! id, and READ-COMMITTED visibility. Two concurrent inserts for the same
//! session id may therefore both succeed; callers reconcile afterwards.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{
    errors::{StoreError, StoreResult},
    models::{stored_now, Conversation, ConversationId, Message, MessageId, NewMessage},
};

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Every conversation row carrying this session id, lowest id first
    async fn find_by_session(&self, session_id: &str) -> StoreResult<Vec<Conversation>>;

    /// Insert a new conversation; a taken session id is `StoreError::UniqueViolation`
    async fn insert_conversation(&self, session_id: &str) -> StoreResult<Conversation>;

    /// Delete a conversation together with its messages
    async fn delete_conversation(&self, id: ConversationId) -> StoreResult<()>;

    /// Overwrite the stored summary
    async fn update_summary(&self, id: ConversationId, summary: &str) -> StoreResult<()>;

    /// All conversations, most recently created first
    async fn list_conversations(&self) -> StoreResult<Vec<Conversation>>;

    async fn insert_message(
        &self,
        conversation_id: ConversationId,
        message: &NewMessage,
    ) -> StoreResult<Message>;

    /// Messages in creation order, ties broken by insertion order
    async fn list_messages(&self, conversation_id: ConversationId) -> StoreResult<Vec<Message>>;

    /// Delete the given messages, returning how many existed
    async fn delete_messages(&self, ids: &[MessageId]) -> StoreResult<usize>;
}

#[derive(Default)]
struct MemoryState {
    next_conversation_id: ConversationId,
    next_message_id: MessageId,
    conversations: BTreeMap<ConversationId, Conversation>,
    messages: BTreeMap<MessageId, Message>,
}

/// In-process store
///
/// With `without_unique_constraint` it behaves like a store whose uniqueness
/// check lost a race, letting duplicate session rows appear.
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    enforce_unique: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            enforce_unique: true,
        }
    }

    pub fn without_unique_constraint() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            enforce_unique: false,
        }
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Number of conversation rows, duplicates included
    pub fn conversation_rows(&self) -> StoreResult<usize> {
        Ok(self.state()?.conversations.len())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn find_by_session(&self, session_id: &str) -> StoreResult<Vec<Conversation>> {
        // Stand-in for I/O so concurrent callers can interleave
        tokio::task::yield_now().await;
        let state = self.state()?;
        Ok(state
            .conversations
            .values()
            .filter(|c| c.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn insert_conversation(&self, session_id: &str) -> StoreResult<Conversation> {
        tokio::task::yield_now().await;
        let mut state = self.state()?;
        if self.enforce_unique && state.conversations.values().any(|c| c.session_id == session_id) {
            return Err(StoreError::UniqueViolation(session_id.to_string()));
        }

        state.next_conversation_id += 1;
        let conversation = Conversation {
            id: state.next_conversation_id,
            session_id: session_id.to_string(),
            created_at: stored_now(),
            summary: None,
        };
        state.conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn delete_conversation(&self, id: ConversationId) -> StoreResult<()> {
        let mut state = self.state()?;
        state.conversations.remove(&id);
        state.messages.retain(|_, m| m.conversation_id != id);
        Ok(())
    }

    async fn update_summary(&self, id: ConversationId, summary: &str) -> StoreResult<()> {
        let mut state = self.state()?;
        let conversation = state
            .conversations
            .get_mut(&id)
            .ok_or(StoreError::MissingConversation(id))?;
        conversation.summary = Some(summary.to_string());
        Ok(())
    }

    async fn list_conversations(&self) -> StoreResult<Vec<Conversation>> {
        let state = self.state()?;
        let mut conversations: Vec<Conversation> = state.conversations.values().cloned().collect();
        conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(conversations)
    }

    async fn insert_message(
        &self,
        conversation_id: ConversationId,
        message: &NewMessage,
    ) -> StoreResult<Message> {
        tokio::task::yield_now().await;
        let mut state = self.state()?;
        if !state.conversations.contains_key(&conversation_id) {
            return Err(StoreError::MissingConversation(conversation_id));
        }

        // Never earlier than the conversation's latest message
        let latest = state
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| m.created_at)
            .max();
        let now = stored_now();
        let created_at = latest.map_or(now, |latest| latest.max(now));

        state.next_message_id += 1;
        let stored = Message {
            id: state.next_message_id,
            conversation_id,
            role: message.role,
            content: message.content.clone(),
            created_at,
            model_name: message.model_name.clone(),
        };
        state.messages.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_messages(&self, conversation_id: ConversationId) -> StoreResult<Vec<Message>> {
        let state = self.state()?;
        let mut messages: Vec<Message> = state
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(messages)
    }

    async fn delete_messages(&self, ids: &[MessageId]) -> StoreResult<usize> {
        let mut state = self.state()?;
        Ok(ids.iter().filter(|id| state.messages.remove(*id).is_some()).count())
    }
}

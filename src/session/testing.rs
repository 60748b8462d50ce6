//! Store wrapper with switchable faults

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{
    errors::{StoreError, StoreResult},
    models::{Conversation, ConversationId, Message, MessageId, NewMessage},
    store::{ConversationStore, MemoryStore},
};

#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    /// `find_by_session` sees nothing
    pub hide_rows: AtomicBool,
    /// `insert_conversation` always reports a uniqueness conflict
    pub conflict_on_insert: AtomicBool,
    /// `list_messages` fails
    pub fail_message_reads: AtomicBool,
    pub insert_attempts: AtomicUsize,
    /// `insert_message` fails for messages tagged with this model
    pub reject_model: Mutex<Option<String>>,
}

impl FaultyStore {
    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    pub fn reject_messages_from(&self, model: &str) {
        *self.reject_model.lock().unwrap() = Some(model.to_string());
    }
}

#[async_trait]
impl ConversationStore for FaultyStore {
    async fn find_by_session(&self, session_id: &str) -> StoreResult<Vec<Conversation>> {
        if self.hide_rows.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        self.inner.find_by_session(session_id).await
    }

    async fn insert_conversation(&self, session_id: &str) -> StoreResult<Conversation> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        if self.conflict_on_insert.load(Ordering::SeqCst) {
            return Err(StoreError::UniqueViolation(session_id.to_string()));
        }
        self.inner.insert_conversation(session_id).await
    }

    async fn delete_conversation(&self, id: ConversationId) -> StoreResult<()> {
        self.inner.delete_conversation(id).await
    }

    async fn update_summary(&self, id: ConversationId, summary: &str) -> StoreResult<()> {
        self.inner.update_summary(id, summary).await
    }

    async fn list_conversations(&self) -> StoreResult<Vec<Conversation>> {
        self.inner.list_conversations().await
    }

    async fn insert_message(
        &self,
        conversation_id: ConversationId,
        message: &NewMessage,
    ) -> StoreResult<Message> {
        let rejected = self.reject_model.lock().unwrap().clone();
        if rejected.is_some() && message.model_name == rejected {
            return Err(StoreError::Corrupt("disk full".to_string()));
        }
        self.inner.insert_message(conversation_id, message).await
    }

    async fn list_messages(&self, conversation_id: ConversationId) -> StoreResult<Vec<Message>> {
        if self.fail_message_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt(format!("messages of conversation {}", conversation_id)));
        }
        self.inner.list_messages(conversation_id).await
    }

    async fn delete_messages(&self, ids: &[MessageId]) -> StoreResult<usize> {
        self.inner.delete_messages(ids).await
    }
}

//! Session id to conversation resolution
//!
//! Creation is optimistic: look up, insert on a miss, and on a uniqueness
//! conflict look up again. Duplicate rows that slip past the store's
//! constraint are collapsed onto the highest id whenever they are observed.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    errors::{SessionError, SessionResult, StoreError},
    models::Conversation,
    store::ConversationStore,
};

pub const MAX_RESOLVE_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 50;
const BACKOFF_STEP_MS: u64 = 25;

/// Delay before retry number `attempt + 1`
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS + attempt as u64 * BACKOFF_STEP_MS)
}

#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn ConversationStore>,
    max_attempts: u32,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self {
            store,
            max_attempts: MAX_RESOLVE_ATTEMPTS,
        }
    }

    /// Get the conversation for `session_id`, creating it on first use
    pub async fn resolve(&self, session_id: &str) -> SessionResult<Conversation> {
        for attempt in 0..self.max_attempts {
            if let Some(conversation) = self.lookup(session_id).await? {
                return Ok(conversation);
            }

            match self.store.insert_conversation(session_id).await {
                Ok(conversation) => {
                    info!("Created conversation {} for session {}", conversation.id, session_id);
                    return Ok(conversation);
                }
                Err(StoreError::UniqueViolation(_)) => {
                    debug!("Lost creation race for session {}, re-reading", session_id);
                    if let Some(conversation) = self.lookup(session_id).await? {
                        return Ok(conversation);
                    }

                    // Winner's row is not visible yet
                    if attempt + 1 < self.max_attempts {
                        let delay = backoff_delay(attempt);
                        debug!(
                            "Conversation for session {} not yet visible, retrying in {:?}",
                            session_id, delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(
            "Giving up on session {} after {} attempts",
            session_id, self.max_attempts
        );
        Err(SessionError::ConflictExhausted {
            session_id: session_id.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Find the canonical conversation for `session_id`, reconciling duplicates
    pub async fn lookup(&self, session_id: &str) -> SessionResult<Option<Conversation>> {
        let rows = self.store.find_by_session(session_id).await?;
        Ok(self.canonicalize(session_id, rows).await?)
    }

    /// Keep the row with the highest id and delete the rest
    ///
    /// Safe to repeat: rows already deleted by a concurrent caller are simply
    /// gone, and every caller picks the same survivor.
    async fn canonicalize(
        &self,
        session_id: &str,
        rows: Vec<Conversation>,
    ) -> Result<Option<Conversation>, StoreError> {
        let Some(keep) = rows.iter().max_by_key(|c| c.id).cloned() else {
            return Ok(None);
        };

        if rows.len() > 1 {
            warn!(
                "Found {} conversations for session {}, keeping {}",
                rows.len(),
                session_id,
                keep.id
            );
            for duplicate in rows.iter().filter(|c| c.id != keep.id) {
                self.store.delete_conversation(duplicate.id).await?;
            }
        }

        Ok(Some(keep))
    }

    /// Every row for `session_id`, duplicates included
    pub async fn all_rows(&self, session_id: &str) -> SessionResult<Vec<Conversation>> {
        Ok(self.store.find_by_session(session_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{database::SqliteStore, models::NewMessage, store::MemoryStore, testing::FaultyStore};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_resolve_creates_then_reuses() {
        let store = Arc::new(MemoryStore::new());
        let resolver = SessionResolver::new(store.clone());

        let first = resolver.resolve("abc").await.unwrap();
        let second = resolver.resolve("abc").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.session_id, "abc");
        assert_eq!(store.conversation_rows().unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_resolve_with_constraint() {
        let store = Arc::new(MemoryStore::new());
        let resolver = SessionResolver::new(store.clone());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve("race").await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            let conversation = handle.await.unwrap().unwrap();
            assert_eq!(conversation.session_id, "race");
            ids.push(conversation.id);
        }

        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.conversation_rows().unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_resolve_without_constraint_heals() {
        let store = Arc::new(MemoryStore::without_unique_constraint());
        let resolver = SessionResolver::new(store.clone());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve("race").await })
            })
            .collect();

        for handle in handles {
            let conversation = handle.await.unwrap().unwrap();
            assert_eq!(conversation.session_id, "race");
        }

        let canonical = resolver.lookup("race").await.unwrap().unwrap();
        assert_eq!(store.conversation_rows().unwrap(), 1);
        assert_eq!(resolver.resolve("race").await.unwrap().id, canonical.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_resolve_on_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.db");

        // One connection per resolver, as separate processes would have
        let resolvers: Vec<SessionResolver> = (0..4)
            .map(|_| SessionResolver::new(Arc::new(SqliteStore::open(&path).unwrap())))
            .collect();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let resolver = resolvers[i % resolvers.len()].clone();
                tokio::spawn(async move { resolver.resolve("race").await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);

        let reader = SqliteStore::open(&path).unwrap();
        let rows = reader.find_by_session("race").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, ids[0]);
    }

    #[tokio::test]
    async fn test_duplicates_collapse_to_highest_id() {
        let store = Arc::new(MemoryStore::without_unique_constraint());
        let older = store.insert_conversation("dup").await.unwrap();
        let newer = store.insert_conversation("dup").await.unwrap();
        store.insert_message(older.id, &NewMessage::user("stale")).await.unwrap();

        let resolver = SessionResolver::new(store.clone());
        let kept = resolver.lookup("dup").await.unwrap().unwrap();

        assert_eq!(kept.id, newer.id);
        assert_eq!(store.conversation_rows().unwrap(), 1);
        assert!(store.list_messages(older.id).await.unwrap().is_empty());

        // Idempotent on repeat
        let again = resolver.lookup("dup").await.unwrap().unwrap();
        assert_eq!(again.id, newer.id);
    }

    #[tokio::test]
    async fn test_lookup_missing_is_none() {
        let resolver = SessionResolver::new(Arc::new(MemoryStore::new()));
        assert!(resolver.lookup("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conflict_exhaustion_is_fatal() {
        // Every insert conflicts but the winning row never becomes visible
        let store = Arc::new(FaultyStore::default());
        FaultyStore::set(&store.hide_rows, true);
        FaultyStore::set(&store.conflict_on_insert, true);
        let resolver = SessionResolver::new(store.clone());

        let result = resolver.resolve("ghost").await;

        match result {
            Err(SessionError::ConflictExhausted { session_id, attempts }) => {
                assert_eq!(session_id, "ghost");
                assert_eq!(attempts, MAX_RESOLVE_ATTEMPTS);
            }
            other => panic!("expected ConflictExhausted, got {:?}", other),
        }
        assert_eq!(store.insert_attempts.load(Ordering::SeqCst), MAX_RESOLVE_ATTEMPTS as usize);
    }

    #[test]
    fn test_backoff_progresses() {
        assert_eq!(backoff_delay(0), Duration::from_millis(50));
        assert_eq!(backoff_delay(1), Duration::from_millis(75));
        assert_eq!(backoff_delay(2), Duration::from_millis(100));
    }
}

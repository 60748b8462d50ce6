//! Session management and conversation handling
//!
//! This module maps client session ids to stored conversations, keeps their
//! message history, and decides how much of it each model call gets to see.

pub mod models;
pub mod errors;
pub mod store;
pub mod database;
pub mod resolver;
pub mod summarizer;
pub mod context;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use models::*;
pub use errors::*;
pub use store::{ConversationStore, MemoryStore};
pub use database::SqliteStore;
pub use resolver::SessionResolver;
pub use summarizer::{Compaction, CompactionOutcome, CompactionPolicy, Summarizer};
pub use context::ContextBuilder;
pub use service::{ConversationDetails, ConversationService, ConversationSummary, SessionHistory};

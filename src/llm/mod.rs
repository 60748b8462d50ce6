//! LLM provider abstractions and implementations
//!
//! This module provides a unified interface for chat-completion backends.
//! Every model is reached through an OpenAI-compatible endpoint, so one
//! provider instance can serve several model ids.

pub mod provider;
pub mod types;
pub mod openai;
pub mod errors;

#[cfg(test)]
pub(crate) mod testing;

pub use provider::*;
pub use types::*;
pub use errors::*;

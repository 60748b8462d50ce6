//! Multi-model chat sessions with bounded, summarized conversation context

pub mod app;
pub mod cli;
pub mod config;
pub mod llm;
pub mod session;
pub mod utils;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::app::open_store;
use crate::config::Config;
use crate::session::ConversationService;
use super::{ask::AskCommand, print_json};

/// Colloquy - ask several language models and keep the conversation going
#[derive(Parser)]
#[command(
    name = "colloquy",
    version,
    about = "Ask several language models and keep the conversation going",
    long_about = r#"Colloquy keeps multi-turn conversations with one or more chat models.
Long conversations are summarized so every request stays small.

Examples:
  colloquy ask "what is a monad?"                    # Compare every model
  colloquy ask -m grok -s my-session "and a functor?" # Continue with one model
  colloquy history my-session --include-summary"#
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long = "debug", global = true)]
    pub debug: bool,

    /// Directory holding the conversation database
    #[arg(long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask a question
    Ask(AskCommand),

    /// Print the messages of a session
    History {
        session: String,

        /// Also print the stored conversation summary
        #[arg(long = "include-summary")]
        include_summary: bool,
    },

    /// Remove a session's history
    Clear { session: String },

    /// List every conversation, newest first
    Conversations,

    /// Print a conversation with its overview
    Show { session: String },

    /// Delete a conversation
    Delete { session: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Removal {
    session_id: String,
    removed: usize,
    message: String,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        if self.debug {
            debug!("Debug logging enabled");
        }

        // Initialize configuration
        let mut config = Config::init().await?;
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        debug!("Configuration initialized, data dir {}", config.data_dir.display());

        match self.command {
            Commands::Ask(ask_cmd) => ask_cmd.execute(&config).await,
            Commands::History { session, include_summary } => {
                let service = history_service(&config).await?;
                print_json(&service.history_with_summary(&session, include_summary).await?)
            }
            Commands::Clear { session } => {
                let service = history_service(&config).await?;
                let removed = service.clear_history(&session).await?;
                print_json(&Removal {
                    message: format!("Conversation history cleared for session: {}", session),
                    session_id: session,
                    removed,
                })
            }
            Commands::Conversations => {
                let service = history_service(&config).await?;
                print_json(&service.list_conversations().await?)
            }
            Commands::Show { session } => {
                let service = history_service(&config).await?;
                let details = service
                    .conversation_details(&session)
                    .await?
                    .ok_or_else(|| anyhow!("No conversation found for session: {}", session))?;
                print_json(&details)
            }
            Commands::Delete { session } => {
                let service = history_service(&config).await?;
                let removed = service.delete_conversation(&session).await?;
                print_json(&Removal {
                    message: format!("Conversation deleted: {}", session),
                    session_id: session,
                    removed,
                })
            }
        }
    }
}

/// History commands never call a model, so they need no API key
async fn history_service(config: &Config) -> Result<ConversationService> {
    let store = open_store(config).await?;
    Ok(ConversationService::without_summarizer(Arc::new(store)))
}

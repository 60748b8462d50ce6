use anyhow::{anyhow, Result};
use clap::Args;
use std::io::{self, Read};
use tracing::{debug, info};

use crate::app::{generate_session_id, ChatApp};
use crate::config::{Config, ALL_MODELS};
use crate::utils::text::string::{normalize_whitespace, truncate_with_ellipsis};
use super::print_json;

/// Ask one model, or all of them side by side
#[derive(Args)]
pub struct AskCommand {
    /// The question. If not provided, will read from stdin
    pub question: Vec<String>,

    /// Model alias, or "all" to compare every configured model
    #[arg(short = 'm', long = "model", default_value = ALL_MODELS)]
    pub model: String,

    /// Session to continue; a new one is started when omitted
    #[arg(short = 's', long = "session")]
    pub session: Option<String>,
}

impl AskCommand {
    pub async fn execute(&self, config: &Config) -> Result<()> {
        debug!("Executing ask command");

        let question = self.get_question()?;
        if question.trim().is_empty() {
            return Err(anyhow!("No question provided. Use arguments or pipe input via stdin."));
        }

        info!("Asking: {}", truncate_with_ellipsis(&normalize_whitespace(&question), 50));

        // Reject unknown aliases before touching the network
        let model = if self.model.eq_ignore_ascii_case(ALL_MODELS) {
            None
        } else {
            Some(config.model_for(&self.model)?.clone())
        };

        config.validate()?;
        let app = ChatApp::new(config).await?;

        let session_id = self.session.clone().unwrap_or_else(generate_session_id);
        match model {
            Some(model) => print_json(&app.ask_single(&model, question.trim(), &session_id).await?),
            None => print_json(&app.ask_all(question.trim(), &session_id).await?),
        }
    }

    fn get_question(&self) -> Result<String> {
        if !self.question.is_empty() {
            // Join all arguments into a single question
            Ok(self.question.join(" "))
        } else {
            debug!("Reading question from stdin");
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)
                .map_err(|e| anyhow!("Failed to read from stdin: {}", e))?;
            Ok(buffer)
        }
    }
}

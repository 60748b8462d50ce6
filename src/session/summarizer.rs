//! Conversation compaction
//!
//! Once a conversation grows past the threshold, everything but the most
//! recent messages is replaced by a short model-written synopsis. When the
//! summarization call fails a deterministic synopsis of the user's turns is
//! produced instead and nothing is dropped.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm::{CallPolicy, ChatMessage, ChatRequest, LlmError, LlmProvider, LlmResult, MessageRole};
use crate::utils::text::string::truncate_with_ellipsis;
use super::models::{Message, MessageId};

pub const FALLBACK_PREFIX: &str = "User has discussed: ";
pub const FALLBACK_GENERIC: &str = "User has had a conversation with the AI assistant.";
const FALLBACK_TOPIC_CHARS: usize = 30;

/// When and how much to compact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionPolicy {
    /// Compact once the history holds more than this many messages
    pub threshold: usize,
    /// Messages kept verbatim after compaction
    pub keep_recent: usize,
    /// Word budget requested from the summarization model
    pub max_summary_words: usize,
    /// Feed the stored summary into the next compaction instead of dropping it
    pub fold_previous_summary: bool,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            keep_recent: 3,
            max_summary_words: 100,
            fold_previous_summary: false,
        }
    }
}

/// How a compaction produced its summary
#[derive(Debug, Clone, PartialEq)]
pub enum CompactionOutcome {
    /// The model summarized the older messages
    Summarized,
    /// There were no older messages to summarize
    NothingToSummarize,
    /// The model call failed; the summary is a deterministic stand-in
    Fallback { reason: String },
}

/// Result of compacting a history
#[derive(Debug, Clone)]
pub struct Compaction {
    pub summary: String,
    /// Messages to keep sending verbatim, in order
    pub recent: Vec<Message>,
    /// Messages covered by `summary` that may be deleted
    pub summarized: Vec<MessageId>,
    pub outcome: CompactionOutcome,
}

impl Compaction {
    pub fn is_fallback(&self) -> bool {
        matches!(self.outcome, CompactionOutcome::Fallback { .. })
    }
}

pub struct Summarizer {
    provider: Arc<dyn LlmProvider>,
    model: String,
    policy: CompactionPolicy,
    call_policy: CallPolicy,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, policy: CompactionPolicy) -> Self {
        Self {
            provider,
            model: model.into(),
            policy,
            call_policy: CallPolicy::SUMMARY,
        }
    }

    pub fn with_call_policy(mut self, call_policy: CallPolicy) -> Self {
        self.call_policy = call_policy;
        self
    }

    pub fn should_compact(&self, messages: &[Message]) -> bool {
        messages.len() > self.policy.threshold
    }

    /// Split `messages` into a summary of the older part and the recent tail
    ///
    /// `previous_summary` is only used when the policy folds summaries.
    pub async fn compact(&self, messages: &[Message], previous_summary: Option<&str>) -> Compaction {
        if messages.is_empty() {
            return Compaction {
                summary: String::new(),
                recent: Vec::new(),
                summarized: Vec::new(),
                outcome: CompactionOutcome::NothingToSummarize,
            };
        }

        let split = messages.len().saturating_sub(self.policy.keep_recent);
        let (older, recent) = messages.split_at(split);

        if older.is_empty() {
            return Compaction {
                summary: String::new(),
                recent: recent.to_vec(),
                summarized: Vec::new(),
                outcome: CompactionOutcome::NothingToSummarize,
            };
        }

        let previous = previous_summary
            .filter(|_| self.policy.fold_previous_summary)
            .filter(|s| !s.trim().is_empty());

        match self.generate_summary(older, previous).await {
            Ok(summary) => {
                debug!("Summarized {} messages, keeping {}", older.len(), recent.len());
                Compaction {
                    summary,
                    recent: recent.to_vec(),
                    summarized: older.iter().map(|m| m.id).collect(),
                    outcome: CompactionOutcome::Summarized,
                }
            }
            Err(e) => {
                warn!("Summarization failed, using fallback summary: {}", e);
                Compaction {
                    summary: fallback_summary(messages),
                    recent: messages.to_vec(),
                    summarized: Vec::new(),
                    outcome: CompactionOutcome::Fallback { reason: e.to_string() },
                }
            }
        }
    }

    async fn generate_summary(&self, older: &[Message], previous: Option<&str>) -> LlmResult<String> {
        let prompt = summary_prompt(older, previous, self.policy.max_summary_words);
        let request = ChatRequest::new(self.model.clone(), vec![ChatMessage::user(prompt)], self.call_policy);

        let response = self.provider.chat_completion(request).await?;
        let summary = response.content.trim();
        if summary.is_empty() {
            return Err(LlmError::EmptyResponse(self.model.clone()));
        }

        Ok(summary.to_string())
    }
}

/// Render messages as `ROLE: content` lines
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.label(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn summary_prompt(older: &[Message], previous: Option<&str>, max_words: usize) -> String {
    let mut transcript = String::new();
    if let Some(previous) = previous {
        transcript.push_str(&format!("Earlier summary: {}\n\n", previous.trim()));
    }
    transcript.push_str(&render_transcript(older));

    format!(
        "Please provide a concise summary (max {} words) of this conversation. \
         Focus on the main topics discussed and key points. \
         Do not include specific details, just the general themes:\n\n{}",
        max_words, transcript
    )
}

/// Deterministic synopsis built from every user turn in `messages`
pub fn fallback_summary(messages: &[Message]) -> String {
    let topics: Vec<String> = messages
        .iter()
        .filter(|m| m.role == MessageRole::User)
        .map(|m| truncate_with_ellipsis(&m.content, FALLBACK_TOPIC_CHARS))
        .collect();

    if topics.is_empty() {
        return FALLBACK_GENERIC.to_string();
    }

    format!("{}{}", FALLBACK_PREFIX, topics.join(", "))
}

//! Reply payloads returned to the command line

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Success,
    Error,
}

/// One model's answer in a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    pub model: String,
    pub status: ReplyStatus,
    /// The reply text, or the error message when `status` is `Error`
    pub response: String,
}

impl ModelReply {
    pub fn success(model: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            status: ReplyStatus::Success,
            response: response.into(),
        }
    }

    pub fn error(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            status: ReplyStatus::Error,
            response: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResponse {
    pub question: String,
    pub session_id: String,
    pub replies: Vec<ModelReply>,
    pub timestamp: DateTime<Utc>,
}

/// Answer from a single model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub session_id: String,
    pub model: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

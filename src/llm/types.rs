//! Common types for chat-completion providers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    /// Lowercase wire name, as sent to the model and stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    /// Upper-case label used when rendering transcripts
    pub fn label(&self) -> &'static str {
        match self {
            MessageRole::System => "SYSTEM",
            MessageRole::User => "USER",
            MessageRole::Assistant => "ASSISTANT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "system" => Some(MessageRole::System),
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `{role, content}` entry of the context sent to a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// Finish reason for a completion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Error,
}

/// Response from an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub model: String,
    pub content: String,
    pub usage: TokenUsage,
    pub finish_reason: Option<FinishReason>,
}

/// Sampling parameters chosen per call purpose
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CallPolicy {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CallPolicy {
    /// Ordinary assistant replies
    pub const REPLY: CallPolicy = CallPolicy {
        max_tokens: 1000,
        temperature: 0.7,
    };

    /// Conversation summaries: shorter and more deterministic
    pub const SUMMARY: CallPolicy = CallPolicy {
        max_tokens: 150,
        temperature: 0.3,
    };
}

/// Configuration for an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_type: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Model used when a request does not name one
    pub model: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub extra_headers: HashMap<String, String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: "openai".to_string(),
            api_key: None,
            base_url: None,
            model: "deepseek/deepseek-chat-v3.1:free".to_string(),
            timeout_seconds: 120,
            max_retries: 2,
            extra_headers: HashMap::new(),
        }
    }
}

/// Chat completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, policy: CallPolicy) -> Self {
        Self {
            model: Some(model.into()),
            messages,
            max_tokens: Some(policy.max_tokens),
            temperature: Some(policy.temperature),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_wire_format() {
        let message = ChatMessage::assistant("hi");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }

    #[test]
    fn test_role_parse_and_label() {
        assert_eq!(MessageRole::parse("USER"), Some(MessageRole::User));
        assert_eq!(MessageRole::parse("tool"), None);
        assert_eq!(MessageRole::Assistant.label(), "ASSISTANT");
        assert_eq!(MessageRole::System.to_string(), "system");
    }
}

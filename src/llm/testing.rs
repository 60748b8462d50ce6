//! Test doubles for provider-dependent code

use async_trait::async_trait;
use std::sync::Mutex;

use crate::llm::{
    errors::{LlmError, LlmResult},
    provider::LlmProvider,
    types::{ChatRequest, ProviderResponse, TokenUsage},
};

type Responder = dyn Fn(&ChatRequest) -> LlmResult<String> + Send + Sync;

/// Provider whose replies are computed by a closure; records every request
pub struct ScriptedProvider {
    responder: Box<Responder>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ChatRequest) -> LlmResult<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with the same text
    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Always fails as if the backend were unreachable
    pub fn failing() -> Self {
        Self::new(|_| Err(LlmError::ApiError("503: upstream unavailable".to_string())))
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat_completion(&self, request: ChatRequest) -> LlmResult<ProviderResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let content = (self.responder)(&request)?;
        Ok(ProviderResponse {
            model: request.model.clone().unwrap_or_else(|| "scripted".to_string()),
            content,
            usage: TokenUsage::default(),
            finish_reason: None,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }

    fn validate_config(&self) -> LlmResult<()> {
        Ok(())
    }
}

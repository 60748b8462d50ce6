//! OpenAI-compatible chat-completions provider (OpenAI, OpenRouter)

use async_trait::async_trait;
use std::time::Duration;
use reqwest::{Client, header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE}};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::llm::{
    provider::{LlmProvider, ProviderClientOptions, utils},
    types::{ChatRequest, ProviderResponse, ProviderConfig, TokenUsage, FinishReason},
    errors::{LlmError, LlmResult},
};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenAI API provider
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    client: Client,
    config: ProviderConfig,
    options: ProviderClientOptions,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let mut headers = HeaderMap::new();

        // Set API key
        if let Some(api_key) = &config.api_key {
            let auth_value = HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| LlmError::ConfigError(format!("Invalid API key: {}", e)))?;
            headers.insert(AUTHORIZATION, auth_value);
        } else {
            return Err(LlmError::ConfigError("API key is required".to_string()));
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Add extra headers
        for (key, value) in &config.extra_headers {
            let header_name: reqwest::header::HeaderName = key.parse()
                .map_err(|e| LlmError::ConfigError(format!("Invalid header name '{}': {}", key, e)))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| LlmError::ConfigError(format!("Invalid header value for '{}': {}", key, e)))?;
            headers.insert(header_name, header_value);
        }

        let options = ProviderClientOptions::from(&config);
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(options.timeout_seconds))
            .user_agent(&options.user_agent)
            .build()
            .map_err(|e| LlmError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            options,
        })
    }

    /// Get the API endpoint URL
    fn get_endpoint(&self) -> String {
        let base_url = self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!("{}/chat/completions", base_url.trim_end_matches('/'))
    }

    /// Execute request with retries
    async fn execute_request<T>(&self, request_body: serde_json::Value) -> LlmResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let mut last_error = None;

        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                utils::exponential_backoff_with_jitter(attempt, self.options.retry_delay_ms).await;
            }

            let response = self.client
                .post(self.get_endpoint())
                .json(&request_body)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    if resp.status().is_success() {
                        // A body that does not parse is malformed, not transient
                        return resp.json::<T>().await.map_err(LlmError::HttpError);
                    }

                    let status = resp.status();
                    let error_msg = utils::extract_error_message(resp).await;

                    let error = utils::error_for_status(status, error_msg);

                    if !utils::is_retryable_error(&error) || attempt == self.options.max_retries {
                        return Err(error);
                    }

                    last_error = Some(error);
                }
                Err(e) => {
                    let error = if e.is_timeout() {
                        LlmError::TimeoutError(e.to_string())
                    } else {
                        LlmError::HttpError(e)
                    };
                    if !utils::is_retryable_error(&error) || attempt == self.options.max_retries {
                        return Err(error);
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::ApiError("Unknown error".to_string())))
    }
}

/// Build the JSON body for a non-streaming completion
pub(crate) fn build_request_body(default_model: &str, request: &ChatRequest) -> serde_json::Value {
    let mut request_body = json!({
        "model": request.model.as_deref().unwrap_or(default_model),
        "messages": request.messages,
        "stream": false,
    });

    if let Some(max_tokens) = request.max_tokens {
        request_body["max_tokens"] = json!(max_tokens);
    }

    if let Some(temperature) = request.temperature {
        request_body["temperature"] = json!(temperature);
    }

    request_body
}

/// Extract the reply text from a parsed response; no content is an error
pub(crate) fn into_provider_response(model: &str, response: OpenAIResponse) -> LlmResult<ProviderResponse> {
    let choice = response.choices.into_iter().next()
        .ok_or_else(|| LlmError::EmptyResponse(model.to_string()))?;

    let content = choice.message
        .and_then(|message| message.content)
        .ok_or_else(|| LlmError::EmptyResponse(model.to_string()))?;

    let finish_reason = match choice.finish_reason.as_deref() {
        Some("stop") => Some(FinishReason::Stop),
        Some("length") => Some(FinishReason::Length),
        Some("content_filter") => Some(FinishReason::ContentFilter),
        Some("error") => Some(FinishReason::Error),
        _ => None,
    };

    let usage = response.usage.map(|usage| TokenUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }).unwrap_or_default();

    Ok(ProviderResponse {
        model: model.to_string(),
        content,
        usage,
        finish_reason,
    })
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn chat_completion(&self, request: ChatRequest) -> LlmResult<ProviderResponse> {
        let model = request.model.clone().unwrap_or_else(|| self.config.model.clone());
        debug!("Requesting completion from {} with {} messages", model, request.messages.len());

        let request_body = build_request_body(&self.config.model, &request);
        let response: OpenAIResponse = self.execute_request(request_body).await?;

        into_provider_response(&model, response)
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn validate_config(&self) -> LlmResult<()> {
        if self.config.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(LlmError::ConfigError("API key is required".to_string()));
        }

        if self.config.model.is_empty() {
            return Err(LlmError::ConfigError("Model is required".to_string()));
        }

        Ok(())
    }
}

// OpenAI API types
#[derive(Debug, Deserialize)]
pub(crate) struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    #[serde(default)]
    message: Option<OpenAIResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

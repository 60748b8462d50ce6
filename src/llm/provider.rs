//! Provider trait and factory for LLM providers

use async_trait::async_trait;
use crate::llm::{
    types::{ChatRequest, ProviderResponse, ProviderConfig},
    errors::{LlmError, LlmResult},
    openai::OpenAIProvider,
};

/// Trait for LLM providers
///
/// Implementations treat the model as a black box: messages in, text out,
/// or an error. Cancellation and timeouts are the implementation's concern
/// and surface as ordinary errors.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and get a response
    async fn chat_completion(&self, request: ChatRequest) -> LlmResult<ProviderResponse>;

    /// Get the provider name
    fn name(&self) -> &str;

    /// Get the default model name
    fn model(&self) -> &str;

    /// Validate the configuration
    fn validate_config(&self) -> LlmResult<()>;
}

/// Factory for creating LLM providers
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create a new provider from configuration
    pub fn create_provider(config: ProviderConfig) -> LlmResult<Box<dyn LlmProvider>> {
        match config.provider_type.as_str() {
            // OpenRouter speaks the OpenAI chat-completions dialect
            "openai" | "openrouter" => {
                let provider = OpenAIProvider::new(config)?;
                Ok(Box::new(provider))
            }
            _ => Err(LlmError::ConfigError(format!(
                "Unsupported provider type: {}",
                config.provider_type
            ))),
        }
    }
}

/// Provider client options for flexible configuration
#[derive(Debug, Clone)]
pub struct ProviderClientOptions {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl Default for ProviderClientOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 500,
            timeout_seconds: 120,
            user_agent: format!("colloquy/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl From<&ProviderConfig> for ProviderClientOptions {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            timeout_seconds: config.timeout_seconds,
            ..Self::default()
        }
    }
}

/// Utility functions for provider implementations
pub mod utils {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    /// Exponential backoff with jitter
    pub async fn exponential_backoff_with_jitter(attempt: u32, base_delay_ms: u64) {
        sleep(backoff_delay(attempt, base_delay_ms)).await;
    }

    pub(crate) fn backoff_delay(attempt: u32, base_delay_ms: u64) -> Duration {
        use rand::Rng;
        let jitter: f64 = {
            let mut rng = rand::thread_rng();
            rng.gen_range(0.0..=1.0)
        };
        let delay_ms = (base_delay_ms as f64 * 2.0_f64.powi(attempt as i32) * (1.0 + jitter)) as u64;
        Duration::from_millis(delay_ms.min(30000)) // Cap at 30 seconds
    }

    /// Check if an error is retryable
    pub fn is_retryable_error(error: &LlmError) -> bool {
        match error {
            LlmError::RateLimitError(_) | LlmError::ServerError(_) => true,
            LlmError::HttpError(e) => {
                e.is_timeout()
                    || e.status().map_or(false, |status| {
                        status.is_server_error() || status == 429 || status == 408
                    })
            }
            LlmError::TimeoutError(_) => true,
            _ => false,
        }
    }

    /// Map a non-success HTTP status onto the error vocabulary
    pub fn error_for_status(status: reqwest::StatusCode, message: String) -> LlmError {
        match status.as_u16() {
            429 => LlmError::RateLimitError(message),
            401 | 403 => LlmError::AuthError(message),
            408 => LlmError::TimeoutError(message),
            _ if status.is_server_error() => LlmError::ServerError(message),
            _ => LlmError::ApiError(message),
        }
    }

    /// Extract error message from HTTP response
    pub async fn extract_error_message(response: reqwest::Response) -> String {
        let status = response.status();
        match response.text().await {
            Ok(text) => {
                if let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) {
                    if let Some(error) = json.get("error") {
                        if let Some(message) = error.get("message") {
                            return format!("{}: {}", status, message.as_str().unwrap_or("Unknown error"));
                        }
                    }
                }
                format!("{}: {}", status, text)
            }
            Err(_) => format!("{}: Failed to read error response", status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let config = ProviderConfig {
            provider_type: "carrier-pigeon".to_string(),
            api_key: Some("key".to_string()),
            ..ProviderConfig::default()
        };
        assert!(matches!(
            ProviderFactory::create_provider(config),
            Err(LlmError::ConfigError(_))
        ));
    }

    #[test]
    fn test_factory_builds_openrouter() {
        let config = ProviderConfig {
            provider_type: "openrouter".to_string(),
            api_key: Some("key".to_string()),
            ..ProviderConfig::default()
        };
        let provider = ProviderFactory::create_provider(config).unwrap();
        assert_eq!(provider.name(), "openai");
        assert!(provider.validate_config().is_ok());
    }

    #[test]
    fn test_backoff_is_capped_and_grows() {
        let first = utils::backoff_delay(0, 100);
        let later = utils::backoff_delay(3, 100);
        assert!(first.as_millis() >= 100 && first.as_millis() <= 200);
        assert!(later.as_millis() >= 800);
        assert!(utils::backoff_delay(30, 1000).as_millis() <= 30000);
    }

    #[test]
    fn test_status_mapping_retries_server_errors() {
        use reqwest::StatusCode;

        for status in [StatusCode::INTERNAL_SERVER_ERROR, StatusCode::BAD_GATEWAY, StatusCode::SERVICE_UNAVAILABLE] {
            let error = utils::error_for_status(status, "upstream down".into());
            assert!(matches!(error, LlmError::ServerError(_)), "{}", status);
            assert!(utils::is_retryable_error(&error));
        }

        let timeout = utils::error_for_status(StatusCode::REQUEST_TIMEOUT, "late".into());
        assert!(utils::is_retryable_error(&timeout));
        assert!(utils::is_retryable_error(&utils::error_for_status(StatusCode::TOO_MANY_REQUESTS, "slow".into())));

        let auth = utils::error_for_status(StatusCode::UNAUTHORIZED, "bad key".into());
        assert!(matches!(auth, LlmError::AuthError(_)));
        assert!(!utils::is_retryable_error(&auth));
        assert!(!utils::is_retryable_error(&utils::error_for_status(StatusCode::BAD_REQUEST, "bad".into())));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(utils::is_retryable_error(&LlmError::RateLimitError("slow down".into())));
        assert!(utils::is_retryable_error(&LlmError::TimeoutError("late".into())));
        assert!(!utils::is_retryable_error(&LlmError::AuthError("nope".into())));
        assert!(!utils::is_retryable_error(&LlmError::EmptyResponse("m".into())));
    }
}

//! Core application logic and orchestration
//!
//! `ChatApp` ties the conversation service to the model endpoint: it records
//! each question and reply and picks the context every model call receives.

mod replies;

pub use replies::*;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    config::{Config, ModelEntry},
    llm::{CallPolicy, ChatMessage, ChatRequest, LlmProvider, LlmResult, MessageRole, ProviderFactory},
    session::{ConversationService, SqliteStore, Summarizer},
};

/// Fresh client session id: `session_<unix-millis>_<8 hex>`
pub fn generate_session_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("session_{}_{}", Utc::now().timestamp_millis(), &suffix[..8])
}

/// Open the conversation database under the configured data directory
pub async fn open_store(config: &Config) -> Result<SqliteStore> {
    if !config.data_dir.exists() {
        tokio::fs::create_dir_all(&config.data_dir).await.with_context(|| {
            format!("Failed to create data directory {}", config.data_dir.display())
        })?;
    }

    let db_path = config.database_path();
    SqliteStore::open(&db_path).with_context(|| format!("Failed to open database {}", db_path.display()))
}

/// Main application structure
pub struct ChatApp {
    service: Arc<ConversationService>,
    provider: Arc<dyn LlmProvider>,
    models: Vec<ModelEntry>,
    reply_policy: CallPolicy,
}

impl ChatApp {
    /// Open the conversation database and connect to the configured endpoint
    pub async fn new(config: &Config) -> Result<Self> {
        debug!("Creating new ChatApp instance");

        let store = open_store(config).await?;
        let provider: Arc<dyn LlmProvider> = Arc::from(ProviderFactory::create_provider(config.provider_config())?);
        provider.validate_config()?;

        let summarizer = Summarizer::new(provider.clone(), config.summary_model.clone(), config.compaction.clone())
            .with_call_policy(config.summary_policy);
        let service = ConversationService::new(Arc::new(store), summarizer);

        Ok(Self::from_parts(
            Arc::new(service),
            provider,
            config.models.clone(),
            config.reply_policy,
        ))
    }

    pub fn from_parts(
        service: Arc<ConversationService>,
        provider: Arc<dyn LlmProvider>,
        models: Vec<ModelEntry>,
        reply_policy: CallPolicy,
    ) -> Self {
        Self {
            service,
            provider,
            models,
            reply_policy,
        }
    }

    pub fn service(&self) -> &Arc<ConversationService> {
        &self.service
    }

    /// Ask one model, sending the (possibly compacted) history as context
    pub async fn ask_single(&self, model: &ModelEntry, question: &str, session_id: &str) -> Result<ChatReply> {
        info!("Asking {} in session {}", model.alias, session_id);

        let conversation = self.service.get_or_create(session_id).await?;
        let context = self.service.context_for_single_model(session_id, question).await;
        self.service
            .append_message(&conversation, MessageRole::User, question, None)
            .await?;

        let response = self
            .complete(&model.model, context)
            .await
            .with_context(|| format!("{} failed to answer", model.model))?;

        self.service
            .append_message(&conversation, MessageRole::Assistant, &response, Some(&model.model))
            .await?;

        Ok(ChatReply {
            session_id: conversation.session_id,
            model: model.model.clone(),
            response,
            timestamp: Utc::now(),
        })
    }

    /// Ask every catalog model concurrently with the user's turns as context
    pub async fn ask_all(&self, question: &str, session_id: &str) -> Result<ComparisonResponse> {
        info!("Asking {} models in session {}", self.models.len(), session_id);

        let conversation = self.service.get_or_create(session_id).await?;
        self.service
            .append_message(&conversation, MessageRole::User, question, None)
            .await?;

        let mut context = self.service.context_for_comparison(session_id).await;
        if context.is_empty() {
            context.push(ChatMessage::user(question));
        }

        let calls = self.models.iter().map(|entry| {
            let context = context.clone();
            async move { (entry, self.complete(&entry.model, context).await) }
        });

        let mut replies = Vec::with_capacity(self.models.len());
        for (entry, result) in join_all(calls).await {
            match result {
                Ok(response) => {
                    let stored = self
                        .service
                        .append_message(&conversation, MessageRole::Assistant, &response, Some(&entry.model))
                        .await;
                    match stored {
                        Ok(_) => replies.push(ModelReply::success(&entry.model, response)),
                        Err(e) => {
                            warn!("Could not record {} reply in session {}: {}", entry.model, session_id, e);
                            replies.push(ModelReply::error(&entry.model, format!("Error: {}", e)));
                        }
                    }
                }
                Err(e) => {
                    warn!("{} failed in session {}: {}", entry.model, session_id, e);
                    replies.push(ModelReply::error(&entry.model, format!("Error: {}", e)));
                }
            }
        }

        Ok(ComparisonResponse {
            question: question.to_string(),
            session_id: conversation.session_id,
            replies,
            timestamp: Utc::now(),
        })
    }

    async fn complete(&self, model: &str, context: Vec<ChatMessage>) -> LlmResult<String> {
        debug!("Calling {} with {} context messages", model, context.len());
        let request = ChatRequest::new(model, context, self.reply_policy);
        let response = self.provider.chat_completion(request).await?;
        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{testing::ScriptedProvider, LlmError};
    use crate::session::{store::MemoryStore, testing::FaultyStore, CompactionPolicy};

    fn catalog() -> Vec<ModelEntry> {
        vec![
            ModelEntry::new("alpha", "vendor/alpha"),
            ModelEntry::new("beta", "vendor/beta"),
        ]
    }

    fn app_with(provider: ScriptedProvider) -> (ChatApp, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let summarizer = Summarizer::new(provider.clone(), "vendor/alpha", CompactionPolicy::default());
        let service = ConversationService::new(Arc::new(MemoryStore::new()), summarizer);
        let app = ChatApp::from_parts(Arc::new(service), provider.clone(), catalog(), CallPolicy::REPLY);
        (app, provider)
    }

    fn echo_model() -> ScriptedProvider {
        ScriptedProvider::new(|request| {
            Ok(format!("{} says hi", request.model.as_deref().unwrap_or_default()))
        })
    }

    #[test]
    fn test_generated_session_id_shape() {
        let id = generate_session_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "session");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_ask_single_records_turns() {
        let (app, provider) = app_with(echo_model());
        let models = catalog();
        let alpha = &models[0];

        let reply = app.ask_single(alpha, "hello?", "s1").await.unwrap();
        assert_eq!(reply.response, "vendor/alpha says hi");
        assert_eq!(reply.model, "vendor/alpha");

        app.ask_single(alpha, "again?", "s1").await.unwrap();

        let history = app.service().history("s1").await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[1].model_name.as_deref(), Some("vendor/alpha"));

        // Second call sees the first exchange plus the new question, once
        let requests = provider.requests();
        assert_eq!(requests[0].messages, vec![ChatMessage::user("hello?")]);
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(requests[1].messages[2], ChatMessage::user("again?"));
        assert_eq!(requests[1].max_tokens, Some(1000));
    }

    #[tokio::test]
    async fn test_ask_single_surfaces_provider_error() {
        let (app, _) = app_with(ScriptedProvider::failing());
        let result = app.ask_single(&catalog()[0], "hello?", "s1").await;

        assert!(result.is_err());
        let history = app.service().history("s1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn test_ask_all_isolates_failures() {
        let provider = ScriptedProvider::new(|request| match request.model.as_deref() {
            Some("vendor/beta") => Err(LlmError::TimeoutError("120s elapsed".to_string())),
            _ => Ok("fine".to_string()),
        });
        let (app, _) = app_with(provider);

        let response = app.ask_all("compare?", "cmp").await.unwrap();

        assert_eq!(response.question, "compare?");
        assert_eq!(response.session_id, "cmp");
        assert_eq!(response.replies.len(), 2);
        assert!(response.replies[0].is_success());
        assert_eq!(response.replies[0].model, "vendor/alpha");
        assert_eq!(response.replies[1].status, ReplyStatus::Error);
        assert!(response.replies[1].response.starts_with("Error:"));

        // Question plus the one successful reply
        let history = app.service().history("cmp").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].model_name.as_deref(), Some("vendor/alpha"));
    }

    #[tokio::test]
    async fn test_ask_all_keeps_other_replies_when_one_cannot_be_stored() {
        let store = Arc::new(FaultyStore::default());
        store.reject_messages_from("vendor/alpha");
        let provider = Arc::new(echo_model());
        let summarizer = Summarizer::new(provider.clone(), "vendor/alpha", CompactionPolicy::default());
        let service = ConversationService::new(store.clone(), summarizer);
        let app = ChatApp::from_parts(Arc::new(service), provider, catalog(), CallPolicy::REPLY);

        let response = app.ask_all("compare?", "cmp").await.unwrap();

        assert_eq!(response.replies[0].model, "vendor/alpha");
        assert_eq!(response.replies[0].status, ReplyStatus::Error);
        assert!(response.replies[0].response.contains("disk full"));
        assert_eq!(response.replies[1], ModelReply::success("vendor/beta", "vendor/beta says hi"));

        let history = app.service().history("cmp").await.unwrap();
        let recorded: Vec<_> = history.iter().map(|m| (m.role, m.model_name.as_deref())).collect();
        assert_eq!(
            recorded,
            vec![(MessageRole::User, None), (MessageRole::Assistant, Some("vendor/beta"))]
        );
    }

    #[tokio::test]
    async fn test_ask_all_sends_only_user_turns() {
        let (app, provider) = app_with(echo_model());

        app.ask_all("first", "cmp").await.unwrap();
        app.ask_all("second", "cmp").await.unwrap();

        let requests = provider.requests();
        assert_eq!(requests.len(), 4);
        for request in &requests[2..] {
            assert_eq!(
                request.messages,
                vec![ChatMessage::user("first"), ChatMessage::user("second")]
            );
        }
    }
}

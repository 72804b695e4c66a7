use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest, Role,
    },
    Client,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

use crate::config::Config;
use crate::error::EngineError;
use crate::services::diagnostics::WarningDedup;
use crate::services::engine::TextCompletion;

const SYSTEM_PROMPT: &str = "You translate spreadsheet questions into JSON query plans. Reply with JSON only.";

/// OpenAI-compatible chat completion used as the planner's text callback.
/// Blocking: call it from a worker thread, never from inside the runtime.
pub struct OpenAiCompleter {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
    runtime: Handle,
    dedup: Arc<WarningDedup>,
}

impl OpenAiCompleter {
    /// `None` when no API key is configured.
    pub fn from_config(config: &Config, runtime: Handle, dedup: Arc<WarningDedup>) -> Option<Self> {
        let key = config.openai_key.as_deref()?;
        let mut openai = OpenAIConfig::new().with_api_key(key);
        if let Some(base) = &config.llm_base_url {
            openai = openai.with_api_base(base);
        }
        Some(Self {
            client: Client::with_config(openai),
            model: config.llm_model.clone(),
            timeout: config.llm_timeout,
            runtime,
            dedup,
        })
    }

    async fn chat(&self, prompt: &str) -> Result<String, EngineError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: SYSTEM_PROMPT.to_string(),
                name: None,
                role: Role::System,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
                name: None,
                role: Role::User,
            }),
        ];

        let request = CreateChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(0.1),
            ..Default::default()
        };

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| EngineError::Completion(e.to_string()))?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| EngineError::Completion("completion returned no content".to_string()))
    }
}

impl TextCompletion for OpenAiCompleter {
    fn complete(&self, prompt: &str) -> Result<String, EngineError> {
        let start = std::time::Instant::now();
        let result = self.runtime.block_on(async {
            match tokio::time::timeout(self.timeout, self.chat(prompt)).await {
                Ok(inner) => inner,
                Err(_) => Err(EngineError::Completion(format!("no reply within {:?}", self.timeout))),
            }
        });
        match &result {
            Ok(text) => tracing::info!("LLM reply from {} ({} chars) in {:?}", self.model, text.len(), start.elapsed()),
            Err(e) => {
                let signature = format!("llm:{}:{}", self.model, e);
                self.dedup.warn_once(&signature, &format!("LLM completion failed: {}", e));
            }
        }
        result
    }
}

use super::openai::OpenAiCompatClient;
use super::{BackendKind, ChatBackend, ChatMessage, ChatOptions, TokenStream};
use crate::config::DeepSeekConfig;
use crate::utils::error::ApiError;

/// Remote DeepSeek backend (OpenAI-compatible API, Bearer auth).
pub struct DeepSeekBackend {
    client: OpenAiCompatClient,
}

impl DeepSeekBackend {
    pub fn new(config: DeepSeekConfig) -> Self {
        Self {
            client: OpenAiCompatClient::new(
                config.base_url,
                Some(config.api_key),
                config.model,
            ),
        }
    }
}

#[async_trait::async_trait]
impl ChatBackend for DeepSeekBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DeepSeek
    }

    fn default_model(&self) -> &str {
        &self.client.default_model
    }

    async fn is_available(&self) -> bool {
        self.client.probe().await
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        options: &ChatOptions,
    ) -> Result<String, ApiError> {
        self.client.chat(messages, options).await
    }

    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        options: &ChatOptions,
    ) -> Result<TokenStream, ApiError> {
        self.client.chat_stream(messages, options).await
    }
}

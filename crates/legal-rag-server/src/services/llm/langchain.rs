use super::openai::OpenAiCompatClient;
use super::{BackendKind, ChatBackend, ChatMessage, ChatOptions, TokenStream};
use crate::config::LangChainConfig;
use crate::utils::error::ApiError;

/// Local alternate client, reported to clients under the langchain4j tag.
/// Speaks the same OpenAI-compatible wire format as DeepSeek but without
/// auth, against a locally hosted server.
pub struct LangChainBackend {
    client: OpenAiCompatClient,
}

impl LangChainBackend {
    pub fn new(config: LangChainConfig) -> Self {
        Self {
            client: OpenAiCompatClient::new(config.base_url, None, config.model),
        }
    }
}

#[async_trait::async_trait]
impl ChatBackend for LangChainBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LangChain4j
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

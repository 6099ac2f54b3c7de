use super::{BackendKind, ChatBackend, ChatMessage, ChatOptions, TokenStream};
use crate::config::OllamaConfig;
use crate::utils::error::ApiError;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

/// Local Ollama backend over its native /api/chat endpoint.
/// Streaming responses are newline-delimited JSON objects, not SSE.
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url,
            model: config.model,
        }
    }

    fn build_request(
        &self,
        messages: Vec<ChatMessage>,
        options: &ChatOptions,
        stream: bool,
    ) -> OllamaChatRequest {
        OllamaChatRequest {
            model: options.model.clone().unwrap_or_else(|| self.model.clone()),
            messages,
            stream,
            options: OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        }
    }
}

#[async_trait::async_trait]
impl ChatBackend for OllamaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> bool {
        matches!(
            self.client
                .get(format!("{}/api/tags", self.base_url))
                .send()
                .await,
            Ok(r) if r.status().is_success()
        )
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        options: &ChatOptions,
    ) -> Result<String, ApiError> {
        debug!("ollama chat with {} messages", messages.len());

        let request = self.build_request(messages, options, false);

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::ModelUnavailable(format!("connect failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::ModelUnavailable(format!("{status}: {body}")));
        }

        let body: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| ApiError::ModelUnavailable(format!("bad response body: {e}")))?;

        body.message
            .map(|m| m.content)
            .ok_or_else(|| ApiError::ModelUnavailable("empty message".to_string()))
    }

    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        options: &ChatOptions,
    ) -> Result<TokenStream, ApiError> {
        debug!("ollama streaming chat with {} messages", messages.len());

        let request = self.build_request(messages, options, true);

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::ModelUnavailable(format!("connect failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::ModelUnavailable(format!("{status}: {body}")));
        }

        let mut bytes = response.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut buf = String::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = chunk
                    .map_err(|e| ApiError::ModelUnavailable(format!("stream error: {e}")))?;
                buf.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);

                    if line.is_empty() {
                        continue;
                    }

                    if let Ok(parsed) = serde_json::from_str::<OllamaChatResponse>(&line) {
                        if let Some(message) = parsed.message {
                            if !message.content.is_empty() {
                                yield message.content;
                            }
                        }
                        if parsed.done {
                            return;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

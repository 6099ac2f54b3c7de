//! Shared client for OpenAI-compatible chat completion servers
//! (DeepSeek remote API and the local alternate server speak the same
//! wire format).

use super::{ChatMessage, ChatOptions, TokenStream};
use crate::utils::error::ApiError;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

pub struct OpenAiCompatClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    pub default_model: String,
}

impl OpenAiCompatClient {
    pub fn new(base_url: String, api_key: Option<String>, default_model: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
            default_model,
        }
    }

    fn request(
        &self,
        messages: Vec<ChatMessage>,
        options: &ChatOptions,
        stream: bool,
    ) -> reqwest::RequestBuilder {
        let body = ChatCompletionRequest {
            model: options
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream,
        };

        let mut builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&body);

        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        builder
    }

    pub async fn probe(&self) -> bool {
        let mut builder = self.client.get(format!("{}/v1/models", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        matches!(builder.send().await, Ok(r) if r.status().is_success())
    }

    pub async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        options: &ChatOptions,
    ) -> Result<String, ApiError> {
        debug!("chat completion with {} messages", messages.len());

        let response = self
            .request(messages, options, false)
            .send()
            .await
            .map_err(|e| ApiError::ModelUnavailable(format!("connect failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::ModelUnavailable(format!("{status}: {body}")));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ApiError::ModelUnavailable(format!("bad response body: {e}")))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ApiError::ModelUnavailable("empty choices".to_string()))
    }

    /// Streaming completion over the `data:` SSE framing. Lines may be
    /// split across network chunks, so decode through a line buffer.
    pub async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        options: &ChatOptions,
    ) -> Result<TokenStream, ApiError> {
        debug!("streaming chat completion with {} messages", messages.len());

        let response = self
            .request(messages, options, true)
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

                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };

                    if payload == "[DONE]" {
                        return;
                    }

                    if let Ok(parsed) = serde_json::from_str::<ChatCompletionChunk>(payload) {
                        if let Some(content) = parsed
                            .choices
                            .first()
                            .and_then(|c| c.delta.content.as_ref())
                        {
                            if !content.is_empty() {
                                yield content.clone();
                            }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

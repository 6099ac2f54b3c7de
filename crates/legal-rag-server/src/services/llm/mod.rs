pub mod deepseek;
pub mod langchain;
pub mod ollama;
pub mod openai;

use crate::utils::error::ApiError;
use crate::utils::limiters::Limiters;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use deepseek::DeepSeekBackend;
pub use langchain::LangChainBackend;
pub use ollama::OllamaBackend;

/// Ordered token deltas; the stream ends exactly once, either by running
/// dry (done) or by yielding a single Err.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ApiError>> + Send>>;

/// The three concrete chat backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendKind {
    Ollama,
    DeepSeek,
    LangChain4j,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::DeepSeek => "deepseek",
            Self::LangChain4j => "langchain4j",
        }
    }

    /// Per-backend memory table; windows never mix across backends.
    pub fn memory_table(&self) -> &'static str {
        match self {
            Self::Ollama => "chat_memory_ollama",
            Self::DeepSeek => "chat_memory_deepseek",
            Self::LangChain4j => "chat_memory_langchain4j",
        }
    }

    pub fn all() -> &'static [BackendKind] {
        &[Self::Ollama, Self::DeepSeek, Self::LangChain4j]
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "deepseek" => Ok(Self::DeepSeek),
            "langchain4j" => Ok(Self::LangChain4j),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

/// Uniform chat capability over one concrete backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn default_model(&self) -> &str;

    async fn is_available(&self) -> bool;

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        options: &ChatOptions,
    ) -> Result<String, ApiError>;

    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        options: &ChatOptions,
    ) -> Result<TokenStream, ApiError>;
}

/// Routing table over the registered backends. Selection is by explicit
/// model name when given, otherwise by the caller's mode default; a
/// failing backend is only replaced at selection time, never mid-stream.
pub struct ModelDispatcher {
    backends: HashMap<BackendKind, Arc<dyn ChatBackend>>,
    limiters: Arc<Limiters>,
    chat_timeout: Duration,
    stream_timeout: Duration,
}

impl ModelDispatcher {
    pub fn new(
        backends: Vec<Arc<dyn ChatBackend>>,
        limiters: Arc<Limiters>,
        chat_timeout_seconds: u64,
        stream_timeout_seconds: u64,
    ) -> Self {
        let backends = backends.into_iter().map(|b| (b.kind(), b)).collect();

        Self {
            backends,
            limiters,
            chat_timeout: Duration::from_secs(chat_timeout_seconds),
            stream_timeout: Duration::from_secs(stream_timeout_seconds),
        }
    }

    fn backend(&self, kind: BackendKind) -> Result<&Arc<dyn ChatBackend>, ApiError> {
        self.backends
            .get(&kind)
            .ok_or_else(|| ApiError::ModelUnavailable(format!("{} not registered", kind.as_str())))
    }

    /// Map an explicit model name to its backend; unknown names fall back
    /// to the mode default.
    pub fn resolve(&self, model_name: Option<&str>, mode_default: BackendKind) -> BackendKind {
        let Some(name) = model_name else {
            return mode_default;
        };

        if name.to_ascii_lowercase().starts_with("deepseek") {
            return BackendKind::DeepSeek;
        }

        for (kind, backend) in &self.backends {
            if backend.default_model() == name {
                return *kind;
            }
        }

        mode_default
    }

    /// Health-checked selection: prefer the requested backend, otherwise
    /// fall back through the remaining ones in declaration order.
    pub async fn select_available(&self, preferred: BackendKind) -> Result<BackendKind, ApiError> {
        if let Ok(backend) = self.backend(preferred) {
            if backend.is_available().await {
                return Ok(preferred);
            }
            warn!("backend {} unavailable, falling back", preferred.as_str());
        }

        for kind in BackendKind::all() {
            if *kind == preferred {
                continue;
            }
            if let Ok(backend) = self.backend(*kind) {
                if backend.is_available().await {
                    return Ok(*kind);
                }
            }
        }

        Err(ApiError::ModelUnavailable(
            "no chat backend is reachable".to_string(),
        ))
    }

    /// Display label persisted in message metadata, e.g.
    /// "deepseek-chat (deepseek)".
    pub fn model_label(&self, kind: BackendKind, options: &ChatOptions) -> String {
        let model = options
            .model
            .clone()
            .or_else(|| {
                self.backends
                    .get(&kind)
                    .map(|b| b.default_model().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());

        format!("{} ({})", model, kind.as_str())
    }

    /// Blocking chat completion.
    pub async fn chat(
        &self,
        kind: BackendKind,
        messages: Vec<ChatMessage>,
        options: &ChatOptions,
    ) -> Result<String, ApiError> {
        let backend = self.backend(kind)?;

        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.llm_generate.clone(),
            self.limiters.acquire_timeout,
            "llm_generate",
        )
        .await
        .map_err(|e| ApiError::ModelUnavailable(e.to_string()))?;

        debug!(wait_ms = wait.as_millis() as u64, op = "llm_generate", "wait_queue");

        tokio::time::timeout(self.chat_timeout, backend.chat(messages, options))
            .await
            .map_err(|_| ApiError::ModelTimeout(self.chat_timeout.as_secs()))?
    }

    /// Streaming chat. The returned stream's deltas are in model-emission
    /// order; errors surface as the stream's single terminal Err item.
    pub async fn chat_stream(
        &self,
        kind: BackendKind,
        messages: Vec<ChatMessage>,
        options: &ChatOptions,
    ) -> Result<TokenStream, ApiError> {
        let backend = self.backend(kind)?;

        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.llm_stream.clone(),
            self.limiters.acquire_timeout,
            "llm_stream",
        )
        .await
        .map_err(|e| ApiError::ModelUnavailable(e.to_string()))?;

        debug!(wait_ms = wait.as_millis() as u64, op = "llm_stream", "wait_queue");

        tokio::time::timeout(self.stream_timeout, backend.chat_stream(messages, options))
            .await
            .map_err(|_| ApiError::ModelTimeout(self.stream_timeout.as_secs()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_wire_names() {
        assert_eq!(BackendKind::LangChain4j.as_str(), "langchain4j");
        assert_eq!("DEEPSEEK".to_lowercase().parse::<BackendKind>().unwrap(), BackendKind::DeepSeek);
    }

    #[test]
    fn test_memory_tables_distinct() {
        let tables: std::collections::HashSet<_> = BackendKind::all()
            .iter()
            .map(|b| b.memory_table())
            .collect();
        assert_eq!(tables.len(), BackendKind::all().len());
    }
}

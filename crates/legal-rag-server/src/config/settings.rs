use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    pub models: ModelsConfig,
    pub rag: RagConfig,
    pub aggregator: AggregatorConfig,
    pub memory: MemoryConfig,
    pub stream: StreamConfig,
    pub review: ReviewConfig,
    pub timeouts: TimeoutsConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub api_key: Option<String>,
    /// Per-call truncation target in estimated tokens.
    #[serde(default = "default_embedding_max_tokens")]
    pub max_tokens: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelsConfig {
    pub ollama: OllamaConfig,
    pub deepseek: DeepSeekConfig,
    pub langchain: LangChainConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeepSeekConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LangChainConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RagConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_top_k")]
    pub retrieval_top_k: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AggregatorConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            similarity_threshold: default_similarity_threshold(),
            rrf_k: default_rrf_k(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StreamConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReviewConfig {
    #[serde(default = "default_review_workers")]
    pub workers: usize,
    #[serde(default = "default_max_file_mb")]
    pub max_file_mb: usize,
    #[serde(default = "default_sse_timeout_minutes")]
    pub sse_timeout_minutes: u64,
    pub upload_dir: String,
    /// Law passages retrieved as analysis context per review.
    #[serde(default = "default_law_context_k")]
    pub law_context_k: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TimeoutsConfig {
    #[serde(default = "default_embed_timeout")]
    pub embed_seconds: u64,
    #[serde(default = "default_search_timeout")]
    pub search_seconds: u64,
    #[serde(default = "default_chat_timeout")]
    pub chat_seconds: u64,
    #[serde(default = "default_stream_timeout")]
    pub stream_seconds: u64,
    #[serde(default = "default_persist_timeout")]
    pub persist_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_embedding_concurrency")]
    pub embedding_concurrency: usize,
    #[serde(default = "default_search_concurrency")]
    pub search_concurrency: usize,
    #[serde(default = "default_llm_concurrency")]
    pub llm_generate_concurrency: usize,
    #[serde(default = "default_llm_concurrency")]
    pub llm_stream_concurrency: usize,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_embedding_max_tokens() -> usize { 500 }
fn default_chunk_size() -> usize { 1000 }
fn default_chunk_overlap() -> usize { 100 }
fn default_top_k() -> usize { 10 }
fn default_max_results() -> usize { 10 }
fn default_similarity_threshold() -> f64 { 0.85 }
fn default_rrf_k() -> f64 { 60.0 }
fn default_window_size() -> usize { 10 }
fn default_queue_capacity() -> usize { 64 }
fn default_review_workers() -> usize { 4 }
fn default_max_file_mb() -> usize { 50 }
fn default_sse_timeout_minutes() -> u64 { 20 }
fn default_law_context_k() -> usize { 5 }
fn default_embed_timeout() -> u64 { 30 }
fn default_search_timeout() -> u64 { 5 }
fn default_chat_timeout() -> u64 { 120 }
fn default_stream_timeout() -> u64 { 1200 }
fn default_persist_timeout() -> u64 { 5 }
fn default_embedding_concurrency() -> usize { 8 }
fn default_search_concurrency() -> usize { 8 }
fn default_llm_concurrency() -> usize { 4 }
fn default_acquire_timeout_ms() -> u64 { 10_000 }

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(true))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}

use crate::config::EmbeddingConfig;
use crate::document::TextChunker;
use crate::utils::error::ApiError;
use crate::utils::limiters::Limiters;
use crate::utils::retry;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    input: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for the remote embedding model (OpenAI-compatible
/// /v1/embeddings). Over-long inputs are truncated at an optimal split
/// point before submission; transient failures are retried with backoff.
#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    base_url: String,
    pub dimension: usize,
    model_name: String,
    api_key: Option<String>,
    truncator: Arc<TextChunker>,
    cache: Arc<RwLock<HashMap<String, Vec<f32>>>>,
    limiters: Arc<Limiters>,
    timeout: Duration,
}

impl EmbeddingService {
    pub fn new(
        config: EmbeddingConfig,
        truncator: Arc<TextChunker>,
        limiters: Arc<Limiters>,
        timeout_seconds: u64,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url,
            dimension: config.dimension,
            model_name: config.model,
            api_key: config.api_key,
            truncator,
            cache: Arc::new(RwLock::new(HashMap::new())),
            limiters,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    /// Map a single text to a dense vector of the configured dimension.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let input = self.truncator.truncate_for_embedding(text);

        // 1. Check cache
        {
            let cache = self.cache.read().await;
            if let Some(embedding) = cache.get(&input) {
                debug!("Embedding cache hit ({} chars)", input.chars().count());
                return Ok(embedding.clone());
            }
        }

        let embedding = retry::with_backoff("embed", 3, || self.embed_once(&input)).await?;

        // 2. Store in cache
        {
            let mut cache = self.cache.write().await;
            cache.insert(input, embedding.clone());
        }

        Ok(embedding)
    }

    /// Batch variant; preserves input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let mut all = Vec::with_capacity(texts.len());

        for text in texts {
            all.push(self.embed(text).await?);
        }

        Ok(all)
    }

    async fn embed_once(&self, input: &str) -> Result<Vec<f32>, ApiError> {
        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.embedding.clone(),
            self.limiters.acquire_timeout,
            "embedding",
        )
        .await
        .map_err(|e| ApiError::EmbeddingUnavailable(e.to_string()))?;

        debug!(wait_ms = wait.as_millis() as u64, op = "embedding", "wait_queue");

        let request = EmbeddingRequest {
            input: input.to_string(),
            model: self.model_name.clone(),
        };

        let url = format!("{}/v1/embeddings", self.base_url);
        let mut request_builder = self.client.post(&url);

        if let Some(key) = &self.api_key {
            request_builder = request_builder.header("Authorization", format!("Bearer {key}"));
        }

        let exec_start = Instant::now();

        let send = request_builder.json(&request).send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| {
                ApiError::EmbeddingUnavailable(format!(
                    "timeout after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| ApiError::EmbeddingUnavailable(format!("connect failed: {e}")))?;

        debug!(exec_ms = exec_start.elapsed().as_millis() as u64, op = "embedding", "exec");

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return if status.is_client_error() {
                Err(ApiError::EmbeddingBadRequest(format!("{status}: {body}")))
            } else {
                Err(ApiError::EmbeddingUnavailable(format!("{status}: {body}")))
            };
        }

        let response_body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ApiError::EmbeddingUnavailable(format!("bad response body: {e}")))?;

        let embedding = response_body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                ApiError::EmbeddingBadRequest("empty embedding returned".to_string())
            })?;

        if embedding.len() != self.dimension {
            return Err(ApiError::EmbeddingBadRequest(format!(
                "dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }

        Ok(embedding)
    }
}

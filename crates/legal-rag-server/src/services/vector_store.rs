use crate::database::{NewSegment, Repository, SegmentMatch};
use crate::utils::error::ApiError;
use crate::utils::limiters::Limiters;
use crate::utils::retry;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Vector store over the pgvector-backed segments table.
///
/// Similarity metric is cosine: search orders by pgvector `<=>` distance
/// and reports score = 1 - distance, descending.
#[derive(Clone)]
pub struct VectorStore {
    repository: Arc<Repository>,
    dimension: usize,
    limiters: Arc<Limiters>,
    search_timeout: Duration,
}

impl VectorStore {
    pub fn new(
        repository: Arc<Repository>,
        dimension: usize,
        limiters: Arc<Limiters>,
        search_timeout_seconds: u64,
    ) -> Self {
        Self {
            repository,
            dimension,
            limiters,
            search_timeout: Duration::from_secs(search_timeout_seconds),
        }
    }

    pub async fn insert(&self, segment: NewSegment) -> Result<(), ApiError> {
        self.insert_batch(vec![segment]).await
    }

    pub async fn insert_batch(&self, segments: Vec<NewSegment>) -> Result<(), ApiError> {
        for seg in &segments {
            if seg.embedding.as_slice().len() != self.dimension {
                return Err(ApiError::InternalError(format!(
                    "segment dimension {} != store dimension {}",
                    seg.embedding.as_slice().len(),
                    self.dimension
                )));
            }
        }

        self.repository
            .insert_segments(&segments)
            .await
            .map_err(|e| ApiError::VectorStoreUnavailable(e.to_string()))
    }

    /// Top-k cosine search with optional metadata equality filter.
    /// Retried with backoff; an empty corpus returns an empty list.
    pub async fn search(
        &self,
        query_vector: Vec<f32>,
        top_k: usize,
        filter: Option<serde_json::Value>,
    ) -> Result<Vec<SegmentMatch>, ApiError> {
        if query_vector.len() != self.dimension {
            return Err(ApiError::InternalError(format!(
                "query dimension {} != store dimension {}",
                query_vector.len(),
                self.dimension
            )));
        }

        let vector = Vector::from(query_vector);

        retry::with_backoff("vector_search", 3, || {
            self.search_once(vector.clone(), top_k, filter.clone())
        })
        .await
    }

    async fn search_once(
        &self,
        vector: Vector,
        top_k: usize,
        filter: Option<serde_json::Value>,
    ) -> Result<Vec<SegmentMatch>, ApiError> {
        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.vector_search.clone(),
            self.limiters.acquire_timeout,
            "vector_search",
        )
        .await
        .map_err(|e| ApiError::VectorStoreUnavailable(e.to_string()))?;

        debug!(wait_ms = wait.as_millis() as u64, op = "vector_search", "wait_queue");

        let exec_start = Instant::now();

        let search = self
            .repository
            .search_segments(vector, top_k as i64, filter.as_ref());

        let matches = tokio::time::timeout(self.search_timeout, search)
            .await
            .map_err(|_| {
                ApiError::VectorStoreUnavailable(format!(
                    "search timeout after {}s",
                    self.search_timeout.as_secs()
                ))
            })?
            .map_err(|e| ApiError::VectorStoreUnavailable(e.to_string()))?;

        debug!(
            exec_ms = exec_start.elapsed().as_millis() as u64,
            hits = matches.len(),
            op = "vector_search",
            "exec"
        );

        Ok(matches)
    }

    /// Transactional per-document delete: readers see all segments of the
    /// document or none.
    pub async fn delete_by_document(&self, doc_id: i64) -> Result<u64, ApiError> {
        self.repository
            .delete_segments_by_document(doc_id)
            .await
            .map_err(|e| ApiError::VectorStoreUnavailable(e.to_string()))
    }

    pub async fn count(&self) -> Result<i64, ApiError> {
        self.repository
            .vector_count()
            .await
            .map_err(|e| ApiError::VectorStoreUnavailable(e.to_string()))
    }

    pub async fn last_updated(&self) -> Result<Option<DateTime<Utc>>, ApiError> {
        self.repository
            .vector_last_updated()
            .await
            .map_err(|e| ApiError::VectorStoreUnavailable(e.to_string()))
    }
}

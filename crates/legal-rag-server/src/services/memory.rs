use crate::database::{MemoryMessage, Repository};
use crate::services::llm::BackendKind;
use crate::utils::error::ApiError;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Persistent sliding-window chat memory, keyed by
/// (conversation_id, model backend). Windows for different backends never
/// mix: each backend has its own table, so clearing Ollama memory leaves
/// DeepSeek memory for the same conversation untouched.
pub struct ChatMemoryStore {
    repository: Arc<Repository>,
    window_size: usize,
    persist_timeout: Duration,
    /// Per-key mutation serialization; reads go straight to the store.
    locks: DashMap<(String, BackendKind), Arc<Mutex<()>>>,
}

impl ChatMemoryStore {
    pub fn new(
        repository: Arc<Repository>,
        window_size: usize,
        persist_timeout_seconds: u64,
    ) -> Self {
        Self {
            repository,
            window_size,
            persist_timeout: Duration::from_secs(persist_timeout_seconds),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, conversation_id: &str, backend: BackendKind) -> Arc<Mutex<()>> {
        self.locks
            .entry((conversation_id.to_string(), backend))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn append(
        &self,
        conversation_id: &str,
        backend: BackendKind,
        role: &str,
        content: &str,
    ) -> Result<(), ApiError> {
        let lock = self.lock_for(conversation_id, backend);
        let _guard = lock.lock().await;

        let append = self
            .repository
            .memory_append(backend.memory_table(), conversation_id, role, content);

        tokio::time::timeout(self.persist_timeout, append)
            .await
            .map_err(|_| ApiError::DatabaseError("memory persist timeout".to_string()))?
            .map_err(ApiError::from)?;

        debug!(
            conversation_id,
            backend = backend.as_str(),
            role,
            "memory append"
        );

        Ok(())
    }

    /// Window of the most recent messages, oldest -> newest.
    pub async fn history(
        &self,
        conversation_id: &str,
        backend: BackendKind,
    ) -> Result<Vec<MemoryMessage>, ApiError> {
        let history = self
            .repository
            .memory_history(
                backend.memory_table(),
                conversation_id,
                self.window_size as i64,
            )
            .await?;

        Ok(history)
    }

    pub async fn clear(
        &self,
        conversation_id: &str,
        backend: BackendKind,
    ) -> Result<u64, ApiError> {
        let lock = self.lock_for(conversation_id, backend);
        let _guard = lock.lock().await;

        let removed = self
            .repository
            .memory_clear(backend.memory_table(), conversation_id)
            .await?;

        debug!(
            conversation_id,
            backend = backend.as_str(),
            removed,
            "memory cleared"
        );

        Ok(removed)
    }

    /// Clear the conversation's windows for every backend.
    pub async fn clear_all(&self, conversation_id: &str) -> Result<u64, ApiError> {
        let mut total = 0;

        for backend in BackendKind::all() {
            total += self.clear(conversation_id, *backend).await?;
        }

        Ok(total)
    }

    pub async fn exists(
        &self,
        conversation_id: &str,
        backend: BackendKind,
    ) -> Result<bool, ApiError> {
        Ok(self.count(conversation_id, backend).await? > 0)
    }

    pub async fn count(
        &self,
        conversation_id: &str,
        backend: BackendKind,
    ) -> Result<i64, ApiError> {
        let count = self
            .repository
            .memory_count(backend.memory_table(), conversation_id)
            .await?;

        Ok(count)
    }
}

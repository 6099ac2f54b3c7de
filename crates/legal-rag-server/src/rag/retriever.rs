use crate::document::clean_source;
use crate::services::embedding::EmbeddingService;
use crate::services::vector_store::VectorStore;
use crate::utils::error::ApiError;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetrieverKind {
    /// Laws, regulations and cases.
    LegalCorpus,
    /// Indexed contract templates.
    ContractTemplates,
}

impl RetrieverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LegalCorpus => "legal_corpus",
            Self::ContractTemplates => "contract_templates",
        }
    }
}

/// One retrieved passage with its source attribution and the retriever's
/// opaque score.
#[derive(Debug, Clone)]
pub struct Content {
    pub text: String,
    pub source: String,
    pub metadata: serde_json::Value,
    pub score: f32,
}

/// Retrieval seam, mockable in service tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ContentRetriever: Send + Sync {
    fn kind(&self) -> RetrieverKind;

    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Content>, ApiError>;

    /// Retrieval narrowed by an extra metadata equality filter (e.g. a
    /// normalized article tag). Default ignores the filter.
    async fn retrieve_with_filter(
        &self,
        query: &str,
        top_k: usize,
        _filter: Option<serde_json::Value>,
    ) -> Result<Vec<Content>, ApiError> {
        self.retrieve(query, top_k).await
    }
}

/// Embed the query, run a filtered top-k vector search, map hits to
/// Content. An empty corpus yields an empty list, not an error.
pub struct VectorRetriever {
    kind: RetrieverKind,
    embedding: Arc<EmbeddingService>,
    vector_store: Arc<VectorStore>,
    filter: Option<serde_json::Value>,
}

impl VectorRetriever {
    pub fn new(
        kind: RetrieverKind,
        embedding: Arc<EmbeddingService>,
        vector_store: Arc<VectorStore>,
        filter: Option<serde_json::Value>,
    ) -> Self {
        Self {
            kind,
            embedding,
            vector_store,
            filter,
        }
    }

    /// Retriever over the legal document corpus (laws, regulations, cases).
    pub fn legal_corpus(
        embedding: Arc<EmbeddingService>,
        vector_store: Arc<VectorStore>,
    ) -> Self {
        // No filter: the legal corpus is the default population of the store
        Self::new(RetrieverKind::LegalCorpus, embedding, vector_store, None)
    }

    pub fn contract_templates(
        embedding: Arc<EmbeddingService>,
        vector_store: Arc<VectorStore>,
    ) -> Self {
        Self::new(
            RetrieverKind::ContractTemplates,
            embedding,
            vector_store,
            Some(serde_json::json!({ "category": "contract_template" })),
        )
    }
}

impl VectorRetriever {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        extra_filter: Option<serde_json::Value>,
    ) -> Result<Vec<Content>, ApiError> {
        let embedding = self.embedding.embed(query).await?;

        let filter = merge_filters(self.filter.clone(), extra_filter);

        let matches = self.vector_store.search(embedding, top_k, filter).await?;

        debug!(
            retriever = self.kind.as_str(),
            query,
            hits = matches.len(),
            "retrieved"
        );

        Ok(matches
            .into_iter()
            .map(|m| Content {
                source: clean_source(&m.metadata),
                text: m.content,
                metadata: m.metadata,
                score: m.score,
            })
            .collect())
    }
}

fn merge_filters(
    base: Option<serde_json::Value>,
    extra: Option<serde_json::Value>,
) -> Option<serde_json::Value> {
    match (base, extra) {
        (None, None) => None,
        (Some(f), None) | (None, Some(f)) => Some(f),
        (Some(mut base), Some(extra)) => {
            if let (Some(base_map), Some(extra_map)) = (base.as_object_mut(), extra.as_object()) {
                for (k, v) in extra_map {
                    base_map.insert(k.clone(), v.clone());
                }
            }
            Some(base)
        }
    }
}

#[async_trait::async_trait]
impl ContentRetriever for VectorRetriever {
    fn kind(&self) -> RetrieverKind {
        self.kind
    }

    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Content>, ApiError> {
        self.search(query, top_k, None).await
    }

    async fn retrieve_with_filter(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<serde_json::Value>,
    ) -> Result<Vec<Content>, ApiError> {
        self.search(query, top_k, filter).await
    }
}

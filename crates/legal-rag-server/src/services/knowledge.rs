use crate::database::{
    DocumentType, KnowledgeDocument, KnowledgeDocumentSummary, NewSegment, Repository,
};
use crate::document::{DocumentParser, TextChunker};
use crate::services::embedding::EmbeddingService;
use crate::utils::chinese_num;
use crate::utils::error::ApiError;
use once_cell::sync::Lazy;
use pgvector::Vector;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

static ARTICLE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"第([0-9]{1,4}|[零一二三四五六七八九十百千]{1,12})条").expect("valid article regex")
});

/// Registry over indexed legal documents: hash-deduplicated ingestion,
/// metadata listings, cascading deletion, atomic reprocess.
pub struct KnowledgeService {
    repository: Arc<Repository>,
    parser: Arc<DocumentParser>,
    chunker: Arc<TextChunker>,
    embedding: Arc<EmbeddingService>,
}

pub struct IngestOutcome {
    pub document: KnowledgeDocument,
    pub segments_created: usize,
    pub deduplicated: bool,
}

impl KnowledgeService {
    pub fn new(
        repository: Arc<Repository>,
        parser: Arc<DocumentParser>,
        chunker: Arc<TextChunker>,
        embedding: Arc<EmbeddingService>,
    ) -> Self {
        Self {
            repository,
            parser,
            chunker,
            embedding,
        }
    }

    /// Parse, chunk, embed and index an uploaded document. A duplicate
    /// content hash short-circuits to the existing document.
    pub async fn ingest(
        &self,
        filename: &str,
        data: &[u8],
        document_type: DocumentType,
    ) -> Result<IngestOutcome, ApiError> {
        let parsed = self.parser.parse(data, filename)?;
        let file_hash = hex::encode(Sha256::digest(data));

        let title = filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(filename)
            .to_string();

        let metadata = serde_json::json!({
            "source": filename,
            "original_filename": title,
            "category": category_tag(document_type),
        });

        let (document, created) = self
            .repository
            .insert_knowledge_document(
                &title,
                &parsed.content,
                Some(filename),
                &file_hash,
                document_type,
                &metadata,
            )
            .await
            .map_err(ApiError::from)?;

        if !created {
            info!("Document '{}' already indexed as id {}", title, document.id);
            return Ok(IngestOutcome {
                document,
                segments_created: 0,
                deduplicated: true,
            });
        }

        let segments = self
            .build_segments(document.id, &title, document_type, &parsed.content)
            .await?;
        let count = segments.len();

        self.repository
            .insert_segments(&segments)
            .await
            .map_err(ApiError::from)?;

        info!("Indexed '{}' as document {} with {} segments", title, document.id, count);

        Ok(IngestOutcome {
            document,
            segments_created: count,
            deduplicated: false,
        })
    }

    /// Re-chunk and re-embed an existing document, replacing the segment
    /// set atomically.
    pub async fn reprocess(&self, doc_id: i64) -> Result<usize, ApiError> {
        let document = self
            .repository
            .get_knowledge_document(doc_id)
            .await
            .map_err(ApiError::from)?
            .ok_or(ApiError::DocumentNotFound(doc_id))?;

        let doc_type: DocumentType = document
            .document_type
            .parse()
            .map_err(|e: String| ApiError::InternalError(e))?;

        let segments = self
            .build_segments(document.id, &document.title, doc_type, &document.content)
            .await?;
        let count = segments.len();

        self.repository
            .replace_document_segments(doc_id, &segments)
            .await
            .map_err(ApiError::from)?;

        info!("Reprocessed document {} into {} segments", doc_id, count);

        Ok(count)
    }

    pub async fn list(&self) -> Result<Vec<KnowledgeDocumentSummary>, ApiError> {
        self.repository
            .list_knowledge_documents()
            .await
            .map_err(ApiError::from)
    }

    pub async fn get(&self, doc_id: i64) -> Result<KnowledgeDocument, ApiError> {
        self.repository
            .get_knowledge_document(doc_id)
            .await
            .map_err(ApiError::from)?
            .ok_or(ApiError::DocumentNotFound(doc_id))
    }

    pub async fn segment_count(&self, doc_id: i64) -> Result<i64, ApiError> {
        self.repository
            .segment_count(doc_id)
            .await
            .map_err(ApiError::from)
    }

    /// Delete a document together with its vector segments.
    pub async fn delete(&self, doc_id: i64) -> Result<(), ApiError> {
        let deleted = self
            .repository
            .delete_knowledge_document(doc_id)
            .await
            .map_err(ApiError::from)?;

        if !deleted {
            return Err(ApiError::DocumentNotFound(doc_id));
        }

        Ok(())
    }

    async fn build_segments(
        &self,
        doc_id: i64,
        title: &str,
        document_type: DocumentType,
        content: &str,
    ) -> Result<Vec<NewSegment>, ApiError> {
        let chunks = if self.chunker.needs_chunking(content) {
            self.chunker.split(content)
        } else {
            vec![crate::document::Chunk {
                content: content.to_string(),
                start_pos: 0,
                end_pos: content.chars().count(),
            }]
        };

        if chunks.is_empty() {
            warn!("Document {} produced no chunks", doc_id);
            return Ok(Vec::new());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedding.embed_batch(&texts).await?;

        let segments = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(ord, (chunk, embedding))| {
                let mut metadata = serde_json::json!({
                    "source": title,
                    "original_filename": title,
                    "category": category_tag(document_type),
                });

                if let Some(article) = extract_article_number(&chunk.content) {
                    metadata["article_number"] = serde_json::Value::String(article);
                }
                if let Some(section) = extract_section(&chunk.content) {
                    metadata["section"] = serde_json::Value::String(section);
                }

                NewSegment {
                    doc_id: Some(doc_id),
                    ord: ord as i32,
                    content: chunk.content,
                    embedding: Vector::from(embedding),
                    metadata,
                }
            })
            .collect();

        Ok(segments)
    }
}

fn category_tag(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::Law => "law",
        DocumentType::Regulation => "regulation",
        DocumentType::Case => "case",
        DocumentType::ContractTemplate => "contract_template",
    }
}

/// First article reference inside a chunk, normalized to the Chinese
/// numeral form used by precise lookups.
pub fn extract_article_number(text: &str) -> Option<String> {
    let caps = ARTICLE_TAG.captures(text)?;
    let number = caps.get(1)?.as_str();

    if let Ok(n) = number.parse::<u32>() {
        if (1..=9999).contains(&n) {
            return Some(chinese_num::normalize_article(n));
        }
        return None;
    }

    Some(format!("第{number}条"))
}

static SECTION_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"第([0-9]{1,3}|[零一二三四五六七八九十百]{1,8})[章节]").expect("valid section regex")
});

fn extract_section(text: &str) -> Option<String> {
    SECTION_TAG.find(text).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_article_chinese() {
        assert_eq!(
            extract_article_number("第三十条 企业事业单位..."),
            Some("第三十条".to_string())
        );
    }

    #[test]
    fn test_extract_article_arabic_normalized() {
        assert_eq!(
            extract_article_number("第30条 企业事业单位..."),
            Some("第三十条".to_string())
        );
    }

    #[test]
    fn test_extract_article_absent() {
        assert_eq!(extract_article_number("总则部分没有条款引用"), None);
    }

    #[test]
    fn test_extract_section() {
        assert_eq!(
            extract_section("第四章 法律责任"),
            Some("第四章".to_string())
        );
    }
}

use super::analysis::{self, LlmAnalysis};
use super::events::{ReviewEvent, ReviewEventBus};
use crate::config::ReviewConfig;
use crate::database::{ContractReview, NewSegment, Repository, ReviewStatus, RiskClause};
use crate::document::{DocumentParser, TextChunker};
use crate::rag::AdvancedRagService;
use crate::services::embedding::EmbeddingService;
use crate::services::llm::{BackendKind, ChatMessage, ChatOptions, ModelDispatcher};
use crate::services::vector_store::VectorStore;
use crate::utils::error::ApiError;
use pgvector::Vector;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Contract review pipeline: a state machine over one review record.
///
/// PENDING -> PROCESSING -> {COMPLETED, FAILED}; PENDING -> FAILED is
/// allowed for pre-claim errors. Terminal writes happen exactly once and
/// there are no back-transitions. SSE disconnects never abort a running
/// pipeline.
pub struct ContractReviewEngine {
    repository: Arc<Repository>,
    parser: Arc<DocumentParser>,
    chunker: Arc<TextChunker>,
    embedding: Arc<EmbeddingService>,
    vector_store: Arc<VectorStore>,
    rag: Arc<AdvancedRagService>,
    dispatcher: Arc<ModelDispatcher>,
    events: Arc<ReviewEventBus>,
    queue: flume::Sender<i64>,
    config: ReviewConfig,
}

impl ContractReviewEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<Repository>,
        parser: Arc<DocumentParser>,
        chunker: Arc<TextChunker>,
        embedding: Arc<EmbeddingService>,
        vector_store: Arc<VectorStore>,
        rag: Arc<AdvancedRagService>,
        dispatcher: Arc<ModelDispatcher>,
        events: Arc<ReviewEventBus>,
        queue: flume::Sender<i64>,
        config: ReviewConfig,
    ) -> Self {
        Self {
            repository,
            parser,
            chunker,
            embedding,
            vector_store,
            rag,
            dispatcher,
            events,
            queue,
            config,
        }
    }

    pub fn events(&self) -> &Arc<ReviewEventBus> {
        &self.events
    }

    /// Accept an upload: store the file, create the PENDING record and
    /// enqueue it for a background worker. Duplicate (user, hash) pairs
    /// are allowed but logged.
    pub async fn submit(
        &self,
        user_id: i64,
        original_filename: &str,
        data: &[u8],
    ) -> Result<ContractReview, ApiError> {
        let max_bytes = self.config.max_file_mb * 1024 * 1024;
        if data.len() > max_bytes {
            return Err(ApiError::TooLarge(format!(
                "{original_filename} is {} bytes, limit {max_bytes}",
                data.len()
            )));
        }
        if data.is_empty() {
            return Err(ApiError::EmptyInput("uploaded file is empty".to_string()));
        }

        let file_hash = hex::encode(Sha256::digest(data));

        let duplicates = self
            .repository
            .count_reviews_by_hash(user_id, &file_hash)
            .await?;
        if duplicates > 0 {
            info!(
                user_id,
                %file_hash,
                duplicates,
                "duplicate contract upload accepted"
            );
        }

        let stored_name = format!("{}_{}", uuid::Uuid::new_v4(), original_filename);
        let stored_path = std::path::Path::new(&self.config.upload_dir).join(&stored_name);

        tokio::fs::create_dir_all(&self.config.upload_dir)
            .await
            .map_err(|e| ApiError::InternalError(format!("upload dir: {e}")))?;
        tokio::fs::write(&stored_path, data)
            .await
            .map_err(|e| ApiError::InternalError(format!("store upload: {e}")))?;

        let review = self
            .repository
            .insert_review(
                user_id,
                original_filename,
                &stored_path.to_string_lossy(),
                data.len() as i64,
                &file_hash,
            )
            .await?;

        self.enqueue(review.id);

        info!(review_id = review.id, user_id, "contract review submitted");

        Ok(review)
    }

    pub fn enqueue(&self, review_id: i64) {
        if self.queue.send(review_id).is_err() {
            error!(review_id, "review queue is closed");
        }
    }

    /// Worker entry. Re-triggering on a PROCESSING or terminal record
    /// returns without re-running (idempotence at the state machine).
    pub async fn process(&self, review_id: i64) {
        let review = match self.repository.get_review(review_id).await {
            Ok(Some(r)) => r,
            Ok(None) => {
                warn!(review_id, "review disappeared before processing");
                return;
            }
            Err(e) => {
                error!(review_id, error = %e, "failed to load review");
                return;
            }
        };

        if review.status() != ReviewStatus::Pending {
            info!(
                review_id,
                status = %review.review_status,
                "skipping non-pending review"
            );
            return;
        }

        match self.repository.claim_review(review_id).await {
            Ok(true) => {}
            Ok(false) => {
                // Another worker won the conditional update
                info!(review_id, "claim lost: {}", ApiError::AlreadyClaimed(review_id));
                return;
            }
            Err(e) => {
                error!(review_id, error = %e, "claim failed");
                return;
            }
        }

        if let Err(e) = self.run_pipeline(&review).await {
            error!(review_id, error = %e, "review pipeline failed");

            let error_result = serde_json::json!({
                "error": e.to_string(),
                "errorCode": e.code(),
            });

            if let Err(persist_err) = self.repository.fail_review(review_id, &error_result).await {
                error!(review_id, error = %persist_err, "failed to persist FAILED state");
            }

            self.events.publish(
                review_id,
                ReviewEvent::Error {
                    message: format!("合同审查失败：{e}"),
                },
            );
        }
    }

    /// Clear the review's indexed segments, reset it to PENDING and
    /// enqueue it again. Only valid from a terminal state; prior risk
    /// clauses stay in place until the new run completes.
    pub async fn reprocess(&self, review_id: i64) -> Result<(), ApiError> {
        let review = self
            .repository
            .get_review(review_id)
            .await?
            .ok_or(ApiError::ReviewNotFound(review_id))?;

        if !review.status().is_terminal() {
            return Err(ApiError::AlreadyClaimed(review_id));
        }

        self.repository
            .delete_segments_by_metadata("reviewId", &serde_json::json!(review_id))
            .await?;

        if !self.repository.reset_review(review_id).await? {
            return Err(ApiError::AlreadyClaimed(review_id));
        }

        self.enqueue(review_id);

        info!(review_id, "review reprocess enqueued");

        Ok(())
    }

    async fn run_pipeline(&self, review: &ContractReview) -> Result<(), ApiError> {
        let review_id = review.id;

        // Stage 1: parse (0 -> 20)
        self.events.progress(review_id, "parse", 0, "开始解析合同文件");

        let data = tokio::fs::read(&review.stored_path)
            .await
            .map_err(|e| ApiError::ParseFailure(format!("read stored file: {e}")))?;

        let parsed = self.parser.parse(&data, &review.original_filename)?;
        let contract_text = parsed.content;

        self.events
            .progress(review_id, "parse", 20, "合同文本提取完成");

        // Stage 2: chunk & summarize (20 -> 35)
        let chunks = self.chunker.split(&contract_text);
        let char_count = contract_text.chars().count();

        self.events.progress(
            review_id,
            "chunk",
            35,
            format!("切分为 {} 个片段，共 {} 字", chunks.len(), char_count),
        );

        // Stage 3: embed & index (35 -> 55). Indexing failures are logged
        // but never fail the review.
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();

        match self.embedding.embed_batch(&texts).await {
            Ok(embeddings) => {
                let segments: Vec<NewSegment> = chunks
                    .iter()
                    .zip(embeddings)
                    .enumerate()
                    .map(|(ord, (chunk, embedding))| NewSegment {
                        doc_id: None,
                        ord: ord as i32,
                        content: chunk.content.clone(),
                        embedding: Vector::from(embedding),
                        metadata: serde_json::json!({
                            "sourceType": "contract_review",
                            "reviewId": review_id,
                            "original_filename": review.original_filename,
                        }),
                    })
                    .collect();

                if let Err(e) = self.vector_store.insert_batch(segments).await {
                    warn!(review_id, error = %e, "segment indexing failed, continuing");
                }
            }
            Err(e) => {
                warn!(review_id, error = %e, "embedding failed, continuing without index");
            }
        }

        self.events
            .progress(review_id, "index", 55, "合同片段向量化完成");

        // Stage 4: retrieve law context (55 -> 70), no generation.
        let law_context = self.retrieve_law_context(&chunks, &contract_text).await;

        self.events.progress(
            review_id,
            "retrieve",
            70,
            format!("检索到 {} 条相关法律条文", law_context.lines().count()),
        );

        // Stage 5: LLM analysis (70 -> 95), one schema-reminder retry.
        let analysis = self.analyze(&contract_text, &law_context).await?;

        self.events
            .progress(review_id, "analyze", 95, "风险分析完成");

        // Stage 6: score & persist (95 -> 100), one transactional write.
        let clauses = analysis::locate_clauses(&contract_text, &analysis.risk_clauses);
        let risk_level = analysis::overall_risk_level(&clauses);
        let total_risks = clauses.len() as i32;

        let review_result = serde_json::json!({
            "summary": analysis.summary,
            "detailedAnalysis": analysis.detailed_analysis,
            "keyClauses": analysis.key_clauses,
            "scoringRules": {
                "complianceScore": analysis::compliance_score(&clauses),
                "completenessScore": analysis::completeness_score(clauses.len(), risk_level),
            },
            "statistics": {
                "chunks": chunks.len(),
                "charCount": char_count,
            },
        });

        self.repository
            .complete_review(review_id, risk_level, total_risks, &review_result, &clauses)
            .await?;

        let stored_clauses = self.repository.list_risk_clauses(review_id).await?;
        let payload = Self::result_payload(review_id, review, risk_level.as_str(), total_risks, &review_result, &stored_clauses);

        self.events
            .publish(review_id, ReviewEvent::Result { payload });
        self.events.publish(
            review_id,
            ReviewEvent::Complete {
                message: "合同审查完成".to_string(),
            },
        );

        info!(review_id, total_risks, risk_level = risk_level.as_str(), "review completed");

        Ok(())
    }

    /// Gather law passages through the retrieval pipeline (no generation):
    /// the leading chunks carry the contract's subject matter, which is
    /// what the statutes need to match.
    async fn retrieve_law_context(
        &self,
        chunks: &[crate::document::Chunk],
        contract_text: &str,
    ) -> String {
        let query: String = if let Some(first) = chunks.first() {
            first.content.chars().take(300).collect()
        } else {
            contract_text.chars().take(300).collect()
        };

        match self.rag.retrieve(&query).await {
            Ok(contents) => contents
                .iter()
                .take(self.config.law_context_k)
                .map(|c| {
                    format!(
                        "《{}》：{}",
                        c.content.source,
                        c.content.text.chars().take(400).collect::<String>()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => {
                warn!(error = %e, "law context retrieval failed, analyzing without it");
                String::new()
            }
        }
    }

    /// One analysis call plus a single retry with an explicit schema
    /// reminder; a second unparseable answer fails the review.
    async fn analyze(
        &self,
        contract_text: &str,
        law_context: &str,
    ) -> Result<LlmAnalysis, ApiError> {
        let backend = self
            .dispatcher
            .select_available(BackendKind::DeepSeek)
            .await?;
        let options = ChatOptions::default();

        let prompt = analysis::build_analysis_prompt(contract_text, law_context);
        let first = self
            .dispatcher
            .chat(backend, vec![ChatMessage::user(prompt)], &options)
            .await?;

        let parse_error = match analysis::parse_analysis(&first) {
            Ok(analysis) => return Ok(analysis),
            Err(e) => e,
        };

        warn!(error = %parse_error, "analysis response unparseable, retrying once");

        let retry_prompt =
            analysis::build_retry_prompt(contract_text, law_context, &parse_error);
        let second = self
            .dispatcher
            .chat(backend, vec![ChatMessage::user(retry_prompt)], &options)
            .await?;

        analysis::parse_analysis(&second).map_err(|e| {
            ApiError::LlmResponseUnparseable(format!("retry also failed: {e}"))
        })
    }

    fn result_payload(
        review_id: i64,
        review: &ContractReview,
        risk_level: &str,
        total_risks: i32,
        review_result: &serde_json::Value,
        clauses: &[RiskClause],
    ) -> serde_json::Value {
        serde_json::json!({
            "reviewId": review_id,
            "originalFilename": review.original_filename,
            "status": ReviewStatus::Completed.as_str(),
            "riskLevel": risk_level,
            "totalRisks": total_risks,
            "reviewResult": review_result,
            "riskClauses": clauses
                .iter()
                .map(|c| crate::models::review::RiskClauseInfo::from(c))
                .map(|c| serde_json::to_value(c).unwrap_or_default())
                .collect::<Vec<_>>(),
        })
    }
}

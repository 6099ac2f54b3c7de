use super::models::*;
use super::DbPool;
use anyhow::Result;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use tracing::debug;

pub struct Repository {
    pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        self.pool.get_pool()
    }

    // ===== Knowledge documents =====

    /// Insert a knowledge document. Duplicate content hash returns the
    /// existing row instead of a new one.
    pub async fn insert_knowledge_document(
        &self,
        title: &str,
        content: &str,
        source_file: Option<&str>,
        file_hash: &str,
        document_type: DocumentType,
        metadata: &serde_json::Value,
    ) -> Result<(KnowledgeDocument, bool)> {
        if let Some(existing) = self.find_document_by_hash(file_hash).await? {
            debug!("Duplicate document hash {}, returning existing id {}", file_hash, existing.id);
            return Ok((existing, false));
        }

        let doc = sqlx::query_as::<_, KnowledgeDocument>(
            r#"INSERT INTO knowledge_documents
               (title, content, source_file, file_hash, document_type, metadata, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
               RETURNING *"#,
        )
        .bind(title)
        .bind(content)
        .bind(source_file)
        .bind(file_hash)
        .bind(document_type.as_str())
        .bind(metadata)
        .fetch_one(self.pool())
        .await?;

        Ok((doc, true))
    }

    pub async fn find_document_by_hash(&self, file_hash: &str) -> Result<Option<KnowledgeDocument>> {
        let doc = sqlx::query_as::<_, KnowledgeDocument>(
            "SELECT * FROM knowledge_documents WHERE file_hash = $1",
        )
        .bind(file_hash)
        .fetch_optional(self.pool())
        .await?;

        Ok(doc)
    }

    pub async fn get_knowledge_document(&self, id: i64) -> Result<Option<KnowledgeDocument>> {
        let doc = sqlx::query_as::<_, KnowledgeDocument>(
            "SELECT * FROM knowledge_documents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(doc)
    }

    pub async fn list_knowledge_documents(&self) -> Result<Vec<KnowledgeDocumentSummary>> {
        let docs = sqlx::query_as::<_, KnowledgeDocumentSummary>(
            r#"SELECT d.id, d.title, d.document_type,
                      COUNT(s.id) AS segment_count,
                      d.created_at, d.updated_at
               FROM knowledge_documents d
               LEFT JOIN vector_segments s ON s.doc_id = d.id
               GROUP BY d.id
               ORDER BY d.created_at DESC"#,
        )
        .fetch_all(self.pool())
        .await?;

        Ok(docs)
    }

    pub async fn update_document_metadata(
        &self,
        id: i64,
        title: &str,
        metadata: &serde_json::Value,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE knowledge_documents
               SET title = $2, metadata = $3, updated_at = NOW()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(title)
        .bind(metadata)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a document and all of its segments in one transaction, so no
    /// reader observes an orphaned segment.
    pub async fn delete_knowledge_document(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM vector_segments WHERE doc_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM knowledge_documents WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    // ===== Vector segments =====

    pub async fn insert_segments(&self, segments: &[NewSegment]) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        for seg in segments {
            sqlx::query(
                r#"INSERT INTO vector_segments (doc_id, ord, content, embedding, metadata)
                   VALUES ($1, $2, $3, $4, $5)"#,
            )
            .bind(seg.doc_id)
            .bind(seg.ord)
            .bind(&seg.content)
            .bind(&seg.embedding)
            .bind(&seg.metadata)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Inserted {} segments", segments.len());

        Ok(())
    }

    /// Replace all segments of a document atomically (reprocess path).
    pub async fn replace_document_segments(
        &self,
        doc_id: i64,
        segments: &[NewSegment],
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM vector_segments WHERE doc_id = $1")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        for seg in segments {
            sqlx::query(
                r#"INSERT INTO vector_segments (doc_id, ord, content, embedding, metadata)
                   VALUES ($1, $2, $3, $4, $5)"#,
            )
            .bind(seg.doc_id)
            .bind(seg.ord)
            .bind(&seg.content)
            .bind(&seg.embedding)
            .bind(&seg.metadata)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Top-k cosine search, optionally filtered by metadata key equality
    /// (JSONB containment). Score is 1 - cosine distance, descending.
    pub async fn search_segments(
        &self,
        query_embedding: Vector,
        top_k: i64,
        filter: Option<&serde_json::Value>,
    ) -> Result<Vec<SegmentMatch>> {
        let matches = match filter {
            Some(f) => {
                sqlx::query_as::<_, SegmentMatch>(
                    r#"SELECT id, doc_id, ord, content, metadata,
                              (1 - (embedding <=> $1))::real AS score
                       FROM vector_segments
                       WHERE metadata @> $3
                       ORDER BY embedding <=> $1
                       LIMIT $2"#,
                )
                .bind(&query_embedding)
                .bind(top_k)
                .bind(f)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, SegmentMatch>(
                    r#"SELECT id, doc_id, ord, content, metadata,
                              (1 - (embedding <=> $1))::real AS score
                       FROM vector_segments
                       ORDER BY embedding <=> $1
                       LIMIT $2"#,
                )
                .bind(&query_embedding)
                .bind(top_k)
                .fetch_all(self.pool())
                .await?
            }
        };

        debug!("Vector search returned {} segments", matches.len());

        Ok(matches)
    }

    pub async fn delete_segments_by_document(&self, doc_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM vector_segments WHERE doc_id = $1")
            .bind(doc_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete segments carrying a given metadata key/value, used to clear a
    /// contract review's indexed chunks before reprocessing.
    pub async fn delete_segments_by_metadata(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<u64> {
        let filter = serde_json::json!({ key: value });
        let result = sqlx::query("DELETE FROM vector_segments WHERE metadata @> $1")
            .bind(filter)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn segment_count(&self, doc_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM vector_segments WHERE doc_id = $1",
        )
        .bind(doc_id)
        .fetch_one(self.pool())
        .await?;

        Ok(count)
    }

    pub async fn vector_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM vector_segments")
            .fetch_one(self.pool())
            .await?;

        Ok(count)
    }

    pub async fn vector_last_updated(&self) -> Result<Option<DateTime<Utc>>> {
        let ts = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT MAX(d.updated_at) FROM knowledge_documents d",
        )
        .fetch_one(self.pool())
        .await?;

        Ok(ts)
    }

    // ===== Chat sessions & messages =====

    /// Create the session if missing; otherwise bump updated_at and the
    /// last-used model type. Title is only set on creation.
    pub async fn upsert_session(
        &self,
        session_id: &str,
        user_id: i64,
        title: &str,
        model_type: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO chat_sessions (id, user_id, title, created_at, updated_at, last_model_type)
               VALUES ($1, $2, $3, NOW(), NOW(), $4)
               ON CONFLICT (id) DO UPDATE
               SET updated_at = NOW(), last_model_type = $4"#,
        )
        .bind(session_id)
        .bind(user_id)
        .bind(title)
        .bind(model_type)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<ChatSessionRow>> {
        let session = sqlx::query_as::<_, ChatSessionRow>(
            "SELECT * FROM chat_sessions WHERE id = $1",
        )
        .bind(session_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(session)
    }

    pub async fn list_sessions(&self, user_id: i64) -> Result<Vec<ChatSessionRow>> {
        let sessions = sqlx::query_as::<_, ChatSessionRow>(
            "SELECT * FROM chat_sessions WHERE user_id = $1 ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        Ok(sessions)
    }

    /// Delete a session and its messages (cascade in one transaction).
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM chat_messages WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        metadata: &serde_json::Value,
    ) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO chat_messages (session_id, role, content, metadata, created_at)
               VALUES ($1, $2, $3, $4, NOW())
               RETURNING id"#,
        )
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(metadata)
        .fetch_one(self.pool())
        .await?;

        Ok(id)
    }

    /// Session upsert + user message in one transaction, so a failed
    /// request never leaves a session without its opening turn.
    pub async fn persist_user_turn(
        &self,
        session_id: &str,
        user_id: i64,
        title: &str,
        model_type: &str,
        content: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"INSERT INTO chat_sessions (id, user_id, title, created_at, updated_at, last_model_type)
               VALUES ($1, $2, $3, NOW(), NOW(), $4)
               ON CONFLICT (id) DO UPDATE
               SET updated_at = NOW(), last_model_type = $4"#,
        )
        .bind(session_id)
        .bind(user_id)
        .bind(title)
        .bind(model_type)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO chat_messages (session_id, role, content, metadata, created_at)
               VALUES ($1, 'user', $2, $3, NOW())"#,
        )
        .bind(session_id)
        .bind(content)
        .bind(metadata)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessageRow>> {
        let messages = sqlx::query_as::<_, ChatMessageRow>(
            "SELECT * FROM chat_messages WHERE session_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(self.pool())
        .await?;

        Ok(messages)
    }

    // ===== Chat memory (one table per model backend) =====
    //
    // `table` must be one of the fixed chat_memory_* names supplied by the
    // memory store; it is never user input.

    pub async fn memory_append(
        &self,
        table: &str,
        conversation_id: &str,
        role: &str,
        content: &str,
    ) -> Result<()> {
        let sql = format!(
            r#"INSERT INTO {table} (conversation_id, ord, role, content, created_at)
               VALUES ($1,
                       COALESCE((SELECT MAX(ord) + 1 FROM {table} WHERE conversation_id = $1), 0),
                       $2, $3, NOW())"#,
        );

        sqlx::query(sqlx::AssertSqlSafe(sql))
            .bind(conversation_id)
            .bind(role)
            .bind(content)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Last `window` messages, returned oldest -> newest.
    pub async fn memory_history(
        &self,
        table: &str,
        conversation_id: &str,
        window: i64,
    ) -> Result<Vec<MemoryMessage>> {
        let sql = format!(
            r#"SELECT role, content, created_at FROM (
                   SELECT role, content, created_at, ord
                   FROM {table}
                   WHERE conversation_id = $1
                   ORDER BY ord DESC
                   LIMIT $2
               ) recent
               ORDER BY ord ASC"#,
        );

        let messages = sqlx::query_as::<_, MemoryMessage>(sqlx::AssertSqlSafe(sql))
            .bind(conversation_id)
            .bind(window)
            .fetch_all(self.pool())
            .await?;

        Ok(messages)
    }

    pub async fn memory_clear(&self, table: &str, conversation_id: &str) -> Result<u64> {
        let sql = format!("DELETE FROM {table} WHERE conversation_id = $1");

        let result = sqlx::query(sqlx::AssertSqlSafe(sql))
            .bind(conversation_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn memory_count(&self, table: &str, conversation_id: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {table} WHERE conversation_id = $1");

        let count = sqlx::query_scalar::<_, i64>(sqlx::AssertSqlSafe(sql))
            .bind(conversation_id)
            .fetch_one(self.pool())
            .await?;

        Ok(count)
    }

    // ===== Contract reviews =====

    pub async fn insert_review(
        &self,
        user_id: i64,
        original_filename: &str,
        stored_path: &str,
        file_size: i64,
        file_hash: &str,
    ) -> Result<ContractReview> {
        let review = sqlx::query_as::<_, ContractReview>(
            r#"INSERT INTO contract_reviews
               (user_id, original_filename, stored_path, file_size, file_hash, review_status, created_at)
               VALUES ($1, $2, $3, $4, $5, 'PENDING', NOW())
               RETURNING *"#,
        )
        .bind(user_id)
        .bind(original_filename)
        .bind(stored_path)
        .bind(file_size)
        .bind(file_hash)
        .fetch_one(self.pool())
        .await?;

        Ok(review)
    }

    pub async fn get_review(&self, id: i64) -> Result<Option<ContractReview>> {
        let review = sqlx::query_as::<_, ContractReview>(
            "SELECT * FROM contract_reviews WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(review)
    }

    /// Atomic worker claim. Zero rows affected means another worker won,
    /// or the review is already terminal.
    pub async fn claim_review(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE contract_reviews SET review_status = 'PROCESSING' WHERE id = $1 AND review_status = 'PENDING'",
        )
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Terminal COMPLETED write: status, risk level, totals, result payload,
    /// risk clauses and completion timestamp in one transactional unit.
    /// Prior clauses (from an earlier run being reprocessed) are replaced
    /// only here, on success.
    pub async fn complete_review(
        &self,
        id: i64,
        risk_level: RiskLevel,
        total_risks: i32,
        review_result: &serde_json::Value,
        clauses: &[NewRiskClause],
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        let updated = sqlx::query(
            r#"UPDATE contract_reviews
               SET review_status = 'COMPLETED',
                   risk_level = $2,
                   total_risks = $3,
                   review_result = $4,
                   completed_at = NOW()
               WHERE id = $1 AND review_status = 'PROCESSING'"#,
        )
        .bind(id)
        .bind(risk_level.as_str())
        .bind(total_risks)
        .bind(review_result)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            anyhow::bail!("review {} is not in PROCESSING state", id);
        }

        sqlx::query("DELETE FROM risk_clauses WHERE review_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for clause in clauses {
            sqlx::query(
                r#"INSERT INTO risk_clauses
                   (review_id, level, clause_type, clause_text, description, suggestion, legal_basis, position_start, position_end)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
            )
            .bind(id)
            .bind(clause.level.as_str())
            .bind(&clause.clause_type)
            .bind(&clause.clause_text)
            .bind(&clause.description)
            .bind(&clause.suggestion)
            .bind(&clause.legal_basis)
            .bind(clause.position_start)
            .bind(clause.position_end)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Terminal FAILED write. Allowed from PENDING (pre-claim parse errors)
    /// and PROCESSING; never from a terminal state.
    pub async fn fail_review(&self, id: i64, error_result: &serde_json::Value) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE contract_reviews
               SET review_status = 'FAILED',
                   review_result = $2,
                   completed_at = NOW()
               WHERE id = $1 AND review_status IN ('PENDING', 'PROCESSING')"#,
        )
        .bind(id)
        .bind(error_result)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Reset a terminal review back to PENDING for reprocessing. Existing
    /// risk clauses are intentionally left in place until the new run
    /// completes.
    pub async fn reset_review(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE contract_reviews
               SET review_status = 'PENDING',
                   risk_level = NULL,
                   total_risks = NULL,
                   completed_at = NULL
               WHERE id = $1 AND review_status IN ('COMPLETED', 'FAILED')"#,
        )
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_reviews(
        &self,
        user_id: i64,
        page: i64,
        size: i64,
    ) -> Result<(Vec<ContractReview>, i64)> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM contract_reviews WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(self.pool())
        .await?;

        let reviews = sqlx::query_as::<_, ContractReview>(
            r#"SELECT * FROM contract_reviews
               WHERE user_id = $1
               ORDER BY created_at DESC
               LIMIT $2 OFFSET $3"#,
        )
        .bind(user_id)
        .bind(size)
        .bind(page * size)
        .fetch_all(self.pool())
        .await?;

        Ok((reviews, total))
    }

    pub async fn count_reviews_by_hash(&self, user_id: i64, file_hash: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM contract_reviews WHERE user_id = $1 AND file_hash = $2",
        )
        .bind(user_id)
        .bind(file_hash)
        .fetch_one(self.pool())
        .await?;

        Ok(count)
    }

    /// Risk clauses in insertion order.
    pub async fn list_risk_clauses(&self, review_id: i64) -> Result<Vec<RiskClause>> {
        let clauses = sqlx::query_as::<_, RiskClause>(
            "SELECT * FROM risk_clauses WHERE review_id = $1 ORDER BY id ASC",
        )
        .bind(review_id)
        .fetch_all(self.pool())
        .await?;

        Ok(clauses)
    }
}

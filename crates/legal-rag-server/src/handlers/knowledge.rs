use crate::auth::AuthUser;
use crate::database::{DocumentType, KnowledgeDocumentSummary};
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeUploadResponse {
    pub document_id: i64,
    pub title: String,
    pub segments_created: usize,
    pub deduplicated: bool,
}

/// POST /knowledge/upload (multipart: file + documentType), admin only.
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<KnowledgeUploadResponse>, ApiError> {
    require_admin(&auth)?;

    let mut file_data: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut document_type = DocumentType::Law;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read field: {e}")))?
    {
        match field.name().unwrap_or("") {
            "file" => {
                filename = field.file_name().map(str::to_string);
                file_data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("failed to read file: {e}")))?
                        .to_vec(),
                );
            }
            "documentType" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("invalid documentType: {e}")))?;
                document_type = text
                    .parse()
                    .map_err(|_| ApiError::BadRequest(format!("unknown documentType: {text}")))?;
            }
            _ => {}
        }
    }

    let file_data = file_data.ok_or_else(|| ApiError::BadRequest("file required".to_string()))?;
    let filename = filename.ok_or_else(|| ApiError::BadRequest("filename required".to_string()))?;

    info!(user_id = auth.user_id, %filename, "knowledge upload");

    let outcome = state
        .knowledge
        .ingest(&filename, &file_data, document_type)
        .await?;

    Ok(Json(KnowledgeUploadResponse {
        document_id: outcome.document.id,
        title: outcome.document.title,
        segments_created: outcome.segments_created,
        deduplicated: outcome.deduplicated,
    }))
}

/// GET /knowledge/documents
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> Result<Json<Vec<KnowledgeDocumentSummary>>, ApiError> {
    Ok(Json(state.knowledge.list().await?))
}

/// DELETE /knowledge/documents/{id} — removes the document and its
/// vector segments.
pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(doc_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&auth)?;

    state.knowledge.delete(doc_id).await?;

    info!(doc_id, user_id = auth.user_id, "knowledge document deleted");

    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// POST /knowledge/documents/{id}/reprocess
pub async fn reprocess_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(doc_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&auth)?;

    let segments = state.knowledge.reprocess(doc_id).await?;

    Ok(Json(serde_json::json!({ "segments": segments })))
}

fn require_admin(auth: &AuthUser) -> Result<(), ApiError> {
    if auth.role != "admin" {
        return Err(ApiError::Forbidden(
            "knowledge management requires admin role".to_string(),
        ));
    }

    Ok(())
}

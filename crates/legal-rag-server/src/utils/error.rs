use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    // Input errors -> 400
    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("File too large: {0}")]
    TooLarge(String),

    #[error("Invalid conversation id: {0}")]
    InvalidConversationId(String),

    #[error("Invalid model type: {0}")]
    InvalidModelType(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    // Auth
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Not-found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Review not found: {0}")]
    ReviewNotFound(i64),

    #[error("Document not found: {0}")]
    DocumentNotFound(i64),

    // Upstream
    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding request rejected: {0}")]
    EmbeddingBadRequest(String),

    #[error("Model backend unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model call timed out after {0}s")]
    ModelTimeout(u64),

    #[error("Vector store unavailable: {0}")]
    VectorStoreUnavailable(String),

    // Pipeline
    #[error("Document parse failure: {0}")]
    ParseFailure(String),

    #[error("LLM response unparseable: {0}")]
    LlmResponseUnparseable(String),

    #[error("Review already claimed: {0}")]
    AlreadyClaimed(i64),

    // Internal
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ApiError {
    /// Retryable upstream failures (idempotent ops only: embed, search).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::EmbeddingUnavailable(_) | ApiError::VectorStoreUnavailable(_)
        )
    }

    /// Stable machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::EmptyInput(_) => "EMPTY_INPUT",
            ApiError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            ApiError::TooLarge(_) => "TOO_LARGE",
            ApiError::InvalidConversationId(_) => "INVALID_CONVERSATION_ID",
            ApiError::InvalidModelType(_) => "INVALID_MODEL_TYPE",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            ApiError::ReviewNotFound(_) => "REVIEW_NOT_FOUND",
            ApiError::DocumentNotFound(_) => "DOCUMENT_NOT_FOUND",
            ApiError::EmbeddingUnavailable(_) => "EMBEDDING_UNAVAILABLE",
            ApiError::EmbeddingBadRequest(_) => "EMBEDDING_BAD_REQUEST",
            ApiError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            ApiError::ModelTimeout(_) => "MODEL_TIMEOUT",
            ApiError::VectorStoreUnavailable(_) => "VECTOR_STORE_UNAVAILABLE",
            ApiError::ParseFailure(_) => "PARSE_FAILURE",
            ApiError::LlmResponseUnparseable(_) => "LLM_RESPONSE_UNPARSEABLE",
            ApiError::AlreadyClaimed(_) => "ALREADY_CLAIMED",
            ApiError::ConfigError(_) => "CONFIG_ERROR",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::EmptyInput(_)
            | ApiError::UnsupportedFormat(_)
            | ApiError::TooLarge(_)
            | ApiError::InvalidConversationId(_)
            | ApiError::InvalidModelType(_)
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::SessionNotFound(_)
            | ApiError::ReviewNotFound(_)
            | ApiError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::EmbeddingUnavailable(_)
            | ApiError::ModelUnavailable(_)
            | ApiError::VectorStoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ModelTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::EmbeddingBadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::AlreadyClaimed(_) => StatusCode::CONFLICT,
            ApiError::ParseFailure(_) | ApiError::LlmResponseUnparseable(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::ConfigError(_)
            | ApiError::DatabaseError(_)
            | ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::DatabaseError(e.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::DatabaseError(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!("{}: {}", self.code(), message);
        } else {
            tracing::warn!("{}: {}", self.code(), message);
        }

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::EmptyInput("q".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Forbidden("cross-user".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::ReviewNotFound(42).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::AlreadyClaimed(1).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ApiError::EmbeddingUnavailable("timeout".into()).is_retryable());
        assert!(ApiError::VectorStoreUnavailable("conn".into()).is_retryable());
        assert!(!ApiError::EmbeddingBadRequest("400".into()).is_retryable());
        assert!(!ApiError::ModelTimeout(120).is_retryable());
    }
}

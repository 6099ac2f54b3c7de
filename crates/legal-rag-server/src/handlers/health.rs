use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Readiness: database reachable and vector store countable.
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let segments = state
        .vector_store
        .count()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    let last_updated = state.vector_store.last_updated().await.ok().flatten();

    Ok(Json(serde_json::json!({
        "status": "ready",
        "vectorSegments": segments,
        "lastUpdated": last_updated,
    })))
}

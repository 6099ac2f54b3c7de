use crate::auth::AuthUser;
use crate::models::chat::{
    ChatRequest, ChatResponse, MessageInfo, SessionDetail, SessionInfo,
};
use crate::services::llm::BackendKind;
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::info;

/// POST /chat
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    info!(
        user_id = auth.user_id,
        mode = request.model_type.as_str(),
        "chat request"
    );

    let response = state.chat.chat(request, auth.user_id).await?;

    Ok(Json(response))
}

/// POST /chat/stream
///
/// SSE events: `start`, `content` (raw deltas), then exactly one `done`
/// or `error`. The generation task outlives a disconnecting client, but
/// only a completed answer is persisted.
pub async fn chat_stream_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    info!(
        user_id = auth.user_id,
        mode = request.model_type.as_str(),
        "chat stream request"
    );

    let rx = state.chat.clone().stream(request, auth.user_id).await?;

    let stream = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Some(event) => {
                let sse = Event::default()
                    .event(event.event_name())
                    .data(event.to_json());
                Some((Ok(sse), rx))
            }
            None => None,
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// GET /chat/sessions
pub async fn list_sessions_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<SessionInfo>>, ApiError> {
    let sessions = state.repository.list_sessions(auth.user_id).await?;

    Ok(Json(
        sessions
            .into_iter()
            .map(|s| SessionInfo {
                session_id: s.id,
                title: s.title,
                created_at: s.created_at,
                updated_at: s.updated_at,
                last_model_type: s.last_model_type,
            })
            .collect(),
    ))
}

/// GET /chat/sessions/{id}
pub async fn get_session_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let session = owned_session(&state, &auth, &session_id).await?;

    let messages = state.repository.list_messages(&session_id).await?;

    Ok(Json(SessionDetail {
        session_id: session.id,
        title: session.title,
        messages: messages
            .into_iter()
            .map(|m| MessageInfo {
                id: m.id,
                role: m.role,
                content: m.content,
                metadata: m.metadata,
                created_at: m.created_at,
            })
            .collect(),
    }))
}

/// DELETE /chat/sessions/{id}
pub async fn delete_session_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    owned_session(&state, &auth, &session_id).await?;

    state.repository.delete_session(&session_id).await?;
    state.memory.clear_all(&session_id).await?;
    state.rag.clear_session(&session_id);

    info!(%session_id, user_id = auth.user_id, "session deleted");

    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct ClearMemoryParams {
    #[serde(rename = "modelName")]
    pub model_name: Option<String>,
}

/// DELETE /chat/session/{conversation_id}?modelName=…
///
/// Clears the persistent memory window. With a model name, only that
/// backend's window; without one, every backend's window plus the
/// in-service RAG window.
pub async fn clear_memory_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(conversation_id): Path<String>,
    Query(params): Query<ClearMemoryParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Memory may exist before the session row does; only enforce
    // ownership when the session has been persisted.
    if let Some(session) = state.repository.get_session(&conversation_id).await? {
        if session.user_id != auth.user_id {
            return Err(ApiError::Forbidden(format!(
                "session {conversation_id} belongs to another user"
            )));
        }
    }

    let removed = match &params.model_name {
        Some(name) => {
            let backend: BackendKind = name
                .parse()
                .map_err(|_| ApiError::InvalidModelType(name.clone()))?;
            state.memory.clear(&conversation_id, backend).await?
        }
        None => {
            state.rag.clear_session(&conversation_id);
            state.memory.clear_all(&conversation_id).await?
        }
    };

    info!(%conversation_id, removed, "memory cleared");

    Ok(Json(serde_json::json!({ "cleared": removed })))
}

async fn owned_session(
    state: &Arc<AppState>,
    auth: &AuthUser,
    session_id: &str,
) -> Result<crate::database::ChatSessionRow, ApiError> {
    let session = state
        .repository
        .get_session(session_id)
        .await?
        .ok_or_else(|| ApiError::SessionNotFound(session_id.to_string()))?;

    if session.user_id != auth.user_id {
        return Err(ApiError::Forbidden(format!(
            "session {session_id} belongs to another user"
        )));
    }

    Ok(session)
}

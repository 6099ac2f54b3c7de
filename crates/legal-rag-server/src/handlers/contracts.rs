use crate::auth::AuthUser;
use crate::database::{ContractReview, ReviewStatus};
use crate::models::review::{PagedReviews, ReviewDetail, ReviewSummary, RiskClauseInfo, UploadAccepted};
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// POST /contracts/upload (multipart) -> 202 Accepted
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadAccepted>), ApiError> {
    let mut file_data: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read field: {e}")))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().map(str::to_string);
            file_data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read file: {e}")))?
                    .to_vec(),
            );
        }
    }

    let file_data = file_data.ok_or_else(|| ApiError::BadRequest("file required".to_string()))?;
    let filename = filename.ok_or_else(|| ApiError::BadRequest("filename required".to_string()))?;

    info!(user_id = auth.user_id, %filename, size = file_data.len(), "contract upload");

    let review = state
        .review_engine
        .submit(auth.user_id, &filename, &file_data)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadAccepted {
            review_id: review.id,
            status: review.review_status,
        }),
    ))
}

/// GET /contracts/{id}/analyze-async -> SSE
///
/// Event names are the client contract: `connected`, `info`, `progress`,
/// `result`, `complete`, `timeout`, `error`. On timeout the stream closes
/// but the background pipeline keeps running; clients poll the record
/// later. Triggering on a COMPLETED review replays the stored result
/// without re-running anything.
pub async fn analyze_async_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(review_id): Path<i64>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let review = owned_review(&state, &auth, review_id).await?;

    info!(review_id, status = %review.review_status, "analyze-async subscribed");

    // Subscribe before any state checks so no event can slip between the
    // check and the subscription.
    let rx = state.review_events.subscribe(review_id);

    if review.status() == ReviewStatus::Pending {
        state.review_engine.enqueue(review_id);
    }

    let deadline = Duration::from_secs(state.settings.review.sse_timeout_minutes * 60);
    let state_for_stream = state.clone();

    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(sse_event(
            "connected",
            serde_json::json!({ "reviewId": review_id }).to_string(),
        ));

        // Terminal records replay their persisted outcome immediately.
        match review.status() {
            ReviewStatus::Completed => {
                if let Some(payload) = stored_result_payload(&state_for_stream, &review).await {
                    yield Ok(sse_event("result", payload.to_string()));
                }
                yield Ok(sse_event("complete", serde_json::json!({ "message": "合同审查完成" }).to_string()));
                return;
            }
            ReviewStatus::Failed => {
                let message = review
                    .review_result
                    .as_ref()
                    .and_then(|r| r.get("error"))
                    .and_then(|e| e.as_str())
                    .unwrap_or("合同审查失败")
                    .to_string();
                yield Ok(sse_event("error", serde_json::json!({ "message": message }).to_string()));
                return;
            }
            _ => {
                yield Ok(sse_event(
                    "info",
                    serde_json::json!({ "message": "审查进行中，正在推送进度" }).to_string(),
                ));
            }
        }

        // The pipeline may have reached a terminal state between the
        // initial load and the subscription above; re-check once so the
        // stream cannot hang waiting for events that were already sent.
        if let Ok(Some(current)) = state_for_stream.repository.get_review(review_id).await {
            match current.status() {
                ReviewStatus::Completed => {
                    if let Some(payload) = stored_result_payload(&state_for_stream, &current).await {
                        yield Ok(sse_event("result", payload.to_string()));
                    }
                    yield Ok(sse_event("complete", serde_json::json!({ "message": "合同审查完成" }).to_string()));
                    return;
                }
                ReviewStatus::Failed => {
                    yield Ok(sse_event("error", serde_json::json!({ "message": "合同审查失败" }).to_string()));
                    return;
                }
                _ => {}
            }
        }

        let timeout_at = tokio::time::Instant::now() + deadline;
        let mut rx = rx;

        loop {
            let received = tokio::select! {
                received = rx.recv() => Some(received),
                _ = tokio::time::sleep_until(timeout_at) => None,
            };

            // Deadline hit: close the stream, the pipeline keeps running
            // and clients can poll the record later.
            let Some(event) = received else {
                yield Ok(sse_event(
                    "timeout",
                    serde_json::json!({
                        "message": "连接超时，审查仍在后台进行，可稍后查询结果",
                        "reviewId": review_id,
                    })
                    .to_string(),
                ));
                return;
            };

            match event {
                Ok(review_event) => {
                    let terminal = review_event.is_terminal();
                    yield Ok(sse_event(review_event.name(), review_event.data()));
                    if terminal {
                        return;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(review_id, skipped, "slow SSE consumer lagged");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    return;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// GET /contracts/{id}
pub async fn get_review_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(review_id): Path<i64>,
) -> Result<Json<ReviewDetail>, ApiError> {
    let review = owned_review(&state, &auth, review_id).await?;
    let clauses = state.repository.list_risk_clauses(review_id).await?;

    Ok(Json(ReviewDetail {
        summary: ReviewSummary::from(&review),
        review_result: review.review_result.clone(),
        risk_clauses: clauses.iter().map(RiskClauseInfo::from).collect(),
    }))
}

/// GET /contracts/{id}/summary
pub async fn review_summary_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(review_id): Path<i64>,
) -> Result<Json<ReviewSummary>, ApiError> {
    let review = owned_review(&state, &auth, review_id).await?;

    Ok(Json(ReviewSummary::from(&review)))
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub size: i64,
}

fn default_page_size() -> i64 {
    10
}

/// GET /contracts/my-reviews?page&size
pub async fn my_reviews_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(params): Query<PageParams>,
) -> Result<Json<PagedReviews>, ApiError> {
    let page = params.page.max(0);
    let size = params.size.clamp(1, 100);

    let (reviews, total) = state
        .repository
        .list_reviews(auth.user_id, page, size)
        .await?;

    Ok(Json(PagedReviews {
        items: reviews.iter().map(ReviewSummary::from).collect(),
        page,
        size,
        total,
    }))
}

/// GET /contracts/{id}/report
///
/// The PDF itself is rendered by the external report collaborator; this
/// endpoint hands it the full structured payload.
pub async fn review_report_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(review_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let review = owned_review(&state, &auth, review_id).await?;

    if review.status() != ReviewStatus::Completed {
        return Err(ApiError::BadRequest(format!(
            "review {review_id} is not completed"
        )));
    }

    let payload = stored_result_payload(&state, &review)
        .await
        .ok_or_else(|| ApiError::InternalError("missing review result".to_string()))?;

    Ok(Json(payload))
}

/// POST /contracts/{id}/reprocess
pub async fn reprocess_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(review_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    owned_review(&state, &auth, review_id).await?;

    state.review_engine.reprocess(review_id).await?;

    Ok(Json(serde_json::json!({
        "reviewId": review_id,
        "status": ReviewStatus::Pending.as_str(),
    })))
}

fn sse_event(name: &'static str, data: String) -> Event {
    Event::default().event(name).data(data)
}

async fn stored_result_payload(
    state: &Arc<AppState>,
    review: &ContractReview,
) -> Option<serde_json::Value> {
    let clauses = state.repository.list_risk_clauses(review.id).await.ok()?;

    Some(serde_json::json!({
        "reviewId": review.id,
        "originalFilename": review.original_filename,
        "status": review.review_status,
        "riskLevel": review.risk_level,
        "totalRisks": review.total_risks,
        "reviewResult": review.review_result,
        "riskClauses": clauses
            .iter()
            .map(RiskClauseInfo::from)
            .map(|c| serde_json::to_value(c).unwrap_or_default())
            .collect::<Vec<_>>(),
        "createdAt": review.created_at,
        "completedAt": review.completed_at,
    }))
}

async fn owned_review(
    state: &Arc<AppState>,
    auth: &AuthUser,
    review_id: i64,
) -> Result<ContractReview, ApiError> {
    let review = state
        .repository
        .get_review(review_id)
        .await?
        .ok_or(ApiError::ReviewNotFound(review_id))?;

    if review.user_id != auth.user_id {
        return Err(ApiError::Forbidden(format!(
            "review {review_id} belongs to another user"
        )));
    }

    Ok(review)
}

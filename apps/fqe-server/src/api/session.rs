use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::AppState;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelRequest {
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelResponse {
    pub status: String,
    pub request_id: String,
    pub db_query_cancelled: bool,
}

/// Flag a request as cancelled and interrupt its running database query.
#[utoipa::path(
    post,
    path = "/api/cancel",
    tag = "Query",
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Cancellation recorded (or missing request_id)", body = CancelResponse)
    )
)]
pub async fn cancel(
    State(state): State<AppState>,
    body: Option<Json<CancelRequest>>,
) -> impl IntoResponse {
    let request_id = body
        .and_then(|Json(req)| req.request_id)
        .map(|id| id.trim().to_string())
        .unwrap_or_default();
    if request_id.is_empty() {
        return Json(json!({"status": "error", "message": "request_id is required"}));
    }

    state.cancellations().mark(&request_id);
    let db_query_cancelled = state.executor().cancel(&request_id).await;
    let label = if db_query_cancelled { "true" } else { "false" };
    metrics::counter!("fqe_cancellations_total", "db" => label).increment(1);
    info!(
        request_id = %request_id,
        db_query_cancelled,
        in_flight = state.executor().active().len(),
        pending_flags = state.cancellations().len(),
        "cancel requested"
    );

    Json(json!(CancelResponse {
        status: "ok".into(),
        request_id,
        db_query_cancelled,
    }))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ClearParams {
    /// Session to clear; defaults to `default`.
    pub session_id: Option<String>,
}

/// Forget a session's conversation.
#[utoipa::path(
    post,
    path = "/api/clear",
    tag = "Query",
    params(ClearParams),
    responses(
        (status = 200, description = "Session cleared", body = serde_json::Value)
    )
)]
pub async fn clear(
    State(state): State<AppState>,
    Query(params): Query<ClearParams>,
) -> impl IntoResponse {
    let session_id = params
        .session_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| "default".to_string());
    state.sessions().clear(&session_id);
    info!(session_id = %session_id, "session cleared");
    Json(json!({"status": "ok", "message": "Session cleared"}))
}

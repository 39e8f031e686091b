use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use utoipa::OpenApi;

use crate::execution::SqlParams;
use crate::AppState;

pub const HEALTH_SQL: &str = "SELECT 1 AS ok";

/// Database round-trip through the read-only execution path.
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Meta",
    responses(
        (status = 200, description = "Database reachable", body = crate::openapi::HealthOk),
        (status = 503, description = "Database unreachable", body = crate::openapi::HealthDown)
    )
)]
pub async fn health(State(state): State<AppState>) -> Response {
    match state
        .executor()
        .execute(HEALTH_SQL, &SqlParams::None, None)
        .await
    {
        Ok(_) => Json(json!({
            "status": "healthy",
            "database": "connected",
            "mode": "read-only",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
        .into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unhealthy", "error": err.to_string()})),
            )
                .into_response()
        }
    }
}

/// OpenAPI document for this service.
#[utoipa::path(
    get,
    path = "/api/openapi.json",
    tag = "Meta",
    responses((status = 200, description = "OpenAPI 3 document", body = serde_json::Value))
)]
pub async fn openapi_json() -> impl IntoResponse {
    Json(crate::openapi::ApiDoc::openapi())
}

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::pipeline::QueryResponse;
use crate::AppState;

fn default_session() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default = "default_session")]
    pub session_id: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Answer a natural-language question about the forecast data.
#[utoipa::path(
    post,
    path = "/api/query",
    tag = "Query",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Answer, possibly carrying an error", body = QueryResponse)
    )
)]
pub async fn query(State(state): State<AppState>, Json(req): Json<QueryRequest>) -> impl IntoResponse {
    let pipeline = state.pipeline();
    let request_id = req
        .request_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let task_id = request_id.clone();
    // Runs to completion even if the client disconnects.
    let handle = tokio::spawn(async move {
        pipeline
            .run(&req.question, &req.session_id, Some(&task_id))
            .await
    });
    match handle.await {
        Ok(response) => Json(response),
        Err(err) => {
            tracing::error!(request_id = %request_id, error = %err, "pipeline task failed");
            Json(QueryResponse::failure(&err.to_string(), &request_id))
        }
    }
}

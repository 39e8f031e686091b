use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::responses::problem;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ExportRequest {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    #[schema(value_type = Vec<Vec<serde_json::Value>>)]
    pub rows: Vec<Vec<Value>>,
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn render_csv(req: &ExportRequest) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    writer.write_record(&req.columns)?;
    for row in &req.rows {
        writer.write_record(row.iter().map(cell))?;
    }
    writer
        .into_inner()
        .map_err(|err| csv::Error::from(err.into_error()))
}

pub fn export_filename(now: chrono::DateTime<chrono::Utc>) -> String {
    format!("forecast_data_{}.csv", now.format("%Y%m%d_%H%M%S"))
}

/// Download a result set as CSV.
#[utoipa::path(
    post,
    path = "/api/export/csv",
    tag = "Export",
    request_body = ExportRequest,
    responses(
        (status = 200, description = "CSV attachment", content_type = "text/csv", body = String),
        (status = 500, description = "Rendering failed")
    )
)]
pub async fn export_csv(Json(req): Json<ExportRequest>) -> Response {
    let body = match render_csv(&req) {
        Ok(body) => body,
        Err(err) => {
            tracing::error!(error = %err, "csv export failed");
            return problem(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Export Failed",
                Some(&err.to_string()),
            );
        }
    };
    let disposition = format!("attachment; filename={}", export_filename(chrono::Utc::now()));
    (
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

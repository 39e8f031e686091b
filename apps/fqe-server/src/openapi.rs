use utoipa::{OpenApi, ToSchema};

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct HealthOk {
    #[schema(example = "healthy")]
    pub status: String,
    #[schema(example = "connected")]
    pub database: String,
    #[schema(example = "read-only")]
    pub mode: String,
    pub timestamp: String,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct HealthDown {
    #[schema(example = "unhealthy")]
    pub status: String,
    pub error: String,
}

#[derive(OpenApi)]
#[openapi(
    info(title = "fqe-server", description = "Read-only natural-language gateway over forecast ensembles"),
    paths(
        crate::api::query::query,
        crate::api::session::cancel,
        crate::api::session::clear,
        crate::api::export::export_csv,
        crate::api::meta::health,
        crate::api::meta::openapi_json,
    ),
    components(schemas(
        HealthOk,
        HealthDown,
        crate::api::query::QueryRequest,
        crate::pipeline::QueryResponse,
        crate::execution::QueryResult,
        crate::interpreter::ChartSpec,
        crate::interpreter::ChartKind,
        crate::api::session::CancelRequest,
        crate::api::session::CancelResponse,
        crate::api::export::ExportRequest,
    )),
    tags(
        (name = "Query", description = "Question answering, cancellation and sessions"),
        (name = "Export", description = "Result downloads"),
        (name = "Meta", description = "Health and API description")
    )
)]
pub struct ApiDoc;

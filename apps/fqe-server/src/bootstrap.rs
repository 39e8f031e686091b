use std::sync::Arc;

use anyhow::Context as _;
use tracing::{info, warn};
use utoipa::OpenApi;

use crate::bedrock::{AuthMode, BedrockBackend};
use crate::config::GatewayConfig;
use crate::interpreter::LlmInterpreter;
use crate::postgres::PgExecutor;
use crate::{access_log, router, AppState};

pub(crate) struct BootstrapOutput {
    pub router: axum::Router<AppState>,
    pub state: AppState,
    pub executor: Arc<PgExecutor>,
}

pub(crate) async fn build(cfg: &GatewayConfig) -> anyhow::Result<BootstrapOutput> {
    let executor = Arc::new(
        PgExecutor::connect(&cfg.database, cfg.limits).context("initialise database pool")?,
    );
    executor.prewarm(cfg.database.pool_min).await;

    let backend = BedrockBackend::new(&cfg.bedrock).context("initialise interpreter client")?;
    if backend.auth_mode() == AuthMode::None {
        warn!("no Bedrock credentials (BEDROCK_API_KEY / AWS_BEARER_TOKEN_BEDROCK); questions will fail until one is set");
    }
    let interpreter = Arc::new(LlmInterpreter::new(backend, cfg.limits.max_rows));

    let state = AppState::builder(interpreter, executor.clone())
        .with_history_pairs(cfg.history_pairs)
        .with_cancel_flag_ttl(cfg.cancel_flag_ttl)
        .build();

    let (router, endpoints) = router::build_router();
    info!(count = endpoints.len(), endpoints = ?endpoints, "routes registered");

    Ok(BootstrapOutput {
        router,
        state,
        executor,
    })
}

pub(crate) fn attach_stateful_layers(
    router: axum::Router<AppState>,
    state: AppState,
) -> axum::Router<()> {
    router.with_state::<()>(state)
}

pub(crate) fn attach_http_layers(
    router: axum::Router<()>,
    concurrency_limit: usize,
) -> axum::Router<()> {
    use tower::limit::ConcurrencyLimitLayer;
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    router
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(concurrency_limit))
}

pub(crate) fn attach_global_layers(router: axum::Router<()>) -> axum::Router<()> {
    router.layer(axum::middleware::from_fn(access_log::access_log_mw))
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum HttpConfigError {
    #[error("invalid FQE_HTTP_MAX_CONC: {0}")]
    InvalidConcurrency(String),
    #[error("invalid FQE_PORT: {0}")]
    InvalidPort(String),
    #[error("invalid FQE_BIND: {0}")]
    InvalidBind(String),
}

pub(crate) struct HttpConfig {
    pub addr: std::net::SocketAddr,
    pub concurrency_limit: usize,
}

pub(crate) fn http_config_from_env() -> Result<HttpConfig, HttpConfigError> {
    let concurrency_limit = std::env::var("FQE_HTTP_MAX_CONC")
        .ok()
        .map(|raw| match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(HttpConfigError::InvalidConcurrency(raw)),
        })
        .transpose()?
        .unwrap_or(256);

    let bind = std::env::var("FQE_BIND").unwrap_or_else(|_| "127.0.0.1".into());
    let port_raw = std::env::var("FQE_PORT").unwrap_or_else(|_| "8000".into());
    let port: u16 = port_raw
        .trim()
        .parse()
        .map_err(|_| HttpConfigError::InvalidPort(port_raw.clone()))?;

    let host = if bind.contains(':') && !bind.starts_with('[') {
        format!("[{bind}]")
    } else {
        bind.clone()
    };
    let addr = format!("{host}:{port}")
        .parse()
        .map_err(|_| HttpConfigError::InvalidBind(bind.clone()))?;

    Ok(HttpConfig {
        addr,
        concurrency_limit,
    })
}

/// `OPENAPI_OUT=<path>` writes the OpenAPI YAML and reports the path; the
/// caller exits instead of serving.
pub(crate) fn ensure_openapi_export() -> Result<Option<String>, std::io::Error> {
    if let Ok(path) = std::env::var("OPENAPI_OUT") {
        export_openapi(&path)?;
        return Ok(Some(path));
    }
    Ok(None)
}

fn export_openapi(path: &str) -> Result<(), std::io::Error> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = crate::openapi::ApiDoc::openapi()
        .to_yaml()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    std::fs::write(path, yaml)
}

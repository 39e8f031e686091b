use std::net::SocketAddr;

use anyhow::Context as _;
use tracing::{error, info};

mod access_log;
mod api;
mod app_state;
mod bedrock;
mod bootstrap;
mod cancellation;
pub mod config;
mod execution;
mod history;
mod http_client;
mod interpreter;
mod openapi;
mod pipeline;
mod postgres;
mod responses;
#[cfg(test)]
mod test_support;

mod router;

pub(crate) use app_state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match bootstrap::ensure_openapi_export() {
        Ok(Some(_)) => return Ok(()),
        Ok(None) => {}
        Err(err) => {
            eprintln!("error: failed to write generated OPENAPI_OUT: {err}");
            std::process::exit(2);
        }
    }

    fqe_otel::init();

    let http_cfg = match bootstrap::http_config_from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };

    let cfg = config::GatewayConfig::from_env();
    let bootstrap::BootstrapOutput {
        router,
        state,
        executor,
    } = bootstrap::build(&cfg).await?;

    let app = bootstrap::attach_global_layers(bootstrap::attach_http_layers(
        bootstrap::attach_stateful_layers(router, state),
        http_cfg.concurrency_limit,
    ));

    let listener = tokio::net::TcpListener::bind(http_cfg.addr)
        .await
        .with_context(|| format!("bind server socket {}", http_cfg.addr))?;
    info!(addr = %http_cfg.addr, "fqe-server listening");

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(err) = server.await {
        error!("http server exited with error: {err}");
    }

    info!("closing database pool");
    executor.close();
    Ok(())
}

async fn shutdown_signal() {
    info!("shutdown signal listener active");
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}

//! Tracing bootstrap shared by the gateway binaries.
//!
//! Console output is filtered by `RUST_LOG` (default `info`). Setting
//! `FQE_ACCESS_LOG_ROLL=1` additionally routes events with the `http.access`
//! target to a rolling file under `FQE_ACCESS_LOG_DIR`.

use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Target used by the HTTP access-log middleware.
pub const ACCESS_TARGET: &str = "http.access";

static ACCESS_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
}

impl Rotation {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hourly" => Rotation::Hourly,
            "minutely" => Rotation::Minutely,
            _ => Rotation::Daily,
        }
    }
}

/// Rolling access-log file settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogFile {
    pub dir: PathBuf,
    pub prefix: String,
    pub rotation: Rotation,
}

impl AccessLogFile {
    /// Read `FQE_ACCESS_LOG_*`; `None` unless `FQE_ACCESS_LOG_ROLL=1`.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        if lookup("FQE_ACCESS_LOG_ROLL").as_deref() != Some("1") {
            return None;
        }
        let dir = lookup("FQE_ACCESS_LOG_DIR")
            .or_else(|| lookup("FQE_LOGS_DIR"))
            .unwrap_or_else(|| "logs".to_string());
        let prefix = lookup("FQE_ACCESS_LOG_PREFIX").unwrap_or_else(|| "http-access".into());
        let rotation = lookup("FQE_ACCESS_LOG_ROTATION")
            .map(|raw| Rotation::parse(&raw))
            .unwrap_or(Rotation::Daily);
        Some(Self {
            dir: PathBuf::from(dir),
            prefix,
            rotation,
        })
    }

    fn appender(&self) -> tracing_appender::rolling::RollingFileAppender {
        match self.rotation {
            Rotation::Hourly => tracing_appender::rolling::hourly(&self.dir, &self.prefix),
            Rotation::Minutely => tracing_appender::rolling::minutely(&self.dir, &self.prefix),
            Rotation::Daily => tracing_appender::rolling::daily(&self.dir, &self.prefix),
        }
    }
}

/// Install the global subscriber. Safe to call more than once; later calls are
/// no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(fmt::layer().with_filter(filter));

    match AccessLogFile::from_env() {
        Some(file) => {
            if std::fs::create_dir_all(&file.dir).is_err() {
                tracing::warn!(directory = %file.dir.display(), "failed to create access log directory");
            }
            let (nb, guard) = tracing_appender::non_blocking(file.appender());
            let _ = ACCESS_GUARD.set(guard);
            let targets = Targets::new().with_target(ACCESS_TARGET, tracing::Level::INFO);
            let access_layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(nb)
                .with_filter(targets);
            let _ = registry.with(access_layer).try_init();
        }
        None => {
            let _ = registry.try_init();
        }
    }
}

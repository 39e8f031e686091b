use std::time::Duration;

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn connect_timeout() -> Duration {
    Duration::from_secs(env_u64("FQE_HTTP_CONNECT_TIMEOUT_SECS", 10).max(1))
}

fn keepalive() -> Duration {
    Duration::from_secs(env_u64("FQE_HTTP_TCP_KEEPALIVE_SECS", 60).max(1))
}

fn pool_idle() -> Duration {
    Duration::from_secs(env_u64("FQE_HTTP_POOL_IDLE_SECS", 90).max(1))
}

fn user_agent() -> String {
    format!("fqe-server/{}", env!("CARGO_PKG_VERSION"))
}

/// Outbound client builder with shared defaults. Callers set `.timeout(...)`.
pub fn builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .user_agent(user_agent())
        .connect_timeout(connect_timeout())
        .tcp_keepalive(keepalive())
        .pool_idle_timeout(pool_idle())
}

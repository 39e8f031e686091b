use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::extract::{ConnectInfo, MatchedPath};
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use once_cell::sync::Lazy;

#[derive(Clone, Debug, PartialEq, Eq)]
struct Cfg {
    enabled: bool,
    sample_n: u64,
    ua: bool,
    referer: bool,
    trust_forward: bool,
}

impl Cfg {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).as_deref() == Some("1");
        Self {
            enabled: flag("FQE_ACCESS_LOG"),
            sample_n: lookup("FQE_ACCESS_SAMPLE_N")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(1u64)
                .max(1),
            ua: flag("FQE_ACCESS_UA"),
            referer: flag("FQE_ACCESS_REF"),
            trust_forward: flag("FQE_TRUST_FORWARD_HEADERS"),
        }
    }
}

static CFG: Lazy<Cfg> = Lazy::new(|| Cfg::from_lookup(|key| std::env::var(key).ok()));

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn first_forwarded_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(v) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        let ip = v.split(',').next().unwrap_or("").trim();
        if !ip.is_empty() {
            // strip port if present
            if let Some((host, port)) = ip.rsplit_once(':') {
                if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) {
                    return Some(host.to_string());
                }
            }
            return Some(ip.to_string());
        }
    }
    if let Some(v) = headers.get("forwarded").and_then(|h| h.to_str().ok()) {
        for part in v.split(';').flat_map(|s| s.split(',')) {
            if let Some(rest) = part.trim().strip_prefix("for=") {
                return Some(rest.trim_matches('"').to_string());
            }
        }
    }
    None
}

fn header_str(headers: &HeaderMap, name: axum::http::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
}

/// One `http.access` event per (sampled) request when `FQE_ACCESS_LOG=1`.
pub async fn access_log_mw(req: Request<axum::body::Body>, next: Next) -> Response {
    if !CFG.enabled {
        return next.run(req).await;
    }
    let started = Instant::now();
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip().to_string());
    let remote = if CFG.trust_forward {
        first_forwarded_ip(req.headers()).or(peer)
    } else {
        peer
    };
    let ua = CFG
        .ua
        .then(|| header_str(req.headers(), axum::http::header::USER_AGENT))
        .flatten();
    let referer = CFG
        .referer
        .then(|| header_str(req.headers(), axum::http::header::REFERER))
        .flatten()
        .map(|r| r.split('?').next().unwrap_or("").to_string())
        .filter(|r| !r.is_empty());

    let res = next.run(req).await;
    let n = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    if CFG.sample_n > 1 && n % CFG.sample_n != 0 {
        return res;
    }
    tracing::info!(
        target: fqe_otel::ACCESS_TARGET,
        method = %method,
        path = %path,
        status = res.status().as_u16(),
        dur_ms = started.elapsed().as_millis() as u64,
        remote = remote.as_deref().unwrap_or("-"),
        ua = ua.as_deref().unwrap_or("-"),
        referer = referer.as_deref().unwrap_or("-"),
        "request"
    );
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_first_hop_without_port() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7:5123, 10.0.0.1"),
        );
        assert_eq!(first_forwarded_ip(&headers).as_deref(), Some("203.0.113.7"));

        headers.insert("x-forwarded-for", HeaderValue::from_static("2001:db8::1"));
        assert_eq!(first_forwarded_ip(&headers).as_deref(), Some("2001:db8::1"));
    }

    #[test]
    fn forwarded_header_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "forwarded",
            HeaderValue::from_static("proto=https;for=\"198.51.100.2\""),
        );
        assert_eq!(first_forwarded_ip(&headers).as_deref(), Some("198.51.100.2"));
        assert_eq!(first_forwarded_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn config_flags_and_sampling_floor() {
        let cfg = Cfg::from_lookup(|key| match key {
            "FQE_ACCESS_LOG" => Some("1".into()),
            "FQE_ACCESS_SAMPLE_N" => Some("0".into()),
            "FQE_ACCESS_UA" => Some("true".into()),
            _ => None,
        });
        assert!(cfg.enabled);
        assert_eq!(cfg.sample_n, 1);
        assert!(!cfg.ua);
        assert!(!cfg.trust_forward);
    }
}

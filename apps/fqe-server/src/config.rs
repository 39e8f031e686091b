//! Environment-driven gateway configuration, read once at startup.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::bedrock::BedrockConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslPreference {
    Disable,
    Require,
}

impl SslPreference {
    fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("disable") {
            SslPreference::Disable
        } else {
            SslPreference::Require
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub sslmode: SslPreference,
    pub pool_min: usize,
    pub pool_max: usize,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub max_rows: usize,
    pub statement_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub database: DatabaseConfig,
    pub limits: ExecutionLimits,
    /// User/assistant pairs kept per session.
    pub history_pairs: usize,
    /// How long an unobserved cancel flag stays set.
    pub cancel_flag_ttl: Duration,
    pub bedrock: BedrockConfig,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let secret = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = text("DB_HOST", "");
        let pool_max = env_parse(&lookup, "DB_POOL_MAX", 10usize).max(1);
        let database = DatabaseConfig {
            host: if host.trim().is_empty() {
                "localhost".to_string()
            } else {
                host
            },
            port: env_parse(&lookup, "DB_PORT", 5432u16),
            dbname: text("DB_NAME", "forecast"),
            user: text("DB_USER", ""),
            password: text("DB_PASSWORD", ""),
            sslmode: SslPreference::parse(&text("DB_SSLMODE", "require")),
            pool_min: env_parse(&lookup, "DB_POOL_MIN", 2usize).min(pool_max),
            pool_max,
            connect_timeout: Duration::from_secs(
                env_parse(&lookup, "DB_CONNECT_TIMEOUT_SECS", 10u64).max(1),
            ),
        };

        let limits = ExecutionLimits {
            max_rows: env_parse(&lookup, "MAX_QUERY_ROWS", 5000usize).max(1),
            statement_timeout: Duration::from_secs(
                env_parse(&lookup, "QUERY_TIMEOUT_SEC", 120u64).max(1),
            ),
        };

        let bedrock = BedrockConfig {
            region: text("AWS_REGION", "us-east-2"),
            model_id: text("BEDROCK_MODEL_ID", "us.amazon.nova-pro-v1:0"),
            api_key: secret("BEDROCK_API_KEY"),
            bearer_token: secret("AWS_BEARER_TOKEN_BEDROCK"),
            endpoint: secret("BEDROCK_ENDPOINT"),
            timeout: Duration::from_secs(env_parse(&lookup, "LLM_TIMEOUT_SECS", 180u64).max(1)),
            max_tokens: 4096,
        };

        Self {
            database,
            limits,
            history_pairs: env_parse(&lookup, "MAX_HISTORY_TURNS", 20usize).max(1),
            cancel_flag_ttl: Duration::from_secs(
                env_parse(&lookup, "CANCEL_FLAG_TTL_SECS", 900u64).max(1),
            ),
            bedrock,
        }
    }
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) if raw.trim().is_empty() => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, %default, "invalid value; using default");
            default
        }),
    }
}

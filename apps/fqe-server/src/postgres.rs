//! Postgres execution path.
//!
//! Every checkout forces the session read-only, and every query runs inside a
//! read-only transaction with a `statement_timeout`. Rows are pulled through a
//! portal capped at `max_rows + 1` so truncation is detected without a count.
//!
//! Cancellation goes through the connection's cancel token, which opens its
//! own short-lived socket to the server, so a saturated pool never delays it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{CancelToken, NoTls, Row};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, error, info, warn};

use crate::config::{DatabaseConfig, ExecutionLimits, SslPreference};
use crate::execution::{
    self, ActiveQueries, BackendHandle, QueryError, QueryExecutor, QueryResult,
    RegistrationGuard, SqlParams,
};

type Param = Box<dyn ToSql + Sync + Send>;

#[derive(Debug, thiserror::Error)]
pub enum PoolSetupError {
    #[error("failed to configure TLS for Postgres: {0}")]
    Tls(String),
    #[error("failed to build Postgres pool: {0}")]
    Build(String),
}

/// Transport used for out-of-band cancel requests; mirrors the pool's.
#[derive(Clone)]
enum CancelTls {
    Plain,
    Rustls(MakeRustlsConnect),
}

type CancelTokens = Mutex<HashMap<BackendHandle, CancelToken>>;

pub struct PgExecutor {
    pool: Pool,
    active: ActiveQueries,
    cancel_tokens: CancelTokens,
    tls: CancelTls,
    limits: ExecutionLimits,
}

impl PgExecutor {
    pub fn connect(cfg: &DatabaseConfig, limits: ExecutionLimits) -> Result<Self, PoolSetupError> {
        let (pool, tls) = build_pool(cfg)?;
        Ok(Self {
            pool,
            active: ActiveQueries::new(),
            cancel_tokens: Mutex::new(HashMap::new()),
            tls,
            limits,
        })
    }

    /// Open up to `count` connections up front. Failures are logged, not fatal.
    pub async fn prewarm(&self, count: usize) {
        let attempts = (0..count).map(|_| self.pool.get());
        let results = futures_util::future::join_all(attempts).await;
        let ready = results.iter().filter(|r| r.is_ok()).count();
        if let Some(Err(err)) = results.iter().find(|r| r.is_err()) {
            warn!(error = %err, ready, requested = count, "database prewarm incomplete");
        }
        info!(ready, requested = count, "database pool ready (READ-ONLY enforced)");
    }

    pub fn close(&self) {
        self.pool.close();
    }

    async fn run(
        &self,
        client: &mut deadpool_postgres::Object,
        sql: &str,
        params: &SqlParams,
        registration: &RegistrationGuard<'_>,
    ) -> Result<QueryResult, QueryError> {
        let tx = client
            .build_transaction()
            .read_only(true)
            .start()
            .await
            .map_err(db_error)?;
        tx.batch_execute(&format!(
            "SET LOCAL statement_timeout = {}",
            self.limits.statement_timeout.as_millis()
        ))
        .await
        .map_err(db_error)?;

        let statement = tx.prepare(sql).await.map_err(db_error)?;
        let bound = bind_params(statement.params(), params)?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let portal = tx.bind(&statement, &refs).await.map_err(db_error)?;

        // A cancel delivered while the backend sat idle between round-trips
        // interrupts nothing; honour it before the statement starts.
        if registration.is_revoked() {
            return Err(QueryError::cancelled());
        }

        let max_rows = self.limits.max_rows;
        let fetch = i32::try_from(max_rows.saturating_add(1)).unwrap_or(i32::MAX);
        let fetched = tx.query_portal(&portal, fetch).await.map_err(db_error)?;
        let (rows, truncated) = cap_rows(fetched, max_rows);

        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let rows = rows.iter().map(row_values).collect();
        tx.commit().await.map_err(db_error)?;
        Ok(QueryResult::new(columns, rows, truncated))
    }

    async fn send_cancel(&self, token: &CancelToken) -> Result<(), tokio_postgres::Error> {
        match &self.tls {
            CancelTls::Plain => token.cancel_query(NoTls).await,
            CancelTls::Rustls(tls) => token.cancel_query(tls.clone()).await,
        }
    }
}

/// Keeps a connection's cancel token reachable while its query runs.
struct TokenLease<'a> {
    tokens: &'a CancelTokens,
    backend_pid: BackendHandle,
}

impl<'a> TokenLease<'a> {
    fn new(tokens: &'a CancelTokens, backend_pid: BackendHandle, token: CancelToken) -> Self {
        tokens.lock().insert(backend_pid, token);
        Self {
            tokens,
            backend_pid,
        }
    }
}

impl Drop for TokenLease<'_> {
    fn drop(&mut self) {
        self.tokens.lock().remove(&self.backend_pid);
    }
}

/// Keep at most `max` rows; the second value reports whether any were dropped.
fn cap_rows<T>(mut rows: Vec<T>, max: usize) -> (Vec<T>, bool) {
    let truncated = rows.len() > max;
    if truncated {
        rows.truncate(max);
    }
    (rows, truncated)
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn execute(
        &self,
        sql: &str,
        params: &SqlParams,
        request_id: Option<&str>,
    ) -> Result<QueryResult, QueryError> {
        execution::screen(sql)?;

        let mut client = self.pool.get().await.map_err(pool_error)?;
        client
            .batch_execute("SET default_transaction_read_only = on")
            .await
            .map_err(db_error)?;
        let backend_pid: i32 = client
            .query_one("SELECT pg_backend_pid()", &[])
            .await
            .and_then(|row| row.try_get(0))
            .map_err(db_error)?;

        let _lease = request_id
            .map(|_| TokenLease::new(&self.cancel_tokens, backend_pid, client.cancel_token()));
        let registration = self.active.register(request_id, backend_pid);
        let outcome = self.run(&mut client, sql, params, &registration).await;
        let label = match &outcome {
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };
        metrics::counter!("fqe_sql_executions_total", "outcome" => label).increment(1);
        if let Err(err) = &outcome {
            debug!(backend_pid = registration.handle(), error = %err, "query failed");
        }
        outcome
    }

    async fn cancel(&self, request_id: &str) -> bool {
        let Some(backend_pid) = self.active.take(request_id) else {
            return false;
        };
        let token = self.cancel_tokens.lock().get(&backend_pid).cloned();
        let Some(token) = token else {
            debug!(request_id, backend_pid, "query finished before cancel");
            return false;
        };
        match self.send_cancel(&token).await {
            Ok(()) => {
                info!(request_id, backend_pid, "cancel request sent");
                true
            }
            Err(err) => {
                error!(request_id, backend_pid, error = %err, "failed to cancel query");
                false
            }
        }
    }

    fn active(&self) -> &ActiveQueries {
        &self.active
    }
}

fn db_error(err: tokio_postgres::Error) -> QueryError {
    match err.as_db_error() {
        Some(db) => QueryError::Database(db.message().to_string()),
        None => QueryError::Database(err.to_string()),
    }
}

fn pool_error(err: deadpool_postgres::PoolError) -> QueryError {
    QueryError::Pool(err.to_string())
}

fn build_pool(cfg: &DatabaseConfig) -> Result<(Pool, CancelTls), PoolSetupError> {
    let mut pg = tokio_postgres::Config::new();
    pg.host(&cfg.host)
        .port(cfg.port)
        .dbname(&cfg.dbname)
        .user(&cfg.user)
        .password(cfg.password.as_bytes())
        .connect_timeout(cfg.connect_timeout)
        .application_name("fqe-server");

    let manager_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let (manager, tls) = match cfg.sslmode {
        SslPreference::Disable => {
            pg.ssl_mode(tokio_postgres::config::SslMode::Disable);
            (Manager::from_config(pg, NoTls, manager_config), CancelTls::Plain)
        }
        SslPreference::Require => {
            pg.ssl_mode(tokio_postgres::config::SslMode::Require);
            let connector = tls_connector()?;
            (
                Manager::from_config(pg, connector.clone(), manager_config),
                CancelTls::Rustls(connector),
            )
        }
    };

    let pool = Pool::builder(manager)
        .max_size(cfg.pool_max)
        .runtime(Runtime::Tokio1)
        .create_timeout(Some(cfg.connect_timeout))
        .wait_timeout(Some(cfg.connect_timeout + Duration::from_secs(5)))
        .build()
        .map_err(|err| PoolSetupError::Build(err.to_string()))?;
    Ok((pool, tls))
}

fn tls_connector() -> Result<MakeRustlsConnect, PoolSetupError> {
    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        warn!(error = %err, "failed to load a native root certificate");
    }
    let mut roots = rustls::RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    debug!(added, ignored, "loaded native root certificates");
    if roots.is_empty() {
        return Err(PoolSetupError::Tls(
            "no root certificates available for TLS".to_string(),
        ));
    }
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|err| PoolSetupError::Tls(err.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(MakeRustlsConnect::new(tls))
}

fn bind_params(types: &[Type], params: &SqlParams) -> Result<Vec<Param>, QueryError> {
    let values: &[Value] = match params {
        SqlParams::None => &[],
        SqlParams::Positional(values) => values,
        SqlParams::Named(_) => {
            return Err(QueryError::Params(
                "named parameters are not supported; use a positional array for $1..$n".into(),
            ))
        }
    };
    if values.len() != types.len() {
        return Err(QueryError::Params(format!(
            "statement expects {} parameter(s) but {} were supplied",
            types.len(),
            values.len()
        )));
    }
    values
        .iter()
        .zip(types)
        .map(|(value, ty)| to_sql_param(value, ty).map_err(QueryError::Params))
        .collect()
}

fn typed<T, F>(value: &Value, ty: &Type, extract: F) -> Result<Param, String>
where
    T: ToSql + Sync + Send + 'static,
    F: FnOnce(&Value) -> Option<T>,
{
    if value.is_null() {
        let param: Param = Box::new(None::<T>);
        return Ok(param);
    }
    match extract(value) {
        Some(v) => {
            let param: Param = Box::new(Some(v));
            Ok(param)
        }
        None => Err(format!("cannot bind {value} as {ty}")),
    }
}

fn to_sql_param(value: &Value, ty: &Type) -> Result<Param, String> {
    match *ty {
        Type::BOOL => typed::<bool, _>(value, ty, Value::as_bool),
        Type::INT2 => typed::<i16, _>(value, ty, |v| v.as_i64().and_then(|n| i16::try_from(n).ok())),
        Type::INT4 => typed::<i32, _>(value, ty, |v| v.as_i64().and_then(|n| i32::try_from(n).ok())),
        Type::INT8 => typed::<i64, _>(value, ty, Value::as_i64),
        Type::FLOAT4 => typed::<f32, _>(value, ty, |v| v.as_f64().map(|f| f as f32)),
        Type::FLOAT8 => typed::<f64, _>(value, ty, Value::as_f64),
        Type::NUMERIC => typed::<Decimal, _>(value, ty, |v| match v {
            Value::String(s) => s.trim().parse().ok(),
            other => other.as_f64().and_then(|f| Decimal::try_from(f).ok()),
        }),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            typed::<String, _>(value, ty, |v| match v {
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
        }
        Type::TIMESTAMPTZ => typed::<DateTime<Utc>, _>(value, ty, |v| {
            v.as_str().and_then(parse_timestamptz)
        }),
        Type::TIMESTAMP => typed::<NaiveDateTime, _>(value, ty, |v| {
            v.as_str().and_then(parse_timestamptz).map(|t| t.naive_utc())
        }),
        Type::DATE => typed::<NaiveDate, _>(value, ty, |v| {
            v.as_str()
                .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
        }),
        Type::JSON | Type::JSONB => typed::<Value, _>(value, ty, |v| Some(v.clone())),
        Type::UUID => typed::<uuid::Uuid, _>(value, ty, |v| {
            v.as_str().and_then(|s| uuid::Uuid::parse_str(s.trim()).ok())
        }),
        _ => Err(format!("unsupported parameter type {ty}")),
    }
}

/// Accepts RFC 3339, short offsets (`+00`), space separators, naive
/// timestamps (taken as UTC) and bare dates (midnight UTC).
fn parse_timestamptz(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%#z", "%Y-%m-%d %H:%M:%S%#z"] {
        if let Ok(ts) = DateTime::parse_from_str(raw, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn row_values(row: &Row) -> Vec<Value> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| cell(row, idx, column.type_()))
        .collect()
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Option<T> {
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

fn decimal(value: Decimal) -> Value {
    match value.to_f64().filter(|f| f.is_finite()) {
        Some(f) => float(f),
        None => Value::String(value.to_string()),
    }
}

fn cell(row: &Row, idx: usize, ty: &Type) -> Value {
    let value = match *ty {
        Type::BOOL => get::<bool>(row, idx).map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx).map(Value::from),
        Type::INT4 => get::<i32>(row, idx).map(Value::from),
        Type::INT8 => get::<i64>(row, idx).map(Value::from),
        Type::OID => get::<u32>(row, idx).map(Value::from),
        Type::FLOAT4 => get::<f32>(row, idx).map(|v| float(f64::from(v))),
        Type::FLOAT8 => get::<f64>(row, idx).map(float),
        Type::NUMERIC => get::<Decimal>(row, idx).map(decimal),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, idx).map(Value::String)
        }
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx).map(|v| Value::String(v.to_rfc3339())),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::DATE => get::<NaiveDate>(row, idx).map(|v| Value::String(v.to_string())),
        Type::TIME => get::<NaiveTime>(row, idx).map(|v| Value::String(v.to_string())),
        Type::JSON | Type::JSONB => get::<Value>(row, idx),
        Type::UUID => get::<uuid::Uuid>(row, idx).map(|v| Value::String(v.to_string())),
        _ => {
            debug!(column = idx, pg_type = %ty, "unsupported column type; returning null");
            None
        }
    };
    value.unwrap_or(Value::Null)
}

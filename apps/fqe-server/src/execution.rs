//! Query execution contract and the registry of in-flight backend handles.

use std::collections::HashMap;

use async_trait::async_trait;
use fqe_sqlguard::Rejection;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// Database-side identifier of a running query (the backend pid).
pub type BackendHandle = i32;

/// Rows already converted to JSON-safe values.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub truncated: bool,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>, truncated: bool) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            truncated,
        }
    }
}

/// Bind parameters as emitted by the interpreter in `sql_params`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SqlParams {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl SqlParams {
    /// Arrays bind positionally; empty arrays, empty objects and null mean no
    /// parameters. A bare scalar is treated as a single positional value.
    pub fn from_document(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => SqlParams::None,
            Some(Value::Array(items)) if items.is_empty() => SqlParams::None,
            Some(Value::Array(items)) => SqlParams::Positional(items.clone()),
            Some(Value::Object(map)) if map.is_empty() => SqlParams::None,
            Some(Value::Object(map)) => SqlParams::Named(map.clone()),
            Some(scalar) => SqlParams::Positional(vec![scalar.clone()]),
        }
    }
}

/// Why an execution attempt failed. `Display` is the text fed back to the
/// interpreter on retry and surfaced to the user.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("{0}")]
    Rejected(#[from] Rejection),
    #[error("database connection unavailable: {0}")]
    Pool(String),
    #[error("{0}")]
    Database(String),
    #[error("invalid query parameters: {0}")]
    Params(String),
}

/// Server text for a statement interrupted by a cancel request.
pub const CANCELLED_MESSAGE: &str = "canceling statement due to user request";

impl QueryError {
    pub fn cancelled() -> Self {
        QueryError::Database(CANCELLED_MESSAGE.to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::Rejected(_) => "rejected",
            QueryError::Pool(_) => "pool",
            QueryError::Database(_) => "database",
            QueryError::Params(_) => "params",
        }
    }
}

/// Run the read-only guard, counting rejections by reason.
pub fn screen(sql: &str) -> Result<(), QueryError> {
    fqe_sqlguard::validate(sql).map_err(|rejection| {
        tracing::warn!(reason = rejection.code(), %rejection, "SQL rejected by validator");
        metrics::counter!("fqe_sql_rejected_total", "reason" => rejection.code()).increment(1);
        QueryError::Rejected(rejection)
    })
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Validate and run one read-only statement. When `request_id` is given
    /// the backend handle is registered for the duration of the query.
    async fn execute(
        &self,
        sql: &str,
        params: &SqlParams,
        request_id: Option<&str>,
    ) -> Result<QueryResult, QueryError>;

    /// Interrupt the query registered under `request_id` without waiting on
    /// the executor's own connections. Returns true only if a handle existed
    /// and the cancel request was delivered.
    async fn cancel(&self, request_id: &str) -> bool;

    fn active(&self) -> &ActiveQueries;
}

/// Request id → backend handle for queries currently executing.
#[derive(Default)]
pub struct ActiveQueries {
    handles: Mutex<HashMap<String, BackendHandle>>,
}

impl ActiveQueries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `handle` under `request_id` until the returned guard drops.
    /// Anonymous executions (`None`) register nothing.
    pub fn register(
        &self,
        request_id: Option<&str>,
        handle: BackendHandle,
    ) -> RegistrationGuard<'_> {
        if let Some(id) = request_id {
            self.handles.lock().insert(id.to_string(), handle);
        }
        RegistrationGuard {
            registry: self,
            request_id: request_id.map(str::to_string),
            handle,
        }
    }

    /// Remove and return the handle for `request_id`.
    pub fn take(&self, request_id: &str) -> Option<BackendHandle> {
        self.handles.lock().remove(request_id)
    }

    #[cfg(test)]
    pub fn contains(&self, request_id: &str) -> bool {
        self.handles.lock().contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    fn holds(&self, request_id: &str, handle: BackendHandle) -> bool {
        self.handles.lock().get(request_id) == Some(&handle)
    }

    fn release(&self, request_id: &str, handle: BackendHandle) {
        let mut handles = self.handles.lock();
        if handles.get(request_id) == Some(&handle) {
            handles.remove(request_id);
        }
    }
}

/// Scoped registration; dropping it unregisters the handle unless a cancel
/// already took it or a newer query replaced it.
pub struct RegistrationGuard<'a> {
    registry: &'a ActiveQueries,
    request_id: Option<String>,
    handle: BackendHandle,
}

impl RegistrationGuard<'_> {
    pub fn handle(&self) -> BackendHandle {
        self.handle
    }

    /// True once a cancel has taken this registration (or a newer query
    /// replaced it). Anonymous registrations are never revoked.
    pub fn is_revoked(&self) -> bool {
        match self.request_id.as_deref() {
            Some(id) => !self.registry.holds(id, self.handle),
            None => false,
        }
    }
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.request_id.as_deref() {
            self.registry.release(id, self.handle);
        }
    }
}

//! Test doubles for the interpreter and the query executor, plus env guards.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;

use crate::execution::{self, ActiveQueries, QueryError, QueryExecutor, QueryResult, SqlParams};
use crate::history::Turn;
use crate::interpreter::{InterpretError, Intent, Interpreter, Synthesis};

pub mod env {
    use once_cell::sync::Lazy;
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    pub struct EnvGuard {
        _lock: MutexGuard<'static, ()>,
        saved: Vec<(&'static str, Option<String>)>,
    }

    pub fn guard() -> EnvGuard {
        EnvGuard {
            _lock: ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
            saved: Vec::new(),
        }
    }

    impl EnvGuard {
        fn remember(&mut self, key: &'static str) {
            if self.saved.iter().any(|(k, _)| *k == key) {
                return;
            }
            self.saved.push((key, std::env::var(key).ok()));
        }

        pub fn set(&mut self, key: &'static str, value: &str) {
            self.remember(key);
            std::env::set_var(key, value);
        }

        pub fn remove(&mut self, key: &'static str) {
            self.remember(key);
            std::env::remove_var(key);
        }

        pub fn clear_keys(&mut self, keys: &[&'static str]) {
            for &k in keys {
                self.remove(k);
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, val) in self.saved.drain(..) {
                match val {
                    Some(v) => std::env::set_var(key, v),
                    None => std::env::remove_var(key),
                }
            }
        }
    }
}

pub enum Scripted<T> {
    Reply(T),
    Fail(InterpretError),
    Panic(&'static str),
}

type Hook = Box<dyn Fn(usize) + Send + Sync>;

/// Replays queued intents and syntheses and records every history it saw.
#[derive(Default)]
pub struct ScriptedInterpreter {
    intents: Mutex<VecDeque<Scripted<Intent>>>,
    syntheses: Mutex<VecDeque<Scripted<Synthesis>>>,
    interpreted: Mutex<Vec<Vec<Turn>>>,
    synthesized: Mutex<Vec<(Vec<Turn>, String)>>,
    on_interpret: Option<Hook>,
}

impl ScriptedInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intent(self, intent: Intent) -> Self {
        self.intents.lock().push_back(Scripted::Reply(intent));
        self
    }

    pub fn interpret_error(self, err: InterpretError) -> Self {
        self.intents.lock().push_back(Scripted::Fail(err));
        self
    }

    pub fn interpret_panic(self, message: &'static str) -> Self {
        self.intents.lock().push_back(Scripted::Panic(message));
        self
    }

    pub fn synthesis(self, answer: &str) -> Self {
        self.syntheses.lock().push_back(Scripted::Reply(Synthesis {
            answer: answer.to_string(),
            explanation: None,
            chart: None,
        }));
        self
    }

    /// Run `hook(call_index)` at the start of every interpret call.
    pub fn on_interpret(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_interpret = Some(Box::new(hook));
        self
    }

    pub fn interpret_calls(&self) -> Vec<Vec<Turn>> {
        self.interpreted.lock().clone()
    }

    pub fn synthesize_calls(&self) -> Vec<(Vec<Turn>, String)> {
        self.synthesized.lock().clone()
    }
}

fn play<T>(step: Option<Scripted<T>>, what: &str) -> Result<T, InterpretError> {
    match step {
        Some(Scripted::Reply(value)) => Ok(value),
        Some(Scripted::Fail(err)) => Err(err),
        Some(Scripted::Panic(message)) => panic!("{message}"),
        None => Err(InterpretError::MalformedResponse(format!("{what} script exhausted"))),
    }
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    async fn interpret(&self, history: &[Turn]) -> Result<Intent, InterpretError> {
        let index = {
            let mut seen = self.interpreted.lock();
            seen.push(history.to_vec());
            seen.len() - 1
        };
        if let Some(hook) = &self.on_interpret {
            hook(index);
        }
        let step = self.intents.lock().pop_front();
        tokio::task::yield_now().await;
        play(step, "interpret")
    }

    async fn synthesize(
        &self,
        history: &[Turn],
        _result: &QueryResult,
        sql: &str,
    ) -> Result<Synthesis, InterpretError> {
        self.synthesized
            .lock()
            .push((history.to_vec(), sql.to_string()));
        let step = self.syntheses.lock().pop_front();
        match step {
            None => Ok(Synthesis {
                answer: "Here is what the forecast shows.".to_string(),
                explanation: None,
                chart: None,
            }),
            step => play(step, "synthesize"),
        }
    }
}

pub enum ExecStep {
    Rows(QueryResult),
    Fail(QueryError),
    /// Hold the registration until `cancel` is called, then fail like a
    /// cancelled statement.
    BlockUntilCancelled,
}

pub fn rows(columns: &[&str], rows: Vec<Vec<serde_json::Value>>) -> QueryResult {
    QueryResult::new(columns.iter().map(|c| c.to_string()).collect(), rows, false)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecCall {
    pub sql: String,
    pub params: SqlParams,
    pub request_id: Option<String>,
    /// Whether the request id was visible in the registry while running.
    pub registered: bool,
}

/// Executor honouring the registry contract without a database. Validation
/// runs exactly as on the real path.
pub struct ScriptedExecutor {
    steps: Mutex<VecDeque<ExecStep>>,
    calls: Mutex<Vec<ExecCall>>,
    active: ActiveQueries,
    cancelled: Notify,
    next_handle: AtomicI32,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            active: ActiveQueries::new(),
            cancelled: Notify::new(),
            next_handle: AtomicI32::new(1000),
        }
    }
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(self, step: ExecStep) -> Self {
        self.steps.lock().push_back(step);
        self
    }

    pub fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        sql: &str,
        params: &SqlParams,
        request_id: Option<&str>,
    ) -> Result<QueryResult, QueryError> {
        execution::screen(sql)?;
        let step = self.steps.lock().pop_front();
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let _registration = self.active.register(request_id, handle);
        self.calls.lock().push(ExecCall {
            sql: sql.to_string(),
            params: params.clone(),
            request_id: request_id.map(str::to_string),
            registered: request_id.is_some_and(|id| self.active.contains(id)),
        });
        tokio::task::yield_now().await;
        match step {
            Some(ExecStep::Rows(result)) => Ok(result),
            Some(ExecStep::Fail(err)) => Err(err),
            Some(ExecStep::BlockUntilCancelled) => {
                self.cancelled.notified().await;
                Err(QueryError::cancelled())
            }
            None => Ok(rows(&["ok"], vec![vec![json!(1)]])),
        }
    }

    async fn cancel(&self, request_id: &str) -> bool {
        match self.active.take(request_id) {
            Some(_) => {
                self.cancelled.notify_one();
                true
            }
            None => false,
        }
    }

    fn active(&self) -> &ActiveQueries {
        &self.active
    }
}

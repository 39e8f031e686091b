use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::{CancellationSet, DEFAULT_FLAG_TTL};
use crate::execution::QueryExecutor;
use crate::history::SessionStore;
use crate::interpreter::Interpreter;
use crate::pipeline::Pipeline;

#[derive(Clone)]
pub(crate) struct AppState {
    sessions: Arc<SessionStore>,
    cancellations: Arc<CancellationSet>,
    executor: Arc<dyn QueryExecutor>,
    pipeline: Arc<Pipeline>,
}

impl AppState {
    pub(crate) fn builder(
        interpreter: Arc<dyn Interpreter>,
        executor: Arc<dyn QueryExecutor>,
    ) -> AppStateBuilder {
        AppStateBuilder {
            interpreter,
            executor,
            history_pairs: 20,
            cancel_flag_ttl: DEFAULT_FLAG_TTL,
        }
    }

    pub fn sessions(&self) -> Arc<SessionStore> {
        self.sessions.clone()
    }

    pub fn cancellations(&self) -> Arc<CancellationSet> {
        self.cancellations.clone()
    }

    pub fn executor(&self) -> Arc<dyn QueryExecutor> {
        self.executor.clone()
    }

    pub fn pipeline(&self) -> Arc<Pipeline> {
        self.pipeline.clone()
    }
}

pub(crate) struct AppStateBuilder {
    interpreter: Arc<dyn Interpreter>,
    executor: Arc<dyn QueryExecutor>,
    history_pairs: usize,
    cancel_flag_ttl: Duration,
}

impl AppStateBuilder {
    pub(crate) fn with_history_pairs(mut self, pairs: usize) -> Self {
        self.history_pairs = pairs;
        self
    }

    pub(crate) fn with_cancel_flag_ttl(mut self, ttl: Duration) -> Self {
        self.cancel_flag_ttl = ttl;
        self
    }

    pub(crate) fn build(self) -> AppState {
        let sessions = Arc::new(SessionStore::new(self.history_pairs));
        let cancellations = Arc::new(CancellationSet::with_ttl(self.cancel_flag_ttl));
        let pipeline = Arc::new(Pipeline::new(
            sessions.clone(),
            cancellations.clone(),
            self.interpreter,
            self.executor.clone(),
        ));
        AppState {
            sessions,
            cancellations,
            executor: self.executor,
            pipeline,
        }
    }
}

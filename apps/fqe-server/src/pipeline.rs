//! Per-request orchestration: interpret, execute (with one corrective retry),
//! synthesize.
//!
//! Cancellation is cooperative. The flag is polled at every transition and a
//! flag observed at any point wins over whatever else went wrong. Every run
//! ends with an assistant turn in history and a well-formed [`QueryResponse`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, info_span, warn, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::cancellation::CancellationSet;
use crate::execution::{QueryError, QueryExecutor, QueryResult, SqlParams};
use crate::history::{Session, SessionStore, Turn};
use crate::interpreter::{ChartSpec, InterpretError, Intent, Interpreter};

pub const CANCELLED_ANSWER: &str = "Request was cancelled.";
pub const NO_ANSWER: &str = "I'm not sure how to answer that.";
pub const NO_SQL_ANSWER: &str = "I couldn't generate a query for that question. Could you rephrase?";

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct QueryResponse {
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<QueryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub request_id: String,
}

impl QueryResponse {
    pub fn answer(answer: impl Into<String>, request_id: &str) -> Self {
        Self {
            answer: answer.into(),
            explanation: None,
            sql: None,
            sql_explanation: None,
            data: None,
            chart: None,
            error: None,
            request_id: request_id.to_string(),
        }
    }

    /// Generic apology carrying the error text for diagnostics.
    pub fn failure(detail: &str, request_id: &str) -> Self {
        Self {
            error: Some(detail.to_string()),
            ..Self::answer(
                format!("An error occurred processing your question: {detail}"),
                request_id,
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("Request cancelled by user")]
    Cancelled,
    #[error("{0}")]
    MalformedResponse(String),
    #[error("{0}")]
    Unclassified(String),
}

impl From<InterpretError> for PipelineError {
    fn from(err: InterpretError) -> Self {
        match err {
            InterpretError::MalformedResponse(_) => PipelineError::MalformedResponse(err.to_string()),
            other => PipelineError::Unclassified(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Answered,
    Conversational,
    NoSql,
    ExecutionFailed,
    Cancelled,
    Malformed,
    Unclassified,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Answered => "answered",
            Outcome::Conversational => "conversational",
            Outcome::NoSql => "no_sql",
            Outcome::ExecutionFailed => "execution_failed",
            Outcome::Cancelled => "cancelled",
            Outcome::Malformed => "malformed",
            Outcome::Unclassified => "error",
        }
    }
}

/// A statement the interpreter asked to run.
struct Planned {
    sql: String,
    params: SqlParams,
    explanation: Option<String>,
}

pub struct Pipeline {
    sessions: Arc<SessionStore>,
    cancellations: Arc<CancellationSet>,
    interpreter: Arc<dyn Interpreter>,
    executor: Arc<dyn QueryExecutor>,
}

impl Pipeline {
    pub fn new(
        sessions: Arc<SessionStore>,
        cancellations: Arc<CancellationSet>,
        interpreter: Arc<dyn Interpreter>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            sessions,
            cancellations,
            interpreter,
            executor,
        }
    }

    /// Answer one question in `session_id`. Never fails: every error becomes
    /// a response with `error` set.
    pub async fn run(
        &self,
        question: &str,
        session_id: &str,
        request_id: Option<&str>,
    ) -> QueryResponse {
        let request_id = match request_id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        let session = self.sessions.session(session_id);
        session.append(Turn::user(question));
        debug!(session_id, turns = session.len(), "question recorded");

        let span = info_span!("pipeline", request_id = %request_id, session_id = %session_id);
        let driven = AssertUnwindSafe(self.drive(&session, &request_id).instrument(span))
            .catch_unwind()
            .await;

        let (response, outcome) = match driven {
            Ok(Ok(done)) => done,
            Ok(Err(err)) => self.fail(err, &request_id),
            Err(panic) => self.fail(
                PipelineError::Unclassified(panic_message(panic.as_ref())),
                &request_id,
            ),
        };

        session.append(Turn::assistant(response.answer.clone()));
        self.cancellations.clear(&request_id);
        metrics::counter!("fqe_queries_total", "outcome" => outcome.as_str()).increment(1);
        response
    }

    fn fail(&self, err: PipelineError, request_id: &str) -> (QueryResponse, Outcome) {
        let err = if self.cancellations.is_cancelled(request_id) {
            PipelineError::Cancelled
        } else {
            err
        };
        match err {
            PipelineError::Cancelled => {
                info!(request_id, "request cancelled");
                (QueryResponse::answer(CANCELLED_ANSWER, request_id), Outcome::Cancelled)
            }
            PipelineError::MalformedResponse(detail) => {
                error!(request_id, error = %detail, "interpreter response unusable");
                (QueryResponse::failure(&detail, request_id), Outcome::Malformed)
            }
            PipelineError::Unclassified(detail) => {
                error!(request_id, error = %detail, "pipeline error");
                (QueryResponse::failure(&detail, request_id), Outcome::Unclassified)
            }
        }
    }

    fn checkpoint(&self, request_id: &str) -> Result<(), PipelineError> {
        if self.cancellations.is_cancelled(request_id) {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn drive(
        &self,
        session: &Session,
        request_id: &str,
    ) -> Result<(QueryResponse, Outcome), PipelineError> {
        self.checkpoint(request_id)?;
        let intent = self.interpreter.interpret(&session.snapshot()).await?;
        self.checkpoint(request_id)?;

        let first = match plan(intent) {
            Plan::Run(planned) => planned,
            Plan::Reply(answer, outcome) => {
                return Ok((QueryResponse::answer(answer, request_id), outcome))
            }
        };
        info!(sql = %first.sql, "generated SQL");
        self.checkpoint(request_id)?;

        let (sql, sql_explanation, result) = match self.attempt(&first, request_id).await {
            Ok(result) => (first.sql, first.explanation, result),
            Err(err) => {
                self.checkpoint(request_id)?;
                let first_error = err.to_string();
                warn!(kind = err.kind(), error = %first_error, "SQL execution error");

                session.append(Turn::assistant_structured(
                    json!({"sql": first.sql, "error": first_error}),
                ));
                session.append(Turn::user(format!(
                    "The SQL query failed with error: {first_error}\n\
                     Please fix the query and try again. Respond with the same JSON format."
                )));

                let retry = self.interpreter.interpret(&session.snapshot()).await?;
                self.checkpoint(request_id)?;
                let Plan::Run(second) = plan(retry) else {
                    let response = QueryResponse {
                        sql: Some(first.sql),
                        error: Some(first_error.clone()),
                        ..QueryResponse::answer(
                            format!(
                                "I tried to query the database but encountered an error: {first_error}"
                            ),
                            request_id,
                        )
                    };
                    return Ok((response, Outcome::ExecutionFailed));
                };
                info!(sql = %second.sql, "retry SQL");
                let sql_explanation = second.explanation.clone().or(first.explanation);

                match self.attempt(&second, request_id).await {
                    Ok(result) => (second.sql, sql_explanation, result),
                    Err(err) => {
                        self.checkpoint(request_id)?;
                        let last_error = err.to_string();
                        warn!(kind = err.kind(), error = %last_error, "SQL retry also failed");
                        let response = QueryResponse {
                            sql: Some(second.sql),
                            sql_explanation,
                            error: Some(last_error.clone()),
                            ..QueryResponse::answer(
                                format!("I tried two queries but both failed. Last error: {last_error}"),
                                request_id,
                            )
                        };
                        return Ok((response, Outcome::ExecutionFailed));
                    }
                }
            }
        };

        self.checkpoint(request_id)?;
        let synthesis = self
            .interpreter
            .synthesize(&session.snapshot(), &result, &sql)
            .await?;

        let response = QueryResponse {
            answer: synthesis.answer,
            explanation: synthesis.explanation,
            sql: Some(sql),
            sql_explanation,
            data: Some(result),
            chart: synthesis.chart,
            error: None,
            request_id: request_id.to_string(),
        };
        Ok((response, Outcome::Answered))
    }

    async fn attempt(&self, planned: &Planned, request_id: &str) -> Result<QueryResult, QueryError> {
        self.executor
            .execute(&planned.sql, &planned.params, Some(request_id))
            .await
    }
}

/// What the turn does next with an interpreted intent.
enum Plan {
    Run(Planned),
    Reply(String, Outcome),
}

fn plan(intent: Intent) -> Plan {
    match intent {
        Intent::Conversational { answer } => Plan::Reply(
            answer.unwrap_or_else(|| NO_ANSWER.to_string()),
            Outcome::Conversational,
        ),
        Intent::Query { sql: None, .. } => Plan::Reply(NO_SQL_ANSWER.to_string(), Outcome::NoSql),
        Intent::Query {
            sql: Some(sql),
            params,
            explanation,
        } => Plan::Run(Planned {
            sql,
            params,
            explanation,
        }),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "internal error".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{Role, TurnContent};
    use crate::test_support::{rows, ExecStep, ScriptedExecutor, ScriptedInterpreter};
    use serde_json::json;
    use std::time::Duration;

    const HOUSTON_SQL: &str = "SELECT valid_datetime, AVG(ensemble_value) AS avg_temp \
        FROM weather_forecast_ensemble \
        WHERE project_name = 'ercot_generic' AND location = 'houston' AND variable = 'temp_2m' \
        AND valid_datetime BETWEEN NOW() AND NOW() + INTERVAL '7 days' \
        GROUP BY valid_datetime ORDER BY valid_datetime LIMIT 168";

    struct Harness {
        pipeline: Arc<Pipeline>,
        interpreter: Arc<ScriptedInterpreter>,
        executor: Arc<ScriptedExecutor>,
        sessions: Arc<SessionStore>,
        cancellations: Arc<CancellationSet>,
    }

    fn harness_with(
        cancellations: Arc<CancellationSet>,
        interpreter: ScriptedInterpreter,
        executor: ScriptedExecutor,
        pairs: usize,
    ) -> Harness {
        let interpreter = Arc::new(interpreter);
        let executor = Arc::new(executor);
        let sessions = Arc::new(SessionStore::new(pairs));
        let pipeline = Arc::new(Pipeline::new(
            sessions.clone(),
            cancellations.clone(),
            interpreter.clone(),
            executor.clone(),
        ));
        Harness {
            pipeline,
            interpreter,
            executor,
            sessions,
            cancellations,
        }
    }

    fn harness(interpreter: ScriptedInterpreter, executor: ScriptedExecutor) -> Harness {
        harness_with(Arc::new(CancellationSet::new()), interpreter, executor, 20)
    }

    fn query(sql: &str, explanation: &str) -> Intent {
        Intent::Query {
            sql: Some(sql.to_string()),
            params: SqlParams::None,
            explanation: Some(explanation.to_string()),
        }
    }

    fn temps() -> QueryResult {
        rows(
            &["valid_datetime", "avg_temp"],
            vec![
                vec![json!("2026-07-01T00:00:00+00:00"), json!(31.5)],
                vec![json!("2026-07-01T01:00:00+00:00"), json!(30.9)],
            ],
        )
    }

    #[tokio::test]
    async fn answers_with_data_and_registers_while_running() {
        let h = harness(
            ScriptedInterpreter::new()
                .intent(query(HOUSTON_SQL, "hourly mean temperature"))
                .synthesis("Houston stays near 31°C."),
            ScriptedExecutor::new().step(ExecStep::Rows(temps())),
        );
        let response = h
            .pipeline
            .run("show me temperature for Houston next week", "s1", Some("r1"))
            .await;

        assert_eq!(response.answer, "Houston stays near 31°C.");
        assert_eq!(response.request_id, "r1");
        assert_eq!(response.sql.as_deref(), Some(HOUSTON_SQL));
        assert_eq!(response.sql_explanation.as_deref(), Some("hourly mean temperature"));
        assert_eq!(response.data.as_ref().map(|d| d.rows.len()), Some(2));
        assert!(response.error.is_none());

        let calls = h.executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].request_id.as_deref(), Some("r1"));
        assert!(calls[0].registered);
        assert!(h.executor.active().is_empty());

        let turns = h.sessions.snapshot("s1");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1], Turn::assistant("Houston stays near 31°C."));
        assert_eq!(h.interpreter.synthesize_calls()[0].1, HOUSTON_SQL);
    }

    #[tokio::test]
    async fn corrected_query_after_first_failure() {
        let broken = HOUSTON_SQL.replace("AVG(ensemble_value)", "AVG(ensemble_val)");
        let h = harness(
            ScriptedInterpreter::new()
                .intent(query(&broken, "first try"))
                .intent(query(HOUSTON_SQL, "fixed column name")),
            ScriptedExecutor::new()
                .step(ExecStep::Fail(QueryError::Database(
                    "column \"ensemble_val\" does not exist".into(),
                )))
                .step(ExecStep::Rows(temps())),
        );
        let response = h.pipeline.run("temps in Houston", "s1", Some("r2")).await;

        assert!(response.error.is_none());
        assert_eq!(response.sql.as_deref(), Some(HOUSTON_SQL));
        assert_eq!(response.sql_explanation.as_deref(), Some("fixed column name"));
        assert!(response.data.is_some());

        let retry_history = &h.interpreter.interpret_calls()[1];
        assert_eq!(retry_history.len(), 3);
        assert_eq!(
            retry_history[1].content,
            TurnContent::Structured(json!({
                "sql": broken,
                "error": "column \"ensemble_val\" does not exist",
            }))
        );
        assert_eq!(retry_history[2].role, Role::User);
        assert!(retry_history[2]
            .text()
            .starts_with("The SQL query failed with error: column \"ensemble_val\" does not exist\n"));
        assert_eq!(h.sessions.snapshot("s1").len(), 4);
        assert!(h.executor.active().is_empty());
    }

    #[tokio::test]
    async fn two_failures_end_the_turn_with_the_last_error() {
        let h = harness(
            ScriptedInterpreter::new()
                .intent(query("SELECT nope FROM missing_table", "a"))
                .intent(query("SELECT still_nope FROM missing_table", "b"))
                .intent(query("SELECT 1", "never asked")),
            ScriptedExecutor::new()
                .step(ExecStep::Fail(QueryError::Database("first".into())))
                .step(ExecStep::Fail(QueryError::Database("second".into()))),
        );
        let response = h.pipeline.run("q", "s1", Some("r3")).await;

        assert_eq!(
            response.answer,
            "I tried two queries but both failed. Last error: second"
        );
        assert_eq!(response.error.as_deref(), Some("second"));
        assert_eq!(response.sql.as_deref(), Some("SELECT still_nope FROM missing_table"));
        assert_eq!(response.sql_explanation.as_deref(), Some("b"));
        assert!(response.data.is_none());
        assert_eq!(h.interpreter.interpret_calls().len(), 2);
        assert_eq!(h.executor.calls().len(), 2);
        assert!(h.executor.active().is_empty());
    }

    #[tokio::test]
    async fn validator_rejection_takes_the_retry_path() {
        let h = harness(
            ScriptedInterpreter::new()
                .intent(query(
                    "SELECT location FROM energy_forecast_ensemble WHERE variable = 'load'",
                    "no limit",
                ))
                .intent(query(
                    "SELECT location FROM energy_forecast_ensemble WHERE variable = 'load' LIMIT 10",
                    "limited",
                )),
            ScriptedExecutor::new().step(ExecStep::Rows(rows(&["location"], vec![]))),
        );
        let response = h.pipeline.run("zones", "s1", Some("r4")).await;

        assert!(response.error.is_none(), "{response:?}");
        assert_eq!(response.sql_explanation.as_deref(), Some("limited"));
        let calls = h.executor.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].sql.ends_with("LIMIT 10"));
        let corrective = &h.interpreter.interpret_calls()[1][2];
        assert!(corrective.text().contains("BLOCKED:"), "{corrective:?}");
    }

    #[tokio::test]
    async fn retry_without_sql_reports_the_first_error() {
        let h = harness(
            ScriptedInterpreter::new()
                .intent(query("DELETE FROM weather_forecast_ensemble", "oops"))
                .intent(Intent::Conversational {
                    answer: Some("I can only read data.".into()),
                }),
            ScriptedExecutor::new(),
        );
        let response = h.pipeline.run("wipe it", "s1", Some("r5")).await;

        let first_error = response.error.clone().expect("error");
        assert!(first_error.starts_with("BLOCKED:"));
        assert_eq!(
            response.answer,
            format!("I tried to query the database but encountered an error: {first_error}")
        );
        assert_eq!(response.sql.as_deref(), Some("DELETE FROM weather_forecast_ensemble"));
        assert!(h.executor.calls().is_empty());
    }

    #[tokio::test]
    async fn conversational_and_missing_sql() {
        let h = harness(
            ScriptedInterpreter::new()
                .intent(Intent::Conversational {
                    answer: Some("Hi! Ask me about forecasts.".into()),
                })
                .intent(Intent::Conversational { answer: None })
                .intent(Intent::Query {
                    sql: None,
                    params: SqlParams::None,
                    explanation: None,
                }),
            ScriptedExecutor::new(),
        );
        let first = h.pipeline.run("hello", "s1", None).await;
        assert_eq!(first.answer, "Hi! Ask me about forecasts.");
        assert!(first.sql.is_none() && first.error.is_none());

        let second = h.pipeline.run("hmm", "s1", None).await;
        assert_eq!(second.answer, NO_ANSWER);

        let third = h.pipeline.run("???", "s1", None).await;
        assert_eq!(third.answer, NO_SQL_ANSWER);

        assert!(h.executor.calls().is_empty());
        assert_eq!(h.sessions.snapshot("s1").len(), 6);
    }

    #[tokio::test]
    async fn malformed_interpreter_output_is_not_retried() {
        let h = harness(
            ScriptedInterpreter::new().interpret_error(InterpretError::MalformedResponse(
                "no JSON object".into(),
            )),
            ScriptedExecutor::new(),
        );
        let response = h.pipeline.run("q", "s1", Some("r6")).await;

        let detail = response.error.clone().expect("error");
        assert!(detail.contains("could not parse JSON"), "{detail}");
        assert_eq!(
            response.answer,
            format!("An error occurred processing your question: {detail}")
        );
        assert_eq!(h.interpreter.interpret_calls().len(), 1);
        assert_eq!(h.sessions.snapshot("s1").len(), 2);
    }

    #[tokio::test]
    async fn panics_become_error_answers() {
        let h = harness(
            ScriptedInterpreter::new().interpret_panic("interpreter exploded"),
            ScriptedExecutor::new(),
        );
        let response = h.pipeline.run("q", "s1", Some("r7")).await;
        assert_eq!(response.error.as_deref(), Some("interpreter exploded"));
        assert_eq!(
            response.answer,
            "An error occurred processing your question: interpreter exploded"
        );
        assert_eq!(h.sessions.snapshot("s1").len(), 2);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let h = harness(
            ScriptedInterpreter::new().intent(query(HOUSTON_SQL, "x")),
            ScriptedExecutor::new(),
        );
        h.cancellations.mark("r8");
        let response = h.pipeline.run("q", "s1", Some("r8")).await;

        assert_eq!(response.answer, CANCELLED_ANSWER);
        assert!(response.error.is_none());
        assert!(h.interpreter.interpret_calls().is_empty());
        assert!(!h.cancellations.is_cancelled("r8"));
        assert_eq!(h.sessions.snapshot("s1")[1], Turn::assistant(CANCELLED_ANSWER));
    }

    #[tokio::test]
    async fn cancelled_during_interpretation() {
        let cancellations = Arc::new(CancellationSet::new());
        let flag = cancellations.clone();
        let h = harness_with(
            cancellations,
            ScriptedInterpreter::new()
                .intent(query(HOUSTON_SQL, "x"))
                .on_interpret(move |_| flag.mark("r9")),
            ScriptedExecutor::new(),
            20,
        );
        let response = h.pipeline.run("q", "s1", Some("r9")).await;

        assert_eq!(response.answer, CANCELLED_ANSWER);
        assert!(h.executor.calls().is_empty());
        assert!(h.cancellations.is_empty());
    }

    #[tokio::test]
    async fn cancellation_wins_over_interpreter_failure() {
        let cancellations = Arc::new(CancellationSet::new());
        let flag = cancellations.clone();
        let h = harness_with(
            cancellations,
            ScriptedInterpreter::new()
                .interpret_error(InterpretError::Transport("connection reset".into()))
                .on_interpret(move |_| flag.mark("r10")),
            ScriptedExecutor::new(),
            20,
        );
        let response = h.pipeline.run("q", "s1", Some("r10")).await;
        assert_eq!(response.answer, CANCELLED_ANSWER);
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn cancel_interrupts_running_query_without_retry() {
        let h = harness(
            ScriptedInterpreter::new()
                .intent(query(HOUSTON_SQL, "slow"))
                .intent(query(HOUSTON_SQL, "must not be used")),
            ScriptedExecutor::new().step(ExecStep::BlockUntilCancelled),
        );
        let pipeline = h.pipeline.clone();
        let task = tokio::spawn(async move { pipeline.run("q", "s1", Some("r11")).await });

        tokio::time::timeout(Duration::from_secs(5), async {
            while !h.executor.active().contains("r11") {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("query registered");

        h.cancellations.mark("r11");
        assert!(h.executor.cancel("r11").await);
        let response = task.await.expect("pipeline task");

        assert_eq!(response.answer, CANCELLED_ANSWER);
        assert_eq!(h.interpreter.interpret_calls().len(), 1);
        assert!(h.executor.active().is_empty());
        assert!(!h.executor.cancel("r11").await);
        assert!(h.cancellations.is_empty());
    }

    #[tokio::test]
    async fn blank_request_id_is_replaced() {
        let h = harness(
            ScriptedInterpreter::new().intent(Intent::Conversational {
                answer: Some("hi".into()),
            }),
            ScriptedExecutor::new(),
        );
        let response = h.pipeline.run("hello", "s1", Some("   ")).await;
        assert!(Uuid::parse_str(&response.request_id).is_ok());
    }

    #[tokio::test]
    async fn history_stays_bounded() {
        let mut script = ScriptedInterpreter::new();
        for i in 0..5 {
            script = script.intent(Intent::Conversational {
                answer: Some(format!("reply {i}")),
            });
        }
        let h = harness_with(Arc::new(CancellationSet::new()), script, ScriptedExecutor::new(), 2);
        for i in 0..5 {
            h.pipeline.run(&format!("question {i}"), "s1", None).await;
        }
        let turns = h.sessions.snapshot("s1");
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0], Turn::user("question 3"));
        assert_eq!(turns[3], Turn::assistant("reply 4"));
    }

    #[test]
    fn response_omits_absent_fields() {
        let value = serde_json::to_value(QueryResponse::answer("hi", "r")).expect("json");
        assert_eq!(value, json!({"answer": "hi", "request_id": "r"}));
    }
}

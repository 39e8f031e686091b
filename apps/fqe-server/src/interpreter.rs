//! Interpreter client: turns conversation state into structured intent and
//! query results into a narrated answer.
//!
//! The text-generation backend is untrusted. Its free-form reply is parsed by
//! trying, in order, a direct JSON parse, the first fenced code block, and the
//! first balanced `{…}` object that parses.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::execution::{QueryResult, SqlParams};
use crate::history::Turn;

/// Schema description, dimension vocabulary, SQL rules and response shapes.
pub const SYSTEM_PROMPT: &str = include_str!("../prompts/system.md");

pub const INTERPRET_TEMPERATURE: f32 = 0.1;
pub const SYNTHESIZE_TEMPERATURE: f32 = 0.2;

const SUMMARY_THRESHOLD: usize = 100;
const SUMMARY_HEAD: usize = 50;
const SUMMARY_TAIL: usize = 10;
const RAW_LOG_CHARS: usize = 500;

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)\n?```").expect("fence regex"));

#[derive(Debug, Clone, thiserror::Error)]
pub enum InterpretError {
    #[error("interpreter transport error: {0}")]
    Transport(String),
    #[error("interpreter returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("could not parse JSON from interpreter response: {0}")]
    MalformedResponse(String),
    #[error("interpreter credentials are not configured (set BEDROCK_API_KEY or AWS_BEARER_TOKEN_BEDROCK)")]
    NotConfigured,
}

/// What the interpreter wants to do with the latest question.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Conversational {
        answer: Option<String>,
    },
    Query {
        sql: Option<String>,
        params: SqlParams,
        explanation: Option<String>,
    },
}

#[cfg(test)]
impl Intent {
    pub fn query(sql: impl Into<String>) -> Self {
        Intent::Query {
            sql: Some(sql.into()),
            params: SqlParams::None,
            explanation: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Bar,
    Scatter,
    Area,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChartSpec {
    #[serde(rename = "type")]
    pub kind: ChartKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "xLabel")]
    pub x_label: Option<String>,
    #[serde(default, alias = "yLabel")]
    pub y_label: Option<String>,
    #[serde(alias = "xColumn")]
    pub x_column: String,
    #[serde(alias = "yColumns")]
    pub y_columns: Vec<String>,
    #[serde(default, alias = "yLabels")]
    pub y_labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub answer: String,
    pub explanation: Option<String>,
    pub chart: Option<ChartSpec>,
}

#[async_trait]
pub trait Interpreter: Send + Sync {
    async fn interpret(&self, history: &[Turn]) -> Result<Intent, InterpretError>;

    async fn synthesize(
        &self,
        history: &[Turn],
        result: &QueryResult,
        sql: &str,
    ) -> Result<Synthesis, InterpretError>;
}

/// Raw text completion over a system instruction plus conversation turns.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        turns: &[Turn],
        temperature: f32,
    ) -> Result<String, InterpretError>;
}

/// [`Interpreter`] over any completion backend.
pub struct LlmInterpreter<B> {
    backend: B,
    max_rows: usize,
}

impl<B: CompletionBackend> LlmInterpreter<B> {
    pub fn new(backend: B, max_rows: usize) -> Self {
        Self { backend, max_rows }
    }
}

#[async_trait]
impl<B: CompletionBackend> Interpreter for LlmInterpreter<B> {
    async fn interpret(&self, history: &[Turn]) -> Result<Intent, InterpretError> {
        let raw = self
            .backend
            .complete(SYSTEM_PROMPT, history, INTERPRET_TEMPERATURE)
            .await?;
        debug!(raw = %head(&raw), "interpreter raw output (interpret)");
        parse_intent(&raw)
    }

    async fn synthesize(
        &self,
        history: &[Turn],
        result: &QueryResult,
        sql: &str,
    ) -> Result<Synthesis, InterpretError> {
        let mut turns = history.to_vec();
        turns.push(Turn::user(results_message(result, sql, self.max_rows)));
        let raw = self
            .backend
            .complete(SYSTEM_PROMPT, &turns, SYNTHESIZE_TEMPERATURE)
            .await?;
        debug!(raw = %head(&raw), "interpreter raw output (synthesize)");
        parse_synthesis(&raw)
    }
}

fn head(raw: &str) -> String {
    raw.chars().take(RAW_LOG_CHARS).collect()
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct IntentDocument {
    #[serde(default = "default_true", alias = "needsData")]
    needs_data: bool,
    #[serde(default)]
    sql: Option<String>,
    #[serde(default, alias = "sqlParams")]
    sql_params: Option<Value>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    answer: Option<String>,
}

#[derive(Deserialize)]
struct SynthesisDocument {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    chart: Option<Value>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

pub fn parse_intent(raw: &str) -> Result<Intent, InterpretError> {
    let doc: IntentDocument = serde_json::from_value(parse_document(raw)?)
        .map_err(|err| InterpretError::MalformedResponse(err.to_string()))?;
    if !doc.needs_data {
        return Ok(Intent::Conversational {
            answer: non_blank(doc.answer),
        });
    }
    Ok(Intent::Query {
        sql: non_blank(doc.sql),
        params: SqlParams::from_document(doc.sql_params.as_ref()),
        explanation: non_blank(doc.explanation),
    })
}

pub fn parse_synthesis(raw: &str) -> Result<Synthesis, InterpretError> {
    let doc: SynthesisDocument = serde_json::from_value(parse_document(raw)?)
        .map_err(|err| InterpretError::MalformedResponse(err.to_string()))?;
    let chart = match doc.chart {
        None | Some(Value::Null) => None,
        Some(value) => match serde_json::from_value::<ChartSpec>(value) {
            Ok(chart) if !chart.y_columns.is_empty() => Some(chart),
            Ok(_) => {
                warn!("dropping chart without y_columns");
                None
            }
            Err(err) => {
                warn!(error = %err, "dropping ill-formed chart descriptor");
                None
            }
        },
    };
    Ok(Synthesis {
        answer: non_blank(doc.answer).unwrap_or_else(|| "Query executed successfully.".to_string()),
        explanation: non_blank(doc.explanation),
        chart,
    })
}

/// Extract the first JSON object from free-form model output.
pub fn parse_document(raw: &str) -> Result<Value, InterpretError> {
    let text = raw.trim();

    if let Some(value) = parse_object(text) {
        return Ok(value);
    }
    if let Some(caps) = RE_FENCE.captures(text) {
        if let Some(value) = caps.get(1).and_then(|m| parse_object(m.as_str().trim())) {
            return Ok(value);
        }
    }
    if let Some(value) = scan_balanced(text) {
        return Ok(value);
    }
    Err(InterpretError::MalformedResponse(head(text)))
}

fn parse_object(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Walk the text tracking brace depth (ignoring braces inside JSON strings)
/// and return the first balanced object that parses.
fn scan_balanced(text: &str) -> Option<Value> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(from) = start.take() {
                        if let Some(value) = parse_object(&text[from..=idx]) {
                            return Some(value);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// Render the rows handed to synthesis: everything up to 100 rows, otherwise
/// the first 50 and last 10.
pub fn results_summary(result: &QueryResult) -> String {
    let columns = serde_json::to_string(&result.columns).unwrap_or_default();
    let rows = &result.rows;
    if rows.len() > SUMMARY_THRESHOLD {
        let first = serde_json::to_string(&rows[..SUMMARY_HEAD]).unwrap_or_default();
        let last = serde_json::to_string(&rows[rows.len() - SUMMARY_TAIL..]).unwrap_or_default();
        format!(
            "Columns: {columns}\nFirst {SUMMARY_HEAD} rows:\n{first}\n... ({} total rows, showing first {SUMMARY_HEAD}) ...\nLast {SUMMARY_TAIL} rows:\n{last}",
            result.row_count
        )
    } else {
        let all = serde_json::to_string(rows).unwrap_or_default();
        format!("Columns: {columns}\nRows ({}):\n{all}", rows.len())
    }
}

/// The user turn appended (for this call only) when asking for synthesis.
pub fn results_message(result: &QueryResult, sql: &str, max_rows: usize) -> String {
    let notice = if result.truncated {
        format!("(Results were truncated to {max_rows} rows)")
    } else {
        String::new()
    };
    format!(
        "The SQL query ran successfully.\n\n\
         **SQL:** `{sql}`\n\n\
         **Results:**\n{summary}\n\n\
         {notice}\n\n\
         Now write a clear, insightful answer. Include:\n\
         1. A natural-language answer with the key numbers and insights\n\
         2. An explanation of what the data shows\n\
         3. A chart configuration if a visualization would help (or null if not)\n\n\
         Respond with JSON: {{\"answer\": \"...\", \"explanation\": \"...\", \"chart\": {{...}} or null}}",
        summary = results_summary(result),
    )
}

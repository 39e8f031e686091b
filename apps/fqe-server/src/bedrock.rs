//! Bedrock runtime transport for the interpreter.
//!
//! Bearer-token auth against `…/model/{id}/invoke`. Request and response
//! shapes depend on the model family, detected from the model id.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::history::{Role, Turn};
use crate::http_client;
use crate::interpreter::{CompletionBackend, InterpretError};

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
const ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct BedrockConfig {
    pub region: String,
    pub model_id: String,
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
    /// Replaces `https://bedrock-runtime.{region}.amazonaws.com`.
    pub endpoint: Option<String>,
    pub timeout: Duration,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Nova,
    Claude,
    Llama,
    Mistral,
}

impl ModelFamily {
    pub fn detect(model_id: &str) -> Self {
        let id = model_id.to_ascii_lowercase();
        if id.contains("nova") {
            ModelFamily::Nova
        } else if id.contains("claude") || id.contains("anthropic") {
            ModelFamily::Claude
        } else if id.contains("llama") || id.contains("meta") {
            ModelFamily::Llama
        } else if id.contains("mistral") {
            ModelFamily::Mistral
        } else {
            ModelFamily::Nova
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelFamily::Nova => "nova",
            ModelFamily::Claude => "claude",
            ModelFamily::Llama => "llama",
            ModelFamily::Mistral => "mistral",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    ApiKey,
    Bearer,
    None,
}

impl AuthMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMode::ApiKey => "api_key",
            AuthMode::Bearer => "bearer",
            AuthMode::None => "none",
        }
    }
}

pub struct BedrockBackend {
    client: reqwest::Client,
    url: String,
    credential: Option<String>,
    auth: AuthMode,
    family: ModelFamily,
    max_tokens: u32,
}

impl BedrockBackend {
    pub fn new(cfg: &BedrockConfig) -> Result<Self, InterpretError> {
        let client = http_client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|err| InterpretError::Transport(err.to_string()))?;
        let (auth, credential) = match (&cfg.api_key, &cfg.bearer_token) {
            (Some(key), _) => (AuthMode::ApiKey, Some(key.clone())),
            (None, Some(token)) => (AuthMode::Bearer, Some(token.clone())),
            (None, None) => (AuthMode::None, None),
        };
        let family = ModelFamily::detect(&cfg.model_id);
        info!(
            auth = auth.as_str(),
            region = %cfg.region,
            model = %cfg.model_id,
            family = family.as_str(),
            "bedrock interpreter configured"
        );
        Ok(Self {
            client,
            url: invoke_url(cfg),
            credential,
            auth,
            family,
            max_tokens: cfg.max_tokens,
        })
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth
    }
}

pub fn invoke_url(cfg: &BedrockConfig) -> String {
    let base = match cfg.endpoint.as_deref() {
        Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
        None => format!("https://bedrock-runtime.{}.amazonaws.com", cfg.region),
    };
    let model: String = url::form_urlencoded::byte_serialize(cfg.model_id.as_bytes()).collect();
    format!("{base}/model/{model}/invoke")
}

/// Leading assistant turns are dropped and consecutive turns from the same
/// role are merged, so the sequence starts with the user and alternates.
fn alternating(turns: &[Turn]) -> Vec<(Role, String)> {
    let mut out: Vec<(Role, String)> = Vec::with_capacity(turns.len());
    for turn in turns
        .iter()
        .skip_while(|turn| turn.role == Role::Assistant)
    {
        let text = turn.text();
        match out.last_mut() {
            Some((role, merged)) if *role == turn.role => {
                merged.push_str("\n\n");
                merged.push_str(&text);
            }
            _ => out.push((turn.role, text)),
        }
    }
    out
}

pub fn request_body(
    family: ModelFamily,
    system: &str,
    turns: &[Turn],
    temperature: f32,
    max_tokens: u32,
) -> Value {
    let messages = alternating(turns);
    match family {
        ModelFamily::Claude => json!({
            "anthropic_version": ANTHROPIC_VERSION,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "system": system,
            "messages": messages
                .iter()
                .map(|(role, text)| json!({"role": role.as_str(), "content": text}))
                .collect::<Vec<_>>(),
        }),
        _ => json!({
            "system": [{"text": system}],
            "messages": messages
                .iter()
                .map(|(role, text)| json!({"role": role.as_str(), "content": [{"text": text}]}))
                .collect::<Vec<_>>(),
            "inferenceConfig": {
                "maxTokens": max_tokens,
                "temperature": temperature,
            },
        }),
    }
}

fn nova_text(body: &Value) -> Option<&str> {
    body.pointer("/output/message/content/0/text")?.as_str()
}

fn claude_text(body: &Value) -> Option<&str> {
    body.pointer("/content/0/text")?.as_str()
}

pub fn extract_text(family: ModelFamily, body: &Value) -> Result<String, InterpretError> {
    let text = match family {
        ModelFamily::Nova => nova_text(body),
        ModelFamily::Claude => claude_text(body),
        ModelFamily::Llama => Some(body.get("generation").and_then(Value::as_str).unwrap_or("")),
        ModelFamily::Mistral => {
            return Ok(nova_text(body)
                .or_else(|| claude_text(body))
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string()))
        }
    };
    text.map(str::to_string).ok_or_else(|| {
        InterpretError::MalformedResponse(format!(
            "unexpected {} response shape",
            family.as_str()
        ))
    })
}

#[async_trait]
impl CompletionBackend for BedrockBackend {
    async fn complete(
        &self,
        system: &str,
        turns: &[Turn],
        temperature: f32,
    ) -> Result<String, InterpretError> {
        let credential = self
            .credential
            .as_deref()
            .ok_or(InterpretError::NotConfigured)?;
        let body = request_body(self.family, system, turns, temperature, self.max_tokens);
        tracing::debug!(url = %self.url, turns = turns.len(), "bedrock invoke");

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(credential)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|err| InterpretError::Transport(err.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(InterpretError::Upstream {
                status: status.as_u16(),
                body: text.chars().take(ERROR_BODY_CHARS).collect(),
            });
        }
        let payload: Value = resp
            .json()
            .await
            .map_err(|err| InterpretError::MalformedResponse(err.to_string()))?;
        extract_text(self.family, &payload)
    }
}

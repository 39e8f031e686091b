//! Per-session conversation log.
//!
//! Sessions are created lazily, live for the lifetime of the process and are
//! bounded to `max_pairs * 2` turns; the oldest turns are evicted first.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Turn payload: plain text, or a structured document (a failed attempt is
/// recorded as `{"sql": …, "error": …}`).
#[derive(Debug, Clone, PartialEq)]
pub enum TurnContent {
    Text(String),
    Structured(Value),
}

impl TurnContent {
    /// Text as sent to the interpreter; structured payloads render as compact JSON.
    pub fn as_text(&self) -> String {
        match self {
            TurnContent::Text(text) => text.clone(),
            TurnContent::Structured(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: TurnContent::Text(text.into()),
        }
    }

    pub fn assistant_structured(value: Value) -> Self {
        Self {
            role: Role::Assistant,
            content: TurnContent::Structured(value),
        }
    }

    pub fn text(&self) -> String {
        self.content.as_text()
    }
}

/// One session's bounded turn log.
pub struct Session {
    turns: Mutex<Vec<Turn>>,
    max_turns: usize,
}

impl Session {
    fn new(max_turns: usize) -> Self {
        Self {
            turns: Mutex::new(Vec::new()),
            max_turns,
        }
    }

    /// Append and evict in one critical section.
    pub fn append(&self, turn: Turn) {
        let mut turns = self.turns.lock();
        turns.push(turn);
        prune_history(&mut turns, self.max_turns);
    }

    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.lock().clone()
    }

    pub fn clear(&self) {
        self.turns.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.turns.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.turns.lock().is_empty()
    }
}

fn prune_history(turns: &mut Vec<Turn>, max_turns: usize) {
    if turns.len() > max_turns {
        let drop_count = turns.len() - max_turns;
        turns.drain(0..drop_count);
    }
}

/// Session table keyed by opaque session id.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    max_turns: usize,
}

impl SessionStore {
    /// `max_pairs` user/assistant pairs are kept per session (at least one).
    pub fn new(max_pairs: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_turns: max_pairs.max(1) * 2,
        }
    }

    #[cfg(test)]
    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Fetch the session, creating an empty one on first use.
    pub fn session(&self, session_id: &str) -> Arc<Session> {
        let mut sessions = self.sessions.lock();
        Arc::clone(
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Session::new(self.max_turns))),
        )
    }

    /// Empty an existing session. Unknown ids are ignored.
    pub fn clear(&self, session_id: &str) {
        let session = self.sessions.lock().get(session_id).cloned();
        if let Some(session) = session {
            session.clear();
        }
    }

    #[cfg(test)]
    pub fn snapshot(&self, session_id: &str) -> Vec<Turn> {
        let session = self.sessions.lock().get(session_id).cloned();
        session.map(|s| s.snapshot()).unwrap_or_default()
    }
}

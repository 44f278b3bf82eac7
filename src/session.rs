//! Per-session conversation state.
//!
//! A [`Session`] owns the ordered turn history and the selected model for one
//! user session. It is created by the caller (the CLI loop here) and passed
//! explicitly to every orchestrator call; nothing about it is global.
//! The history is append-only.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

use crate::models::{Role, Turn};

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    id: Uuid,
    model: String,
    started_at: DateTime<Utc>,
    turns: Vec<Turn>,
}

impl Session {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            model: model.into(),
            started_at: Utc::now(),
            turns: Vec::new(),
        }
    }

    /// Start a session whose history opens with an assistant greeting.
    pub fn with_greeting(model: impl Into<String>, greeting: impl Into<String>) -> Self {
        let mut session = Self::new(model);
        session.push(Turn::assistant(greeting));
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Turn::user(content));
    }

    /// Record a completed answer that took `duration` seconds.
    pub fn push_assistant(&mut self, content: impl Into<String>, duration: f64) {
        let mut turn = Turn::assistant(content);
        turn.duration = Some(duration);
        self.push(turn);
    }

    /// Record the error message of a failed answer in place of a reply.
    pub fn push_failure(&mut self, message: impl Into<String>) {
        let mut turn = Turn::assistant(message);
        turn.failed = true;
        self.push(turn);
    }

    /// Flatten the history into `"User: …\nAssistant: …"` lines.
    pub fn history_text(&self) -> String {
        self.turns
            .iter()
            .filter(|t| t.role != Role::System)
            .map(|t| format!("{}: {}", t.role.label(), t.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the transcript as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write transcript: {}", path.display()))
    }
}

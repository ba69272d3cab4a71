use crate::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Working context handed to the execution collaborator for one attempt.
///
/// The `history` field is the agent's conversational memory for the task.
/// Fault injection may hand the executor a copy with the history wiped, so
/// callers compare the context they built against the one that was dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Task the context was built for.
    pub task_id: Uuid,
    /// Conversational history accumulated for the task.
    pub history: Vec<Message>,
    /// Free-form variables shared between the orchestrator and the executor.
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    /// When the context was assembled.
    pub created_at: DateTime<Utc>,
}

impl ExecutionContext {
    /// Creates an empty context for the given task.
    pub fn new(task_id: Uuid) -> Self {
        Self {
            task_id,
            history: Vec::new(),
            variables: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Appends a message to the history.
    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    /// Builder-style variable setter.
    pub fn with_variable(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    /// Returns a copy of this context with the history cleared.
    ///
    /// Variables and identity are preserved; only working memory is lost.
    pub fn without_history(&self) -> Self {
        Self {
            history: Vec::new(),
            ..self.clone()
        }
    }

    /// Whether the context carries no conversational history.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a history entry tells the executing agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Standing instructions for the agent.
    System,
    /// The work item itself: title and description.
    Task,
    /// Notes carried over from earlier failed attempts.
    Feedback,
}

/// One entry in an [`ExecutionContext`](crate::ExecutionContext) history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// UTC time the entry was written.
    pub at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn task(content: impl Into<String>) -> Self {
        Self::new(Role::Task, content)
    }

    pub fn feedback(content: impl Into<String>) -> Self {
        Self::new(Role::Feedback, content)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_role() {
        assert_eq!(Message::system("brief").role, Role::System);
        assert_eq!(Message::task("Deploy v2").role, Role::Task);
        let note = Message::feedback("tool 'shell' failed");
        assert_eq!(note.role, Role::Feedback);
        assert_eq!(note.content, "tool 'shell' failed");
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::Feedback).unwrap(), "\"feedback\"");
        let role: Role = serde_json::from_str("\"task\"").unwrap();
        assert_eq!(role, Role::Task);
    }
}

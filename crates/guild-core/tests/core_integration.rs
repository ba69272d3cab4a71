#![allow(clippy::unwrap_used, clippy::expect_used)]

use guild_core::*;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// 1. Message serialization roundtrip
// ---------------------------------------------------------------------------

#[test]
fn message_serialization_roundtrip() {
    let msg = Message::task("Draft the release notes");

    let json = serde_json::to_string(&msg).unwrap();
    assert!(json.contains("\"role\":\"task\""));
    let deserialized: Message = serde_json::from_str(&json).unwrap();

    assert_eq!(deserialized, msg);
    assert_eq!(deserialized.content, "Draft the release notes");
    assert_eq!(deserialized.at, msg.at);
}

// ---------------------------------------------------------------------------
// 2. Error Display and From impls
// ---------------------------------------------------------------------------

#[test]
fn error_display_and_from_impls() {
    let dep_err = GuildError::InvalidDependency("cycle through 3 tasks".to_string());
    assert_eq!(dep_err.to_string(), "Invalid dependency: cycle through 3 tasks");

    let chaos_err = GuildError::ChaosFault {
        tool: "web_search".to_string(),
    };
    assert_eq!(
        chaos_err.to_string(),
        "Chaos fault injected into tool 'web_search'"
    );

    let exec_err = GuildError::ExecutionFailure("provider returned 503".to_string());
    assert_eq!(exec_err.to_string(), "Execution failure: provider returned 503");

    let id = Uuid::new_v4();
    let missing = GuildError::TaskNotFound(id);
    assert_eq!(missing.to_string(), format!("Task not found: {id}"));

    let roster_err = GuildError::Roster("directory offline".to_string());
    assert_eq!(roster_err.to_string(), "Roster error: directory offline");

    // From<serde_json::Error> conversion
    let bad_json = serde_json::from_str::<serde_json::Value>("not json");
    let guild_err: GuildError = bad_json.unwrap_err().into();
    assert!(guild_err.to_string().starts_with("JSON error:"));

    // From<std::io::Error> conversion
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "plan missing");
    let guild_err: GuildError = io_err.into();
    assert!(guild_err.to_string().starts_with("IO error:"));
}

// ---------------------------------------------------------------------------
// 3. Only injected and collaborator failures are retryable
// ---------------------------------------------------------------------------

#[test]
fn retryable_errors() {
    assert!(GuildError::ChaosFault { tool: "shell".into() }.is_retryable());
    assert!(GuildError::ExecutionFailure("timeout".into()).is_retryable());
    assert!(!GuildError::AllocationExhausted(Uuid::new_v4()).is_retryable());
    assert!(!GuildError::InvalidTransition {
        task: Uuid::new_v4(),
        from: "failed".into(),
        to: "completed".into(),
    }
    .is_retryable());
}

// ---------------------------------------------------------------------------
// 4. Context history wipe produces an independent copy
// ---------------------------------------------------------------------------

#[test]
fn context_without_history_is_a_copy() {
    let task_id = Uuid::new_v4();
    let mut ctx = ExecutionContext::new(task_id);
    ctx.push(Message::system("You are a research agent"));
    ctx.push(Message::feedback("previous attempt timed out"));

    let before = ctx.clone();
    let wiped = ctx.without_history();

    assert_eq!(ctx, before);
    assert!(wiped.history.is_empty());
    assert_eq!(wiped.created_at, ctx.created_at);
}

// ---------------------------------------------------------------------------
// 5. Role serialization/deserialization to/from strings
// ---------------------------------------------------------------------------

#[test]
fn role_serialization() {
    assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
    assert_eq!(serde_json::to_string(&Role::Task).unwrap(), "\"task\"");

    let feedback: Role = serde_json::from_str("\"feedback\"").unwrap();
    assert_eq!(feedback, Role::Feedback);

    let bad: Result<Role, _> = serde_json::from_str("\"assistant\"");
    assert!(bad.is_err());
}

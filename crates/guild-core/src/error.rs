use thiserror::Error;
use uuid::Uuid;

/// A convenience `Result` alias using [`GuildError`].
pub type GuildResult<T> = Result<T, GuildError>;

/// Top-level error type for the Guild orchestrator.
///
/// Variants mirror the failure taxonomy of the orchestration core: dependency
/// validation, state machine violations, injected chaos, real execution
/// failures and the collaborator/configuration plumbing around them.
#[derive(Error, Debug)]
pub enum GuildError {
    /// A dependency reference is unknown or would close a cycle.
    #[error("Invalid dependency: {0}")]
    InvalidDependency(String),

    /// A status change that the task state machine does not allow.
    #[error("Invalid transition for task {task}: {from} -> {to}")]
    InvalidTransition {
        /// The task whose transition was rejected.
        task: Uuid,
        /// Status observed before the attempted transition.
        from: String,
        /// Requested status.
        to: String,
    },

    /// No task with this id exists in the registry.
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// A deliberately injected tool failure.
    #[error("Chaos fault injected into tool '{tool}'")]
    ChaosFault {
        /// Name of the tool whose invocation was failed.
        tool: String,
    },

    /// A real failure reported by the execution collaborator.
    #[error("Execution failure: {0}")]
    ExecutionFailure(String),

    /// No agent bid for the task during a retry round.
    #[error("Allocation exhausted: no eligible agent for task {0}")]
    AllocationExhausted(Uuid),

    /// The agent roster collaborator could not be queried.
    #[error("Roster error: {0}")]
    Roster(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GuildError {
    /// Whether a task attempt that failed with this error may be retried.
    ///
    /// Injected chaos and collaborator failures are transient by definition;
    /// everything else points at a logic or configuration problem.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GuildError::ChaosFault { .. } | GuildError::ExecutionFailure(_)
        )
    }
}

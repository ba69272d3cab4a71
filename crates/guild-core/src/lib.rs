//! Core types and error definitions for the Guild orchestrator.
//!
//! This crate provides the foundational types shared across all Guild crates:
//! the error taxonomy of the orchestration core and the working context that
//! is handed to task executors.
//!
//! # Main types
//!
//! - [`GuildError`]: Unified error enum for registry, allocation, chaos and execution failures.
//! - [`GuildResult`]: Convenience alias for `Result<T, GuildError>`.
//! - [`Role`]: What a history entry conveys (system instructions, the task, feedback).
//! - [`Message`]: A single entry in a task's working history.
//! - [`ExecutionContext`]: The per-attempt context passed to an executor.

/// Execution context handed to task executors.
pub mod context;
/// Error taxonomy.
pub mod error;
/// Conversational history entries.
pub mod message;

pub use context::ExecutionContext;
pub use error::{GuildError, GuildResult};
pub use message::{Message, Role};

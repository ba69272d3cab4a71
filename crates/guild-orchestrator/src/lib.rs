//! Task orchestration core for an organization of autonomous agents.
//!
//! Tasks live in a dependency-aware registry. Each eligible task is offered to
//! qualified agents in a sealed-bid round, the best return-on-investment bid
//! wins, and the task is executed under a bounded retry policy. A fault
//! injector can add latency, fail tool calls and drop conversation history to
//! exercise the resilience of that pipeline.
//!
//! # Main types
//!
//! - [`Orchestrator`]: The poll/allocate/execute/record loop.
//! - [`TaskRegistry`]: Task store enforcing status transitions and dependencies.
//! - [`BiddingAllocator`]: Builds bids and picks the winner of an allocation round.
//! - [`FaultInjector`]: Probabilistic latency, tool faults and context scrambling.
//! - [`AgentMonitor`]: Per-agent activity and metrics.

/// Bid construction, winner selection and provider negotiation.
pub mod bidding;
/// Fault injection and its random sources.
pub mod chaos;
/// Orchestrator configuration and retry policy.
pub mod config;
/// Orchestration loop.
pub mod engine;
/// Executor and roster seams, plus the tool gate.
pub mod execution;
/// Agent activity and metrics monitoring.
pub mod monitor;
/// Dependency-aware task registry.
pub mod registry;
/// Shared orchestration types (Task, OrgAgent, Bid, etc.).
pub mod types;

pub use bidding::{determine_winner, negotiate_provider, BiddingAllocator, CostTable};
pub use chaos::{
    ChaosConfig, ChaosStats, FaultInjector, RandomSource, ScriptedRandom, SeededRandom,
};
pub use config::{OrchestratorConfig, RetryPolicy};
pub use engine::{CycleReport, Orchestrator, RunSummary, TaskOutcome};
pub use execution::{
    AgentRoster, ExecutionOutput, ExecutionRequest, StaticRoster, TaskExecutor, ToolGate,
};
pub use monitor::AgentMonitor;
pub use registry::{StatusCounts, TaskRegistry};
pub use types::{
    AgentMetrics, AgentState, Bid, FailureRecord, OrgAgent, Priority, ProviderTier, Task,
    TaskSpec, TaskStatus, WorkerStatus,
};

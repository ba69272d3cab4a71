use crate::chaos::FaultInjector;
use crate::types::{OrgAgent, ProviderTier, Task};
use async_trait::async_trait;
use guild_core::{ExecutionContext, GuildResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Everything the executor needs for one attempt.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Snapshot of the task at dispatch time.
    pub task: Task,
    /// Agent that won the allocation round.
    pub agent_id: String,
    /// Backend negotiated for this task.
    pub provider: ProviderTier,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Working context, possibly scrambled by fault injection.
    pub context: ExecutionContext,
}

/// Success payload returned by an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub summary: String,
    #[serde(default)]
    pub tool_calls: u32,
}

impl ExecutionOutput {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            tool_calls: 0,
        }
    }
}

/// The external tool/LLM engine that performs a task's side effects.
///
/// Implementations must route every tool invocation through the supplied
/// [`ToolGate`] so fault injection sees it.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest, tools: &ToolGate)
        -> GuildResult<ExecutionOutput>;
}

/// Read-only view of the organization's agents.
#[async_trait]
pub trait AgentRoster: Send + Sync {
    /// Agents sharing at least one skill with `skills` (all agents when empty).
    async fn agents_with_skills(&self, skills: &BTreeSet<String>) -> GuildResult<Vec<OrgAgent>>;
}

/// In-memory roster, used by the CLI and tests.
#[derive(Default)]
pub struct StaticRoster {
    agents: RwLock<Vec<OrgAgent>>,
}

impl StaticRoster {
    pub fn new(agents: Vec<OrgAgent>) -> Self {
        Self {
            agents: RwLock::new(agents),
        }
    }

    /// Insert or replace an agent by id.
    pub fn upsert(&self, agent: OrgAgent) {
        let mut agents = self.agents.write();
        match agents.iter_mut().find(|a| a.id == agent.id) {
            Some(existing) => *existing = agent,
            None => agents.push(agent),
        }
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AgentRoster for StaticRoster {
    async fn agents_with_skills(&self, skills: &BTreeSet<String>) -> GuildResult<Vec<OrgAgent>> {
        Ok(self
            .agents
            .read()
            .iter()
            .filter(|a| a.qualifies_for(skills))
            .cloned()
            .collect())
    }
}

/// Wraps an attempt's tool invocations with the tool fault gate.
pub struct ToolGate {
    chaos: Arc<FaultInjector>,
    task_id: Uuid,
    calls: AtomicU32,
}

impl ToolGate {
    pub fn new(chaos: Arc<FaultInjector>, task_id: Uuid) -> Self {
        Self {
            chaos,
            task_id,
            calls: AtomicU32::new(0),
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Consult fault injection before invoking `tool`.
    ///
    /// An `Err` must be treated exactly like a failure of the real tool.
    pub fn check(&self, tool: &str) -> GuildResult<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.chaos.intercept_tool(tool)
    }

    /// Run `invocation` as a call of `tool`, unless fault injection fails it first.
    pub async fn call<T, F>(&self, tool: &str, invocation: F) -> GuildResult<T>
    where
        F: Future<Output = GuildResult<T>>,
    {
        self.check(tool)?;
        invocation.await
    }

    /// Tool calls attempted through this gate, including failed ones.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Scenario fault membership, for executors that interpret fault ids.
    pub fn is_fault_enabled(&self, id: &str) -> bool {
        self.chaos.is_fault_enabled(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::{ChaosConfig, ScriptedRandom};
    use guild_core::GuildError;

    #[tokio::test]
    async fn test_static_roster_filters_by_skill() {
        let roster = StaticRoster::new(vec![
            OrgAgent::new("a", "engineer", ["coding"], 80.0),
            OrgAgent::new("b", "analyst", ["research"], 70.0),
        ]);
        let coding: BTreeSet<String> = ["coding".to_string()].into();
        let found = roster.agents_with_skills(&coding).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");

        let all = roster.agents_with_skills(&BTreeSet::new()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let roster = StaticRoster::default();
        roster.upsert(OrgAgent::new("a", "engineer", ["coding"], 50.0));
        roster.upsert(OrgAgent::new("a", "engineer", ["coding"], 90.0));
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.agents.read()[0].success_rate, 90.0);
    }

    #[tokio::test]
    async fn test_tool_gate_short_circuits_on_fault() {
        let config = ChaosConfig {
            tool_fault_probability: 1.0,
            ..ChaosConfig::default()
        };
        let chaos =
            Arc::new(FaultInjector::with_random(config, Arc::new(ScriptedRandom::constant(0.0))).unwrap());
        let gate = ToolGate::new(chaos, Uuid::new_v4());

        let ran = AtomicU32::new(0);
        let result = gate
            .call("shell", async {
                ran.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(GuildError::ChaosFault { .. })));
        assert_eq!(ran.load(Ordering::Relaxed), 0);
        assert_eq!(gate.calls(), 1);
    }

    #[tokio::test]
    async fn test_tool_gate_passes_through() {
        let gate = ToolGate::new(Arc::new(FaultInjector::disabled()), Uuid::new_v4());
        let value = gate.call("calc", async { Ok(41 + 1) }).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(gate.calls(), 1);
    }
}

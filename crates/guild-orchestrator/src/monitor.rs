use crate::types::{AgentMetrics, AgentState, WorkerStatus};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Tracks activity and metrics for every agent that has won a bid.
pub struct AgentMonitor {
    states: Arc<RwLock<HashMap<String, AgentState>>>,
}

impl AgentMonitor {
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Mark an agent as working on a task it just won.
    pub async fn start_task(&self, agent_id: &str, task_id: Uuid) {
        let mut states = self.states.write().await;
        let state = states
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentState {
                agent_id: agent_id.to_string(),
                active_tasks: BTreeSet::new(),
                status: WorkerStatus::Idle,
                metrics: AgentMetrics::default(),
            });
        state.active_tasks.insert(task_id);
        state.status = WorkerStatus::Working;
        state.metrics.bids_won += 1;
    }

    /// Mark one attempt as finished and fold its outcome into the metrics.
    ///
    /// The agent stays `Working` while any other task it won is still running.
    pub async fn finish_task(
        &self,
        agent_id: &str,
        task_id: Uuid,
        succeeded: bool,
        duration_ms: u64,
    ) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(agent_id) {
            state.active_tasks.remove(&task_id);
            state.metrics.duration_ms += duration_ms;
            if succeeded {
                state.metrics.completed += 1;
            } else {
                state.metrics.failed_attempts += 1;
            }
            state.status = if !state.active_tasks.is_empty() {
                WorkerStatus::Working
            } else if succeeded {
                WorkerStatus::Idle
            } else {
                WorkerStatus::Error
            };
        }
    }

    /// Snapshot of all agent states, sorted by agent id.
    pub async fn snapshot(&self) -> Vec<AgentState> {
        let states = self.states.read().await;
        let mut all: Vec<AgentState> = states.values().cloned().collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }

    pub async fn get_state(&self, agent_id: &str) -> Option<AgentState> {
        let states = self.states.read().await;
        states.get(agent_id).cloned()
    }

    /// Aggregate metrics across all agents.
    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read().await;
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.bids_won += state.metrics.bids_won;
            total.completed += state.metrics.completed;
            total.failed_attempts += state.metrics.failed_attempts;
            total.duration_ms += state.metrics.duration_ms;
        }
        total
    }

    /// Serialize the current state as JSON (for run reports).
    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "agents": states,
            "aggregate": aggregate,
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}

use crate::types::{FailureRecord, Task, TaskSpec, TaskStatus};
use chrono::Utc;
use guild_core::{GuildError, GuildResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.failed
    }
}

#[derive(Default)]
struct RegistryState {
    tasks: HashMap<Uuid, Task>,
    /// Insertion order; eligibility scans follow it.
    order: Vec<Uuid>,
}

impl RegistryState {
    fn status_of(&self, id: &Uuid) -> Option<TaskStatus> {
        self.tasks.get(id).map(|t| t.status)
    }

    fn is_completed(&self, id: &Uuid) -> bool {
        self.status_of(id) == Some(TaskStatus::Completed)
    }

    /// Whether `target` is reachable from `from` by following dependency edges.
    fn reaches(&self, from: Uuid, target: Uuid) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(task) = self.tasks.get(&id) {
                stack.extend(task.dependencies.iter().copied());
            }
        }
        false
    }

    fn dfs_cycle(&self, id: Uuid, visited: &mut HashMap<Uuid, u8>) -> bool {
        match visited.get(&id) {
            Some(1) => return true,  // back edge
            Some(2) => return false, // already processed
            _ => {}
        }
        visited.insert(id, 1);
        if let Some(task) = self.tasks.get(&id) {
            for dep in &task.dependencies {
                if self.dfs_cycle(*dep, visited) {
                    return true;
                }
            }
        }
        visited.insert(id, 2);
        false
    }

    /// Failed, or pending behind a failed task somewhere down the chain.
    fn is_blocked(&self, id: Uuid, memo: &mut HashMap<Uuid, bool>) -> bool {
        if let Some(&known) = memo.get(&id) {
            return known;
        }
        // Provisional answer guards against revisiting on diamond-shaped graphs.
        memo.insert(id, false);
        let blocked = match self.tasks.get(&id) {
            Some(task) => match task.status {
                TaskStatus::Failed => true,
                TaskStatus::Pending => task
                    .dependencies
                    .iter()
                    .any(|dep| self.is_blocked(*dep, memo)),
                _ => false,
            },
            None => false,
        };
        memo.insert(id, blocked);
        blocked
    }

    fn task_mut(&mut self, id: Uuid) -> GuildResult<&mut Task> {
        self.tasks.get_mut(&id).ok_or(GuildError::TaskNotFound(id))
    }
}

fn require_in_progress(task: &Task, action: &str) -> GuildResult<()> {
    if task.status == TaskStatus::InProgress {
        Ok(())
    } else {
        Err(GuildError::InvalidTransition {
            task: task.id,
            from: task.status.to_string(),
            to: action.to_string(),
        })
    }
}

/// Single source of truth for tasks, their dependency graph and status.
///
/// Every mutation validates and writes inside one write-lock critical section,
/// so concurrent creations cannot jointly introduce a cycle and concurrent
/// transitions on one task observe a single prior state. The lock is never held
/// across an `.await`.
pub struct TaskRegistry {
    state: RwLock<RegistryState>,
    notify: Arc<Notify>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Validate and insert a new task. It is pending and visible to the next
    /// eligibility scan.
    pub fn create_task(&self, spec: TaskSpec) -> GuildResult<Task> {
        let task = Task::from_spec(spec);
        {
            let mut state = self.state.write();
            if let Some(unknown) = task
                .dependencies
                .iter()
                .find(|dep| !state.tasks.contains_key(*dep))
            {
                return Err(GuildError::InvalidDependency(format!(
                    "task '{}' references unknown dependency {unknown}",
                    task.title
                )));
            }
            // A fresh id is unreachable from existing tasks, so known
            // dependencies cannot close a cycle through it.
            state.order.push(task.id);
            state.tasks.insert(task.id, task.clone());
        }

        info!(task_id = %task.id, title = %task.title, deps = task.dependencies.len(), "Task created");
        self.notify.notify_one();
        Ok(task)
    }

    /// Make a pending task depend on another task.
    ///
    /// Rejected without touching state if either id is unknown, the task has
    /// already left `pending`, or the edge would close a cycle.
    pub fn add_dependency(&self, task_id: Uuid, dependency_id: Uuid) -> GuildResult<()> {
        let mut state = self.state.write();
        if !state.tasks.contains_key(&dependency_id) {
            return Err(GuildError::InvalidDependency(format!(
                "unknown dependency {dependency_id}"
            )));
        }
        let status = state
            .status_of(&task_id)
            .ok_or_else(|| GuildError::InvalidDependency(format!("unknown task {task_id}")))?;
        if status != TaskStatus::Pending {
            return Err(GuildError::InvalidDependency(format!(
                "task {task_id} is {status}; dependencies can only be added while pending"
            )));
        }
        if state.reaches(dependency_id, task_id) {
            return Err(GuildError::InvalidDependency(format!(
                "{task_id} -> {dependency_id} would create a cycle"
            )));
        }

        let task = state.task_mut(task_id)?;
        if !task.dependencies.contains(&dependency_id) {
            task.dependencies.push(dependency_id);
            task.touch();
        }
        debug!(task_id = %task_id, dependency = %dependency_id, "Dependency added");
        Ok(())
    }

    /// Pending tasks whose dependencies are all completed, in insertion order.
    pub fn list_eligible(&self) -> Vec<Task> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|t| t.is_ready(|dep| state.is_completed(dep)))
            .cloned()
            .collect()
    }

    /// Move a task along the state machine.
    pub fn transition(&self, task_id: Uuid, next: TaskStatus) -> GuildResult<()> {
        {
            let mut state = self.state.write();
            let task = state.task_mut(task_id)?;
            if !task.status.can_transition_to(next) {
                return Err(GuildError::InvalidTransition {
                    task: task_id,
                    from: task.status.to_string(),
                    to: next.to_string(),
                });
            }
            debug!(task_id = %task_id, from = %task.status, to = %next, "Task transition");
            task.status = next;
            task.touch();
        }
        if next == TaskStatus::Completed {
            // Dependents may have just become eligible.
            self.notify.notify_one();
        }
        Ok(())
    }

    /// Record the winning agent for a new attempt on an in-progress task.
    ///
    /// Returns the attempt number (1-based).
    pub fn assign(&self, task_id: Uuid, agent_id: &str) -> GuildResult<u32> {
        let mut state = self.state.write();
        let task = state.task_mut(task_id)?;
        require_in_progress(task, "assigned")?;
        task.assigned_agent_id = Some(agent_id.to_string());
        task.attempts += 1;
        task.touch();
        Ok(task.attempts)
    }

    /// Append a failure to the task's audit trail.
    pub fn record_failure(&self, task_id: Uuid, reason: impl Into<String>) -> GuildResult<()> {
        let mut state = self.state.write();
        let task = state.task_mut(task_id)?;
        require_in_progress(task, "failure recorded")?;
        task.failures.push(FailureRecord {
            attempt: task.attempts,
            agent_id: task.assigned_agent_id.clone(),
            reason: reason.into(),
            at: Utc::now(),
        });
        task.touch();
        Ok(())
    }

    /// Store the executor's success payload summary.
    pub fn record_output(&self, task_id: Uuid, output: impl Into<String>) -> GuildResult<()> {
        let mut state = self.state.write();
        let task = state.task_mut(task_id)?;
        require_in_progress(task, "output recorded")?;
        task.output = Some(output.into());
        task.touch();
        Ok(())
    }

    /// Cancel an in-flight task: `in_progress -> failed` with a `cancelled:` reason.
    pub fn cancel(&self, task_id: Uuid, reason: &str) -> GuildResult<()> {
        let mut state = self.state.write();
        let task = state.task_mut(task_id)?;
        require_in_progress(task, "cancelled")?;
        task.failures.push(FailureRecord {
            attempt: task.attempts,
            agent_id: task.assigned_agent_id.clone(),
            reason: format!("cancelled: {reason}"),
            at: Utc::now(),
        });
        task.status = TaskStatus::Failed;
        task.touch();
        info!(task_id = %task_id, reason, "Task cancelled");
        Ok(())
    }

    pub fn get(&self, task_id: Uuid) -> Option<Task> {
        self.state.read().tasks.get(&task_id).cloned()
    }

    /// All tasks in insertion order.
    pub fn all_tasks(&self) -> Vec<Task> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .cloned()
            .collect()
    }

    /// Pending tasks that can never become eligible because a dependency,
    /// directly or transitively, has failed.
    pub fn stuck_tasks(&self) -> Vec<Task> {
        let state = self.state.read();
        let mut memo = HashMap::new();
        state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| t.dependencies.iter().any(|dep| state.is_blocked(*dep, &mut memo)))
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> StatusCounts {
        let state = self.state.read();
        let mut counts = StatusCounts::default();
        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Nothing is running and every remaining pending task is stuck.
    pub fn is_settled(&self) -> bool {
        let counts = self.counts();
        counts.in_progress == 0 && self.stuck_tasks().len() == counts.pending
    }

    /// Whole-graph cycle check.
    pub fn has_cycle(&self) -> bool {
        let state = self.state.read();
        let mut visited = HashMap::new();
        state
            .order
            .iter()
            .any(|id| state.dfs_cycle(*id, &mut visited))
    }

    /// Handle fired when a task is created or completed.
    pub fn subscribe(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    pub fn len(&self) -> usize {
        self.state.read().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

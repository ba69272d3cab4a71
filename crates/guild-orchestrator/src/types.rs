use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Urgency of a task. Drives provider negotiation, never queue order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Lenient parser used by plan files and command parsers; unknown input maps to `Medium`.
    pub fn parse_level(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" => Priority::Low,
            "medium" => Priority::Medium,
            "high" => Priority::High,
            "critical" => Priority::Critical,
            _ => Priority::Medium,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Status of a task in the registry.
///
/// `Completed` and `Failed` are terminal: no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// The task state machine: `pending -> in_progress -> {completed, failed}`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Creation input for a task. This is everything a caller controls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_skills: BTreeSet<String>,
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    #[serde(default)]
    pub priority: Priority,
}

impl TaskSpec {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<Uuid>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// One failed execution attempt, kept on the task as an audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub attempt: u32,
    pub agent_id: Option<String>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// A task in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub required_skills: BTreeSet<String>,
    pub dependencies: Vec<Uuid>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub assigned_agent_id: Option<String>,
    /// Execution attempts started so far.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub failures: Vec<FailureRecord>,
    /// Summary returned by the executor on success.
    #[serde(default)]
    pub output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Materialize a spec into a fresh pending task.
    ///
    /// Duplicate dependency ids are collapsed, keeping the first occurrence.
    pub fn from_spec(spec: TaskSpec) -> Self {
        let now = Utc::now();
        let mut dependencies = Vec::with_capacity(spec.dependencies.len());
        for dep in spec.dependencies {
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }
        Self {
            id: Uuid::new_v4(),
            title: spec.title,
            description: spec.description,
            required_skills: spec.required_skills,
            dependencies,
            priority: spec.priority,
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            attempts: 0,
            failures: Vec::new(),
            output: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A pending task whose every dependency satisfies `is_completed`.
    pub fn is_ready(&self, is_completed: impl Fn(&Uuid) -> bool) -> bool {
        self.status == TaskStatus::Pending && self.dependencies.iter().all(is_completed)
    }

    pub fn requires_skill(&self, skill: &str) -> bool {
        self.required_skills.contains(skill)
    }

    /// Reason of the most recent failure, if any.
    pub fn last_failure(&self) -> Option<&str> {
        self.failures.last().map(|f| f.reason.as_str())
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// A candidate worker supplied by the roster collaborator. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgAgent {
    pub id: String,
    pub role: String,
    pub skills: BTreeSet<String>,
    /// Rolling historical accuracy, 0 to 100.
    pub success_rate: f64,
}

impl OrgAgent {
    pub fn new<I, S>(id: impl Into<String>, role: impl Into<String>, skills: I, success_rate: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            role: role.into(),
            skills: skills.into_iter().map(Into::into).collect(),
            success_rate,
        }
    }

    /// Whether this agent may bid on a task with the given requirements.
    ///
    /// A task without required skills admits every agent.
    pub fn qualifies_for(&self, required: &BTreeSet<String>) -> bool {
        required.is_empty() || !self.skills.is_disjoint(required)
    }
}

/// One agent's candidacy for one task during a single allocation round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub agent_id: String,
    pub score: f64,
    pub cost_estimate: f64,
    pub eta_minutes: u32,
}

impl Bid {
    /// Value delivered per unit of cost. Costs below 1 count as 1.
    pub fn roi(&self) -> f64 {
        self.score / self.cost_estimate.max(1.0)
    }
}

/// Upstream execution backend that services a task on an agent's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTier {
    /// Reliability-first backend for critical and coding work.
    Reliable,
    /// Second-tier reliability backend for research work.
    Balanced,
    /// Cost-optimized default.
    Economy,
}

impl std::fmt::Display for ProviderTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderTier::Reliable => write!(f, "reliable"),
            ProviderTier::Balanced => write!(f, "balanced"),
            ProviderTier::Economy => write!(f, "economy"),
        }
    }
}

/// Metrics tracked per agent across allocation rounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub bids_won: u32,
    pub completed: u32,
    pub failed_attempts: u32,
    pub duration_ms: u64,
}

/// Real-time snapshot of an agent's activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    /// Tasks this agent is executing right now; one agent may win several.
    pub active_tasks: BTreeSet<Uuid>,
    pub status: WorkerStatus,
    pub metrics: AgentMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Working,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_from_spec() {
        let task = Task::from_spec(
            TaskSpec::new("Index docs", "Crawl and index the docs site")
                .with_skills(["research"])
                .with_priority(Priority::High),
        );
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, Priority::High);
        assert!(task.requires_skill("research"));
        assert!(task.dependencies.is_empty());
        assert!(task.assigned_agent_id.is_none());
        assert_eq!(task.created_at, task.updated_at);
    }

    #[test]
    fn test_duplicate_dependencies_collapse() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let task = Task::from_spec(TaskSpec::new("t", "").with_dependencies(vec![a, b, a]));
        assert_eq!(task.dependencies, vec![a, b]);
    }

    #[test]
    fn test_task_is_ready() {
        let dep = Uuid::new_v4();
        let mut task = Task::from_spec(TaskSpec::new("t", "").with_dependencies(vec![dep]));
        assert!(!task.is_ready(|_| false));
        assert!(task.is_ready(|id| *id == dep));

        task.status = TaskStatus::InProgress;
        assert!(!task.is_ready(|_| true));
    }

    #[test]
    fn test_state_machine_edges() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!InProgress.can_transition_to(Pending));
        for terminal in [Completed, Failed] {
            assert!(terminal.is_terminal());
            for next in [Pending, InProgress, Completed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_priority_parse_level() {
        assert_eq!(Priority::parse_level("CRITICAL"), Priority::Critical);
        assert_eq!(Priority::parse_level(" low "), Priority::Low);
        assert_eq!(Priority::parse_level("urgent"), Priority::Medium);
        assert_eq!(Priority::default().to_string(), "medium");
    }

    #[test]
    fn test_agent_qualification() {
        let agent = OrgAgent::new("a1", "engineer", ["coding", "review"], 80.0);
        let coding: BTreeSet<String> = ["coding".to_string()].into();
        let research: BTreeSet<String> = ["research".to_string()].into();
        assert!(agent.qualifies_for(&coding));
        assert!(!agent.qualifies_for(&research));
        assert!(agent.qualifies_for(&BTreeSet::new()));
    }

    #[test]
    fn test_bid_roi_floors_cost() {
        let bid = Bid {
            agent_id: "a".into(),
            score: 40.0,
            cost_estimate: 0.25,
            eta_minutes: 5,
        };
        assert_eq!(bid.roi(), 40.0);
    }

    #[test]
    fn test_agent_metrics_default() {
        let metrics = AgentMetrics::default();
        assert_eq!(metrics.bids_won, 0);
        assert_eq!(metrics.failed_attempts, 0);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let parsed: TaskStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(parsed, TaskStatus::Failed);
    }
}

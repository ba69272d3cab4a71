use crate::bidding::{negotiate_provider, BiddingAllocator};
use crate::chaos::FaultInjector;
use crate::config::OrchestratorConfig;
use crate::execution::{AgentRoster, ExecutionOutput, ExecutionRequest, TaskExecutor, ToolGate};
use crate::monitor::AgentMonitor;
use crate::registry::{StatusCounts, TaskRegistry};
use crate::types::{Bid, Task, TaskSpec, TaskStatus};
use futures_util::future::join_all;
use guild_core::{ExecutionContext, GuildError, GuildResult, Message};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What happened to one eligible task during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Failed,
    /// Nobody bid; the task stays pending for a later cycle.
    Unallocated,
    /// Another pipeline claimed the task first.
    Skipped,
}

/// Tally of one pass over the eligible tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub eligible: usize,
    pub completed: usize,
    pub failed: usize,
    pub unallocated: usize,
    pub skipped: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => self.completed += 1,
            TaskOutcome::Failed => self.failed += 1,
            TaskOutcome::Unallocated => self.unallocated += 1,
            TaskOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Whether any task reached a terminal state.
    pub fn made_progress(&self) -> bool {
        self.completed + self.failed > 0
    }
}

/// Result of driving the loop until nothing more can happen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub cycles: usize,
    pub counts: StatusCounts,
    /// Pending tasks blocked forever by a failed dependency.
    pub stuck: Vec<Uuid>,
    /// Pending tasks that are eligible but found no bidder.
    pub unallocated: Vec<Uuid>,
}

/// The orchestration loop: poll, allocate, execute, record.
///
/// Each eligible task runs through its own pipeline; pipelines share only the
/// registry's bookkeeping lock, never a lock around execution.
pub struct Orchestrator {
    registry: Arc<TaskRegistry>,
    allocator: BiddingAllocator,
    chaos: Arc<FaultInjector>,
    roster: Arc<dyn AgentRoster>,
    executor: Arc<dyn TaskExecutor>,
    monitor: Arc<AgentMonitor>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create an orchestrator with a fresh registry and an entropy-seeded fault injector.
    pub fn new(
        config: OrchestratorConfig,
        roster: Arc<dyn AgentRoster>,
        executor: Arc<dyn TaskExecutor>,
    ) -> GuildResult<Self> {
        config.validate()?;
        let chaos = Arc::new(FaultInjector::new(config.chaos.clone())?);
        Ok(Self {
            registry: Arc::new(TaskRegistry::new()),
            allocator: BiddingAllocator::new(config.costs.clone()),
            chaos,
            roster,
            executor,
            monitor: Arc::new(AgentMonitor::new()),
            config,
        })
    }

    /// Replace the fault injector, e.g. with one driven by a scripted random source.
    pub fn with_fault_injector(mut self, chaos: Arc<FaultInjector>) -> Self {
        self.chaos = chaos;
        self
    }

    /// Share an existing registry.
    pub fn with_registry(mut self, registry: Arc<TaskRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn chaos(&self) -> &Arc<FaultInjector> {
        &self.chaos
    }

    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Sole inbound entry point for new work.
    pub fn create_task(&self, spec: TaskSpec) -> GuildResult<Task> {
        self.registry.create_task(spec)
    }

    /// Offer every currently eligible task one allocation round and run the winners.
    pub async fn run_cycle(&self) -> CycleReport {
        let eligible = self.registry.list_eligible();
        let mut report = CycleReport {
            eligible: eligible.len(),
            ..CycleReport::default()
        };
        if eligible.is_empty() {
            return report;
        }

        debug!(eligible = eligible.len(), "Orchestrator: starting cycle");
        let outcomes = join_all(eligible.into_iter().map(|task| self.process_task(task))).await;
        for outcome in outcomes {
            report.record(outcome);
        }

        info!(
            eligible = report.eligible,
            completed = report.completed,
            failed = report.failed,
            unallocated = report.unallocated,
            "Orchestrator: cycle complete"
        );
        report
    }

    /// Run cycles until the registry settles or a cycle makes no progress.
    pub async fn run_until_settled(&self, max_cycles: usize) -> RunSummary {
        let mut cycles = 0;
        while cycles < max_cycles && !self.registry.is_settled() {
            let report = self.run_cycle().await;
            cycles += 1;
            if !report.made_progress() {
                break;
            }
        }

        let stuck: Vec<Uuid> = self.registry.stuck_tasks().iter().map(|t| t.id).collect();
        if !stuck.is_empty() {
            warn!(count = stuck.len(), "Orchestrator: tasks stuck behind failed dependencies");
        }
        RunSummary {
            cycles,
            counts: self.registry.counts(),
            stuck,
            unallocated: self.registry.list_eligible().iter().map(|t| t.id).collect(),
        }
    }

    /// Dispatch eligible tasks until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Every claimed task runs as its own spawned pipeline, so a slow execution
    /// never delays unrelated work. The loop rescans the registry when it is
    /// notified (task created or completed) or the poll interval elapses, and
    /// waits for in-flight pipelines before returning.
    pub async fn run(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let notify = self.registry.subscribe();
        let mut pipelines: JoinSet<(Uuid, TaskOutcome)> = JoinSet::new();
        let mut in_flight: HashSet<Uuid> = HashSet::new();
        let mut rescan = true;

        info!(poll_interval_ms = self.config.poll_interval_ms, "Orchestrator: loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if rescan {
                self.dispatch_eligible(&mut pipelines, &mut in_flight);
                rescan = false;
            }
            tokio::select! {
                Some(joined) = pipelines.join_next(), if !pipelines.is_empty() => match joined {
                    Ok((task_id, outcome)) => {
                        in_flight.remove(&task_id);
                        debug!(task_id = %task_id, outcome = ?outcome, "Pipeline finished");
                    }
                    Err(e) => error!(error = %e, "Task pipeline aborted"),
                },
                _ = notify.notified() => rescan = true,
                _ = tokio::time::sleep(self.config.poll_interval()) => rescan = true,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if !pipelines.is_empty() {
            info!(in_flight = pipelines.len(), "Orchestrator: draining in-flight pipelines");
        }
        while let Some(joined) = pipelines.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Task pipeline aborted");
            }
        }
        info!("Orchestrator: loop stopped");
    }

    /// Spawn a pipeline for every eligible task that has none yet.
    fn dispatch_eligible(
        self: &Arc<Self>,
        pipelines: &mut JoinSet<(Uuid, TaskOutcome)>,
        in_flight: &mut HashSet<Uuid>,
    ) {
        for task in self.registry.list_eligible() {
            if !in_flight.insert(task.id) {
                continue;
            }
            let task_id = task.id;
            let orchestrator = Arc::clone(self);
            pipelines.spawn(async move { (task_id, orchestrator.process_task(task).await) });
        }
    }

    /// Allocate, claim and execute one eligible task, retrying within the bound.
    async fn process_task(&self, task: Task) -> TaskOutcome {
        let first = match self.allocate(&task, &[]).await {
            Ok(Some(bid)) => bid,
            Ok(None) => {
                info!(task_id = %task.id, "No eligible agent; task stays pending");
                return TaskOutcome::Unallocated;
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Roster unavailable; task stays pending");
                return TaskOutcome::Unallocated;
            }
        };

        if let Err(e) = self.registry.transition(task.id, TaskStatus::InProgress) {
            debug!(task_id = %task.id, error = %e, "Task already claimed");
            return TaskOutcome::Skipped;
        }

        let max_retries = self.config.retry.max_retries;
        let mut excluded: Vec<String> = Vec::new();
        let mut next_bid = Some(first);

        for round in 0..=max_retries {
            if round > 0 {
                let delay = self.config.retry.backoff(round - 1);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            let bid = match next_bid.take() {
                Some(bid) => bid,
                None => match self.allocate(&task, &excluded).await {
                    Ok(Some(bid)) => bid,
                    Ok(None) => {
                        self.record_failure(&task, &GuildError::AllocationExhausted(task.id));
                        continue;
                    }
                    Err(e) => {
                        self.record_failure(&task, &e);
                        continue;
                    }
                },
            };

            match self.execute_attempt(&task, &bid).await {
                Ok(output) => return self.complete(&task, output),
                Err(e) => {
                    self.record_failure(&task, &e);
                    if !e.is_retryable() {
                        break;
                    }
                    if !excluded.contains(&bid.agent_id) {
                        excluded.push(bid.agent_id);
                    }
                }
            }
        }

        self.fail(&task)
    }

    async fn allocate(&self, task: &Task, excluded: &[String]) -> GuildResult<Option<Bid>> {
        let candidates = self.roster.agents_with_skills(&task.required_skills).await?;
        Ok(self.allocator.allocate(task, &candidates, excluded))
    }

    async fn execute_attempt(&self, task: &Task, bid: &Bid) -> GuildResult<ExecutionOutput> {
        let attempt = self.registry.assign(task.id, &bid.agent_id)?;
        let provider = negotiate_provider(task);
        self.monitor.start_task(&bid.agent_id, task.id).await;

        info!(
            task_id = %task.id,
            agent_id = %bid.agent_id,
            provider = %provider,
            attempt,
            roi = bid.roi(),
            "Dispatching task"
        );

        let snapshot = self.registry.get(task.id).unwrap_or_else(|| task.clone());
        let context = build_context(&snapshot, &bid.agent_id, attempt);
        let started = Instant::now();

        self.chaos.apply_latency().await;
        let dispatched = self.chaos.scramble_context(&context).into_owned();

        let gate = ToolGate::new(Arc::clone(&self.chaos), task.id);
        let request = ExecutionRequest {
            task: snapshot,
            agent_id: bid.agent_id.clone(),
            provider,
            attempt,
            context: dispatched,
        };
        let result = self.executor.execute(request, &gate).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.monitor
            .finish_task(&bid.agent_id, task.id, result.is_ok(), elapsed_ms)
            .await;

        match &result {
            Ok(_) => debug!(task_id = %task.id, tool_calls = gate.calls(), elapsed_ms, "Attempt succeeded"),
            Err(e) => warn!(
                task_id = %task.id,
                agent_id = %bid.agent_id,
                attempt,
                error = %e,
                "Attempt failed"
            ),
        }
        result
    }

    fn complete(&self, task: &Task, output: ExecutionOutput) -> TaskOutcome {
        if let Err(e) = self.registry.record_output(task.id, output.summary) {
            self.registry_rejected(task.id, e);
            return self.terminal_outcome(task.id);
        }
        if let Err(e) = self.registry.transition(task.id, TaskStatus::Completed) {
            self.registry_rejected(task.id, e);
            return self.terminal_outcome(task.id);
        }
        info!(task_id = %task.id, title = %task.title, "Task completed");
        TaskOutcome::Completed
    }

    fn fail(&self, task: &Task) -> TaskOutcome {
        if let Err(e) = self.registry.transition(task.id, TaskStatus::Failed) {
            self.registry_rejected(task.id, e);
            return self.terminal_outcome(task.id);
        }
        error!(task_id = %task.id, title = %task.title, "Task failed after exhausting retries");
        TaskOutcome::Failed
    }

    fn record_failure(&self, task: &Task, err: &GuildError) {
        if let Err(e) = self.registry.record_failure(task.id, err.to_string()) {
            self.registry_rejected(task.id, e);
        }
    }

    /// Outcome for a task whose terminal state was decided elsewhere (cancellation).
    fn terminal_outcome(&self, task_id: Uuid) -> TaskOutcome {
        match self.registry.get(task_id).map(|t| t.status) {
            Some(TaskStatus::Completed) => TaskOutcome::Completed,
            _ => TaskOutcome::Failed,
        }
    }

    /// An update the registry refused. Cancellation races are expected; anything
    /// else is a bookkeeping bug.
    fn registry_rejected(&self, task_id: Uuid, err: GuildError) {
        let finished_elsewhere = self
            .registry
            .get(task_id)
            .is_some_and(|t| t.status.is_terminal());
        if finished_elsewhere {
            info!(task_id = %task_id, error = %err, "Task was finalized elsewhere");
            return;
        }
        error!(task_id = %task_id, error = %err, "Registry rejected orchestrator update");
        debug_assert!(
            !matches!(err, GuildError::InvalidTransition { .. }),
            "invalid transition in orchestration loop: {err}"
        );
    }
}

fn build_context(task: &Task, agent_id: &str, attempt: u32) -> ExecutionContext {
    let mut context = ExecutionContext::new(task.id)
        .with_variable("attempt", serde_json::json!(attempt))
        .with_variable("agent_id", serde_json::json!(agent_id))
        .with_variable("priority", serde_json::json!(task.priority));
    context.push(Message::system(format!(
        "You are agent '{agent_id}'. Complete the task below."
    )));
    context.push(Message::task(format!("{}\n\n{}", task.title, task.description)));
    if let Some(reason) = task.last_failure() {
        context.push(Message::feedback(format!("A previous attempt failed: {reason}")));
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::ChaosConfig;
    use crate::config::RetryPolicy;
    use crate::execution::StaticRoster;
    use crate::types::OrgAgent;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingExecutor {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl TaskExecutor for CountingExecutor {
        async fn execute(
            &self,
            request: ExecutionRequest,
            tools: &ToolGate,
        ) -> GuildResult<ExecutionOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tools.check("notes")?;
            if self.fail {
                Err(GuildError::ExecutionFailure("backend down".into()))
            } else {
                Ok(ExecutionOutput::new(format!("done: {}", request.task.title)))
            }
        }
    }

    fn quiet_config(max_retries: u32) -> OrchestratorConfig {
        OrchestratorConfig {
            retry: RetryPolicy::immediate(max_retries),
            chaos: ChaosConfig::disabled(),
            ..OrchestratorConfig::default()
        }
    }

    fn orchestrator(fail: bool, max_retries: u32) -> (Orchestrator, Arc<CountingExecutor>) {
        let roster = Arc::new(StaticRoster::new(vec![OrgAgent::new(
            "solo",
            "generalist",
            ["ops"],
            75.0,
        )]));
        let executor = Arc::new(CountingExecutor {
            calls: AtomicU32::new(0),
            fail,
        });
        let orch = Orchestrator::new(quiet_config(max_retries), roster, executor.clone()).unwrap();
        (orch, executor)
    }

    #[test]
    fn test_build_context_mentions_previous_failure() {
        let mut task = Task::from_spec(TaskSpec::new("Deploy", "Roll out v2"));
        let ctx = build_context(&task, "a1", 1);
        assert_eq!(ctx.history.len(), 2);

        task.failures.push(crate::types::FailureRecord {
            attempt: 1,
            agent_id: Some("a1".into()),
            reason: "tool crashed".into(),
            at: chrono::Utc::now(),
        });
        let ctx = build_context(&task, "a2", 2);
        assert_eq!(ctx.history.len(), 3);
        assert!(ctx.history[2].content.contains("tool crashed"));
        assert_eq!(ctx.variables["attempt"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn test_cycle_completes_task() {
        let (orch, executor) = orchestrator(false, 2);
        let task = orch
            .create_task(TaskSpec::new("Rotate keys", "").with_skills(["ops"]))
            .unwrap();

        let report = orch.run_cycle().await;
        assert_eq!(report.eligible, 1);
        assert_eq!(report.completed, 1);

        let stored = orch.registry().get(task.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.assigned_agent_id.as_deref(), Some("solo"));
        assert_eq!(stored.output.as_deref(), Some("done: Rotate keys"));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_bound_respected() {
        let (orch, executor) = orchestrator(true, 1);
        let task = orch
            .create_task(TaskSpec::new("Flaky", "").with_skills(["ops"]))
            .unwrap();

        let report = orch.run_cycle().await;
        assert_eq!(report.failed, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

        let stored = orch.registry().get(task.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.failures.len(), 2);
        assert!(stored.last_failure().unwrap().contains("backend down"));
    }

    #[tokio::test]
    async fn test_unallocated_task_stays_pending() {
        let (orch, executor) = orchestrator(false, 1);
        let task = orch
            .create_task(TaskSpec::new("Translate", "").with_skills(["french"]))
            .unwrap();

        let report = orch.run_cycle().await;
        assert_eq!(report.unallocated, 1);
        assert!(!report.made_progress());
        assert_eq!(orch.registry().get(task.id).unwrap().status, TaskStatus::Pending);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (orch, _executor) = orchestrator(false, 0);
        let orch = Arc::new(orch);
        let (tx, rx) = watch::channel(false);

        let runner = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.run(rx).await })
        };

        let task = orch
            .create_task(TaskSpec::new("Backup", "").with_skills(["ops"]))
            .unwrap();

        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        while orch.registry().get(task.id).unwrap().status != TaskStatus::Completed {
            assert!(Instant::now() < deadline, "task was never executed");
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap();
    }
}

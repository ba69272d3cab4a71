//! Stand-in executor for dry runs of a plan.

use async_trait::async_trait;
use guild_core::{GuildError, GuildResult};
use guild_orchestrator::{ExecutionOutput, ExecutionRequest, TaskExecutor, ToolGate};
use std::time::Duration;
use tracing::debug;

/// Scenario fault that makes every simulated attempt fail.
pub const EXECUTOR_DOWN_FAULT: &str = "executor-down";

const TOOLS: [&str; 4] = ["search", "read_file", "write_file", "shell"];

/// Pretends to work a task by issuing a fixed number of tool calls.
pub struct SimulatedExecutor {
    tool_calls: u32,
    step_delay: Duration,
}

impl SimulatedExecutor {
    pub fn new(tool_calls: u32, step_delay: Duration) -> Self {
        Self {
            tool_calls,
            step_delay,
        }
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        request: ExecutionRequest,
        tools: &ToolGate,
    ) -> GuildResult<ExecutionOutput> {
        if tools.is_fault_enabled(EXECUTOR_DOWN_FAULT) {
            return Err(GuildError::ExecutionFailure(format!(
                "executor unavailable for agent '{}'",
                request.agent_id
            )));
        }

        for step in 0..self.tool_calls {
            let tool = TOOLS[step as usize % TOOLS.len()];
            tools
                .call(tool, async {
                    if !self.step_delay.is_zero() {
                        tokio::time::sleep(self.step_delay).await;
                    }
                    Ok(())
                })
                .await?;
            debug!(task_id = %request.task.id, tool, step, "Simulated tool call");
        }

        Ok(ExecutionOutput {
            summary: format!(
                "'{}' handled by {} on the {} tier ({} context messages)",
                request.task.title,
                request.agent_id,
                request.provider,
                request.context.history.len()
            ),
            tool_calls: tools.calls(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use guild_core::ExecutionContext;
    use guild_orchestrator::{FaultInjector, ProviderTier, Task, TaskSpec};
    use std::sync::Arc;

    fn request() -> ExecutionRequest {
        let task = Task::from_spec(TaskSpec::new("Index docs", ""));
        ExecutionRequest {
            context: ExecutionContext::new(task.id),
            task,
            agent_id: "ada".into(),
            provider: ProviderTier::Economy,
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_runs_configured_tool_calls() {
        let executor = SimulatedExecutor::new(6, Duration::ZERO);
        let req = request();
        let gate = ToolGate::new(Arc::new(FaultInjector::disabled()), req.task.id);
        let output = executor.execute(req, &gate).await.unwrap();
        assert_eq!(output.tool_calls, 6);
        assert!(output.summary.contains("economy"));
    }

    #[tokio::test]
    async fn test_executor_down_fault() {
        let chaos = Arc::new(FaultInjector::disabled());
        chaos.enable_fault(EXECUTOR_DOWN_FAULT);
        let executor = SimulatedExecutor::new(2, Duration::ZERO);
        let req = request();
        let gate = ToolGate::new(chaos, req.task.id);
        let err = executor.execute(req, &gate).await.unwrap_err();
        assert!(matches!(err, GuildError::ExecutionFailure(_)));
        assert_eq!(gate.calls(), 0);
    }
}

use crate::bidding::CostTable;
use crate::chaos::ChaosConfig;
use guild_core::{GuildError, GuildResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configures how failed attempts are retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the initial attempt before a task is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// Retry `max_retries` times without waiting in between.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    /// Exponential backoff for the given 0-based retry, capped at `backoff_max_ms`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(retry));
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

/// Configuration surface of the orchestration core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub chaos: ChaosConfig,
    #[serde(default)]
    pub costs: CostTable,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            chaos: ChaosConfig::default(),
            costs: CostTable::default(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> GuildResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| GuildError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GuildResult<()> {
        self.chaos.validate()?;
        for (name, cost) in [
            ("reliable_unit_cost", self.costs.reliable_unit_cost),
            ("balanced_unit_cost", self.costs.balanced_unit_cost),
            ("economy_unit_cost", self.costs.economy_unit_cost),
        ] {
            if !cost.is_finite() || cost < 0.0 {
                return Err(GuildError::Config(format!(
                    "costs.{name} must be a non-negative number, got {cost}"
                )));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(GuildError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

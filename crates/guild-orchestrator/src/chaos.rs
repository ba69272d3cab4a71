//! Fault injection for resilience testing.
//!
//! The orchestrator consults a [`FaultInjector`] at three fixed points: before
//! dispatching an attempt ([`FaultInjector::apply_latency`]), around every tool
//! call ([`FaultInjector::intercept_tool`]) and on the context handed to the
//! executor ([`FaultInjector::scramble_context`]). Each gate draws from an
//! injectable [`RandomSource`] so tests can pin exact outcomes.

use guild_core::{ExecutionContext, GuildError, GuildResult};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Source of uniform random draws for the injection gates.
pub trait RandomSource: Send + Sync {
    /// Uniform value in `[0, 1)`.
    fn next_unit(&self) -> f64;

    /// Uniform integer in `[low, high]`.
    fn next_in_range(&self, low: u64, high: u64) -> u64;
}

/// [`RandomSource`] backed by a seedable `StdRng`.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_unit(&self) -> f64 {
        self.rng.lock().gen::<f64>()
    }

    fn next_in_range(&self, low: u64, high: u64) -> u64 {
        if low >= high {
            return low;
        }
        self.rng.lock().gen_range(low..=high)
    }
}

/// [`RandomSource`] that replays a fixed sequence of unit values, cycling.
///
/// Range draws map the next unit value linearly onto `[low, high]`.
pub struct ScriptedRandom {
    values: Vec<f64>,
    cursor: AtomicUsize,
}

impl ScriptedRandom {
    /// An empty script behaves as a constant `0.0`.
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Always returns `value`.
    pub fn constant(value: f64) -> Self {
        Self::new(vec![value])
    }
}

impl RandomSource for ScriptedRandom {
    fn next_unit(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.values.len();
        self.values[i].clamp(0.0, 1.0)
    }

    fn next_in_range(&self, low: u64, high: u64) -> u64 {
        if low >= high {
            return low;
        }
        let span = (high - low) as f64;
        low + (self.next_unit() * span).round() as u64
    }
}

/// Probabilities and latency bounds for the injection gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosConfig {
    /// Master switch. A disabled injector never fires.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_latency_probability")]
    pub latency_probability: f64,
    #[serde(default = "default_tool_fault_probability")]
    pub tool_fault_probability: f64,
    #[serde(default = "default_context_scramble_probability")]
    pub context_scramble_probability: f64,
    #[serde(default = "default_latency_min_ms")]
    pub latency_min_ms: u64,
    #[serde(default = "default_latency_max_ms")]
    pub latency_max_ms: u64,
    /// Fault identifiers enabled at startup.
    #[serde(default)]
    pub faults: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_latency_probability() -> f64 {
    0.30
}

fn default_tool_fault_probability() -> f64 {
    0.10
}

fn default_context_scramble_probability() -> f64 {
    0.05
}

fn default_latency_min_ms() -> u64 {
    500
}

fn default_latency_max_ms() -> u64 {
    2000
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            latency_probability: default_latency_probability(),
            tool_fault_probability: default_tool_fault_probability(),
            context_scramble_probability: default_context_scramble_probability(),
            latency_min_ms: default_latency_min_ms(),
            latency_max_ms: default_latency_max_ms(),
            faults: Vec::new(),
        }
    }
}

impl ChaosConfig {
    /// A configuration whose gates never fire.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> GuildResult<()> {
        for (name, p) in [
            ("latency_probability", self.latency_probability),
            ("tool_fault_probability", self.tool_fault_probability),
            ("context_scramble_probability", self.context_scramble_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(GuildError::Config(format!(
                    "chaos.{name} must be within [0, 1], got {p}"
                )));
            }
        }
        if self.latency_min_ms > self.latency_max_ms {
            return Err(GuildError::Config(format!(
                "chaos latency range is inverted: [{}, {}]",
                self.latency_min_ms, self.latency_max_ms
            )));
        }
        Ok(())
    }
}

/// Counters of injected faults since the injector was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaosStats {
    pub latency_injections: u64,
    pub injected_latency_ms: u64,
    pub tool_faults: u64,
    pub context_scrambles: u64,
}

/// Probabilistic fault simulator shared by every task pipeline.
pub struct FaultInjector {
    config: ChaosConfig,
    rng: Arc<dyn RandomSource>,
    faults: RwLock<HashSet<String>>,
    latency_injections: AtomicU64,
    injected_latency_ms: AtomicU64,
    tool_faults: AtomicU64,
    context_scrambles: AtomicU64,
}

impl FaultInjector {
    /// Build an injector drawing from an entropy-seeded RNG.
    pub fn new(config: ChaosConfig) -> GuildResult<Self> {
        Self::with_random(config, Arc::new(SeededRandom::from_entropy()))
    }

    /// Build an injector drawing from the supplied random source.
    pub fn with_random(config: ChaosConfig, rng: Arc<dyn RandomSource>) -> GuildResult<Self> {
        config.validate()?;
        let faults = config.faults.iter().cloned().collect();
        Ok(Self {
            config,
            rng,
            faults: RwLock::new(faults),
            latency_injections: AtomicU64::new(0),
            injected_latency_ms: AtomicU64::new(0),
            tool_faults: AtomicU64::new(0),
            context_scrambles: AtomicU64::new(0),
        })
    }

    /// An injector that never fires. Fault membership still works.
    pub fn disabled() -> Self {
        Self {
            config: ChaosConfig::disabled(),
            rng: Arc::new(ScriptedRandom::constant(1.0)),
            faults: RwLock::new(HashSet::new()),
            latency_injections: AtomicU64::new(0),
            injected_latency_ms: AtomicU64::new(0),
            tool_faults: AtomicU64::new(0),
            context_scrambles: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// A gate fires when the draw is strictly below its probability.
    fn roll(&self, probability: f64) -> bool {
        self.config.enabled && probability > 0.0 && self.rng.next_unit() < probability
    }

    /// Maybe sleep for a random duration to simulate upstream jitter.
    ///
    /// Returns the injected delay when the gate fired.
    pub async fn apply_latency(&self) -> Option<Duration> {
        if !self.roll(self.config.latency_probability) {
            return None;
        }
        let ms = self
            .rng
            .next_in_range(self.config.latency_min_ms, self.config.latency_max_ms);
        self.latency_injections.fetch_add(1, Ordering::Relaxed);
        self.injected_latency_ms.fetch_add(ms, Ordering::Relaxed);
        debug!(delay_ms = ms, "Chaos: injecting latency");
        let delay = Duration::from_millis(ms);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Some(delay)
    }

    /// Maybe fail a tool invocation. Future calls to the same tool are unaffected.
    pub fn intercept_tool(&self, tool: &str) -> GuildResult<()> {
        if self.roll(self.config.tool_fault_probability) {
            self.tool_faults.fetch_add(1, Ordering::Relaxed);
            warn!(tool, "Chaos: failing tool invocation");
            return Err(GuildError::ChaosFault {
                tool: tool.to_string(),
            });
        }
        Ok(())
    }

    /// Maybe hand back a copy of `context` with its history wiped.
    ///
    /// The input is never mutated; an unscrambled context is returned borrowed.
    pub fn scramble_context<'a>(&self, context: &'a ExecutionContext) -> Cow<'a, ExecutionContext> {
        if self.roll(self.config.context_scramble_probability) {
            self.context_scrambles.fetch_add(1, Ordering::Relaxed);
            warn!(
                task_id = %context.task_id,
                lost_messages = context.history.len(),
                "Chaos: scrambling execution context"
            );
            Cow::Owned(context.without_history())
        } else {
            Cow::Borrowed(context)
        }
    }

    /// Turn on a persistent fault identifier. Its meaning belongs to the caller.
    pub fn enable_fault(&self, id: impl Into<String>) {
        self.faults.write().insert(id.into());
    }

    /// Returns whether the identifier was enabled.
    pub fn disable_fault(&self, id: &str) -> bool {
        self.faults.write().remove(id)
    }

    pub fn is_fault_enabled(&self, id: &str) -> bool {
        self.faults.read().contains(id)
    }

    /// Enabled fault identifiers, sorted.
    pub fn enabled_faults(&self) -> Vec<String> {
        let mut faults: Vec<String> = self.faults.read().iter().cloned().collect();
        faults.sort();
        faults
    }

    pub fn stats(&self) -> ChaosStats {
        ChaosStats {
            latency_injections: self.latency_injections.load(Ordering::Relaxed),
            injected_latency_ms: self.injected_latency_ms.load(Ordering::Relaxed),
            tool_faults: self.tool_faults.load(Ordering::Relaxed),
            context_scrambles: self.context_scrambles.load(Ordering::Relaxed),
        }
    }
}

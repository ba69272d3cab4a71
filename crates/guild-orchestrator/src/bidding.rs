use crate::types::{Bid, OrgAgent, Priority, ProviderTier, Task};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Skill tag that routes a task to the reliability-first provider.
pub const CODING_SKILL: &str = "coding";
/// Skill tag that routes a task to the second-tier reliability provider.
pub const RESEARCH_SKILL: &str = "research";

/// Synthetic resource costs used to price bids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostTable {
    #[serde(default = "default_reliable_unit_cost")]
    pub reliable_unit_cost: f64,
    #[serde(default = "default_balanced_unit_cost")]
    pub balanced_unit_cost: f64,
    #[serde(default = "default_economy_unit_cost")]
    pub economy_unit_cost: f64,
    #[serde(default = "default_fixed_overhead_minutes")]
    pub fixed_overhead_minutes: u32,
    #[serde(default = "default_per_skill_minutes")]
    pub per_skill_minutes: u32,
}

fn default_reliable_unit_cost() -> f64 {
    3.0
}

fn default_balanced_unit_cost() -> f64 {
    2.0
}

fn default_economy_unit_cost() -> f64 {
    1.0
}

fn default_fixed_overhead_minutes() -> u32 {
    5
}

fn default_per_skill_minutes() -> u32 {
    10
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            reliable_unit_cost: default_reliable_unit_cost(),
            balanced_unit_cost: default_balanced_unit_cost(),
            economy_unit_cost: default_economy_unit_cost(),
            fixed_overhead_minutes: default_fixed_overhead_minutes(),
            per_skill_minutes: default_per_skill_minutes(),
        }
    }
}

impl CostTable {
    /// Base cost of one unit of work on the given provider tier.
    pub fn unit_cost(&self, tier: ProviderTier) -> f64 {
        match tier {
            ProviderTier::Reliable => self.reliable_unit_cost,
            ProviderTier::Balanced => self.balanced_unit_cost,
            ProviderTier::Economy => self.economy_unit_cost,
        }
    }
}

/// Auction-based allocator: picks one agent per task by value per unit cost.
///
/// Holds only configuration, so it is safe to share across any number of
/// concurrent allocation rounds.
#[derive(Debug, Clone, Default)]
pub struct BiddingAllocator {
    costs: CostTable,
}

impl BiddingAllocator {
    pub fn new(costs: CostTable) -> Self {
        Self { costs }
    }

    pub fn costs(&self) -> &CostTable {
        &self.costs
    }

    /// Collect one bid per qualified candidate, in candidate order.
    ///
    /// Candidates sharing no skill with the task are dropped before bidding.
    pub fn conduct_bidding(&self, task: &Task, candidates: &[OrgAgent]) -> Vec<Bid> {
        let skill_count = u32::try_from(task.required_skills.len()).unwrap_or(u32::MAX);
        let tier = negotiate_provider(task);
        let cost_estimate = self.costs.unit_cost(tier) * (f64::from(skill_count) + 1.0);
        let eta_minutes = self
            .costs
            .per_skill_minutes
            .saturating_mul(skill_count)
            .saturating_add(self.costs.fixed_overhead_minutes);

        candidates
            .iter()
            .filter(|agent| agent.qualifies_for(&task.required_skills))
            .map(|agent| Bid {
                agent_id: agent.id.clone(),
                score: bid_score(agent.success_rate),
                cost_estimate,
                eta_minutes,
            })
            .collect()
    }

    /// Run a full allocation round, skipping `excluded` agents when anyone else
    /// qualifies.
    pub fn allocate(&self, task: &Task, candidates: &[OrgAgent], excluded: &[String]) -> Option<Bid> {
        let bids = self.conduct_bidding(task, candidates);
        let fresh: Vec<Bid> = bids
            .iter()
            .filter(|bid| !excluded.contains(&bid.agent_id))
            .cloned()
            .collect();
        let pool = if fresh.is_empty() { &bids } else { &fresh };
        let winner = determine_winner(pool);
        debug!(
            task_id = %task.id,
            bids = bids.len(),
            winner = winner.as_ref().map(|b| b.agent_id.as_str()),
            "Allocation round finished"
        );
        winner
    }
}

/// A roster-reported success rate as a bid score in `0..=100`.
///
/// Rates that are not finite carry no track record and score zero.
fn bid_score(success_rate: f64) -> f64 {
    if success_rate.is_finite() {
        success_rate.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Highest ROI wins; ties go to the cheaper bid, then to the earlier one.
///
/// `None` means nobody bid, which is not an error.
pub fn determine_winner(bids: &[Bid]) -> Option<Bid> {
    let mut best: Option<&Bid> = None;
    for bid in bids.iter().filter(|bid| !bid.roi().is_nan()) {
        best = match best {
            None => Some(bid),
            Some(current) => {
                let better = match bid.roi().total_cmp(&current.roi()) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => bid.cost_estimate < current.cost_estimate,
                };
                Some(if better { bid } else { current })
            }
        };
    }
    best.cloned()
}

/// Total policy mapping a task to the upstream provider that services it.
pub fn negotiate_provider(task: &Task) -> ProviderTier {
    if task.priority == Priority::Critical || task.requires_skill(CODING_SKILL) {
        ProviderTier::Reliable
    } else if task.requires_skill(RESEARCH_SKILL) {
        ProviderTier::Balanced
    } else {
        ProviderTier::Economy
    }
}

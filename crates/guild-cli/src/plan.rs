//! Plan files.
//!
//! A plan bundles orchestrator overrides, the agent roster and the tasks to
//! run. Tasks name each other through plan-local keys which are resolved to
//! registry ids when the plan is loaded.

use guild_core::{GuildError, GuildResult};
use guild_orchestrator::{OrchestratorConfig, OrgAgent, Priority, TaskRegistry, TaskSpec};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

/// Top-level plan document.
#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub config: OrchestratorConfig,
    #[serde(default)]
    pub agents: Vec<OrgAgent>,
    #[serde(default)]
    pub tasks: Vec<PlanTask>,
}

/// One `[[tasks]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanTask {
    /// Plan-local name, referenced from `depends_on`.
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Case-insensitive; unrecognized levels fall back to `medium`.
    #[serde(default, deserialize_with = "lenient_priority")]
    pub priority: Priority,
}

fn lenient_priority<'de, D>(deserializer: D) -> Result<Priority, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(Priority::parse_level(&raw))
}

impl Plan {
    /// Parse and sanity-check a plan document.
    pub fn from_toml_str(raw: &str) -> GuildResult<Self> {
        let plan: Plan = toml::from_str(raw).map_err(|e| GuildError::Config(e.to_string()))?;
        plan.config.validate()?;

        let mut agent_ids = std::collections::HashSet::new();
        for agent in &plan.agents {
            if !agent_ids.insert(agent.id.as_str()) {
                return Err(GuildError::Roster(format!("duplicate agent id '{}'", agent.id)));
            }
        }
        Ok(plan)
    }

    /// Register every task, then wire dependencies edge by edge.
    ///
    /// Keys may reference tasks declared later in the file. Returns the
    /// key-to-id mapping.
    pub fn register(&self, registry: &TaskRegistry) -> GuildResult<HashMap<String, Uuid>> {
        let mut ids: HashMap<String, Uuid> = HashMap::with_capacity(self.tasks.len());
        for entry in &self.tasks {
            if ids.contains_key(&entry.key) {
                return Err(GuildError::InvalidDependency(format!(
                    "duplicate task key '{}'",
                    entry.key
                )));
            }
            let spec = TaskSpec::new(&entry.title, &entry.description)
                .with_skills(entry.skills.iter().cloned())
                .with_priority(entry.priority);
            let task = registry.create_task(spec)?;
            ids.insert(entry.key.clone(), task.id);
        }

        for entry in &self.tasks {
            let task_id = ids[&entry.key];
            for dep_key in &entry.depends_on {
                let dep_id = ids.get(dep_key).copied().ok_or_else(|| {
                    GuildError::InvalidDependency(format!(
                        "task '{}' depends on unknown key '{dep_key}'",
                        entry.key
                    ))
                })?;
                registry.add_dependency(task_id, dep_id)?;
            }
        }
        Ok(ids)
    }
}

/// Read and parse a plan file.
pub fn parse_plan(path: &Path) -> GuildResult<Plan> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        GuildError::Config(format!("Failed to read plan '{}': {}", path.display(), e))
    })?;
    Plan::from_toml_str(&content).map_err(|e| match e {
        GuildError::Config(msg) => {
            GuildError::Config(format!("Failed to parse plan '{}': {msg}", path.display()))
        }
        other => other,
    })
}

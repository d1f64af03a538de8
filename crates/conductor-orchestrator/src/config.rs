use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for the mission engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bounded-loop safety valve: the mission fails once it would exceed
    /// this many iterations with unresolved tasks.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Whether the planner re-prompts once on an invalid task graph before
    /// failing the mission.
    #[serde(default = "default_replan")]
    pub replan_on_invalid_graph: bool,
    /// Buffer size of the observer event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_iterations() -> u32 {
    100
}

fn default_replan() -> bool {
    true
}

fn default_event_buffer() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            replan_on_invalid_graph: default_replan(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl EngineConfig {
    /// Load the config from a TOML file. Missing keys fall back to defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> ConductorResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| ConductorError::Config(e.to_string()))
    }

    /// Validate the config values.
    pub fn validate(&self) -> ConductorResult<()> {
        if self.max_iterations == 0 {
            return Err(ConductorError::Config(
                "max_iterations must be at least 1".into(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ConductorError::Config(
                "event_buffer must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{polling, traversal};
use crate::error::Result;
use crate::wait::PollConfig;

/// What a strategy falls back to when none of its rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAction {
    #[default]
    Pass,
    Flee,
}

/// Combat automation settings, loaded from JSON.
///
/// Timeouts of `None` wait forever (until cancelled).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub poll_interval_ms: u64,
    pub combat_timeout_secs: Option<u64>,
    pub planning_timeout_secs: Option<u64>,
    pub round_timeout_secs: Option<u64>,
    pub snapshot_attempts: u32,
    pub max_hops: usize,
    pub fallback: FallbackAction,
    pub discard_when_full: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: polling::POLL_INTERVAL.as_millis() as u64,
            combat_timeout_secs: None,
            planning_timeout_secs: Some(polling::PLANNING_TIMEOUT.as_secs()),
            round_timeout_secs: Some(polling::ROUND_TIMEOUT.as_secs()),
            snapshot_attempts: polling::SNAPSHOT_ATTEMPTS,
            max_hops: traversal::MAX_HOPS,
            fallback: FallbackAction::Pass,
            discard_when_full: false,
        }
    }
}

impl AutomationConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn combat_wait(&self) -> PollConfig {
        self.poll_config(self.combat_timeout_secs)
    }

    pub fn planning_wait(&self) -> PollConfig {
        self.poll_config(self.planning_timeout_secs)
    }

    pub fn round_wait(&self) -> PollConfig {
        self.poll_config(self.round_timeout_secs)
    }

    fn poll_config(&self, timeout_secs: Option<u64>) -> PollConfig {
        PollConfig {
            interval: self.poll_interval(),
            timeout: timeout_secs.map(Duration::from_secs),
        }
    }
}

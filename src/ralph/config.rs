//! Engine configuration types

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dispatch::DEFAULT_STEP_TIMEOUT_SECS;

/// Read-only execution limits exposed on the control surface
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Guardrails {
    /// Hard cap on steps executed for a single task
    pub max_steps_per_task: usize,

    /// Per-step handler timeout in seconds
    pub step_timeout_secs: u64,

    /// Checkpoint pause every N steps
    pub checkpoint_interval: u32,
}

/// Configuration for the execution loop (from YAML)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds to sleep when the queue is empty
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Seconds to back off after a loop-level error
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,

    /// Hard cap on steps executed for a single task
    #[serde(default = "default_max_steps")]
    pub max_steps_per_task: usize,

    /// Per-step handler timeout in seconds
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Checkpoint pause every N completed steps (N >= 1)
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u32,
}

fn default_poll_interval() -> u64 {
    debug!("default_poll_interval: called");
    5
}

fn default_error_backoff() -> u64 {
    debug!("default_error_backoff: called");
    5
}

fn default_max_steps() -> usize {
    debug!("default_max_steps: called");
    50
}

fn default_step_timeout() -> u64 {
    debug!("default_step_timeout: called");
    DEFAULT_STEP_TIMEOUT_SECS
}

fn default_checkpoint_interval() -> u32 {
    debug!("default_checkpoint_interval: called");
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        debug!("EngineConfig::default: called");
        Self {
            poll_interval_secs: default_poll_interval(),
            error_backoff_secs: default_error_backoff(),
            max_steps_per_task: default_max_steps(),
            step_timeout_secs: default_step_timeout(),
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

impl EngineConfig {
    /// Effective checkpoint interval; zero is lifted to 1
    pub fn checkpoint_every(&self) -> u32 {
        self.checkpoint_interval.max(1)
    }

    /// The limits this engine runs under
    pub fn guardrails(&self) -> Guardrails {
        Guardrails {
            max_steps_per_task: self.max_steps_per_task,
            step_timeout_secs: self.step_timeout_secs,
            checkpoint_interval: self.checkpoint_every(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();

        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.error_backoff_secs, 5);
        assert_eq!(config.max_steps_per_task, 50);
        assert_eq!(config.step_timeout_secs, 300);
        assert_eq!(config.checkpoint_interval, 10);
    }

    #[test]
    fn test_deserialize_minimal() {
        let yaml = "max_steps_per_task: 7\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.max_steps_per_task, 7);
        // Defaults should apply
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.checkpoint_interval, 10);
    }

    #[test]
    fn test_guardrails_lift_zero_interval() {
        let config = EngineConfig {
            checkpoint_interval: 0,
            ..Default::default()
        };
        assert_eq!(config.guardrails().checkpoint_interval, 1);
    }
}

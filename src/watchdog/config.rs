//! Watchdog configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for the watchdog (from YAML)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Seconds between health checks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Consecutive task failures before force-pausing the loop
    #[serde(default = "default_consecutive_failures")]
    pub consecutive_failure_threshold: u32,

    /// Error events within the window before a critical alert
    #[serde(default = "default_errors_per_window")]
    pub error_rate_threshold: usize,

    /// Trailing window for the error-rate check, in seconds
    #[serde(default = "default_error_window")]
    pub error_window_secs: u64,

    /// Tasks parked for approval before a backlog warning
    #[serde(default = "default_approval_backlog")]
    pub approval_backlog_threshold: usize,

    /// Tasks in progress before a backlog warning
    #[serde(default = "default_in_progress_backlog")]
    pub in_progress_threshold: usize,
}

fn default_poll_interval() -> u64 {
    debug!("default_poll_interval: called");
    30
}

fn default_consecutive_failures() -> u32 {
    debug!("default_consecutive_failures: called");
    5
}

fn default_errors_per_window() -> usize {
    debug!("default_errors_per_window: called");
    10
}

fn default_error_window() -> u64 {
    debug!("default_error_window: called");
    3_600
}

fn default_approval_backlog() -> usize {
    debug!("default_approval_backlog: called");
    25
}

fn default_in_progress_backlog() -> usize {
    debug!("default_in_progress_backlog: called");
    30
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        debug!("WatchdogConfig::default: called");
        Self {
            poll_interval_secs: default_poll_interval(),
            consecutive_failure_threshold: default_consecutive_failures(),
            error_rate_threshold: default_errors_per_window(),
            error_window_secs: default_error_window(),
            approval_backlog_threshold: default_approval_backlog(),
            in_progress_threshold: default_in_progress_backlog(),
        }
    }
}

impl WatchdogConfig {
    /// Get the poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Get the error-rate window as a Duration
    pub fn error_window(&self) -> Duration {
        Duration::from_secs(self.error_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WatchdogConfig::default();

        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.consecutive_failure_threshold, 5);
        assert_eq!(config.error_rate_threshold, 10);
        assert_eq!(config.error_window_secs, 3_600);
        assert_eq!(config.approval_backlog_threshold, 25);
        assert_eq!(config.in_progress_threshold, 30);
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.error_window(), Duration::from_secs(3_600));
    }

    #[test]
    fn test_deserialize_partial_yaml() {
        let yaml = "poll_interval_secs: 5\nconsecutive_failure_threshold: 2\n";
        let config: WatchdogConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.consecutive_failure_threshold, 2);
        // Defaults should apply
        assert_eq!(config.error_rate_threshold, 10);
        assert_eq!(config.in_progress_threshold, 30);
    }
}

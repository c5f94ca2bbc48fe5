//! ralphd configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::health::RetryConfig;
use crate::ralph::EngineConfig;
use crate::watchdog::WatchdogConfig;

/// Main ralphd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Task queue location
    pub queue: QueueConfig,

    /// Execution loop settings
    pub engine: EngineConfig,

    /// Retry and circuit-breaker settings
    pub recovery: RecoveryConfig,

    /// Watchdog thresholds
    pub watchdog: WatchdogConfig,

    /// Log file location
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .ralphd.yml
        let local_config = PathBuf::from(".ralphd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/ralphd/ralphd.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("ralphd").join("ralphd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Task queue location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Root directory of the folder queue
    pub dir: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("queue"),
        }
    }
}

/// Retry and circuit-breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Consecutive failures before a dependency's circuit opens
    #[serde(rename = "circuit-threshold")]
    pub circuit_threshold: u32,

    /// How long an open circuit stays open, in seconds
    #[serde(rename = "reset-window-secs")]
    pub reset_window_secs: u64,

    /// Backoff parameters for guarded dependency calls
    pub retry: RetryConfig,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            circuit_threshold: crate::health::DEFAULT_CIRCUIT_THRESHOLD,
            reset_window_secs: crate::health::DEFAULT_RESET_WINDOW_SECS,
            retry: RetryConfig::default(),
        }
    }
}

impl RecoveryConfig {
    /// Get the circuit reset window as a Duration
    pub fn reset_window(&self) -> Duration {
        Duration::from_secs(self.reset_window_secs)
    }
}

/// Log file location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log directory; defaults to ~/.local/share/ralphd/logs
    pub dir: Option<PathBuf>,
}

impl LoggingConfig {
    /// Resolve the effective log directory
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ralphd")
                .join("logs")
        })
    }
}

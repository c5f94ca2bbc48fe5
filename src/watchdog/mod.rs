//! Watchdog: independent monitoring of the execution loop

mod config;
mod monitor;

pub use config::WatchdogConfig;
pub use monitor::{Alert, AlertKind, AlertLevel, HealthMetrics, Watchdog};

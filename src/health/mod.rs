//! Dependency health and error recovery
//!
//! The registry tracks per-dependency health with circuit breaking; the
//! retry executor is the single retry/backoff path every external call
//! goes through.

mod registry;
mod retry;

pub use registry::{
    DEFAULT_CIRCUIT_THRESHOLD, DEFAULT_RESET_WINDOW_SECS, HealthRegistry, ServiceHealth, ServiceStatus,
};
pub use retry::{RetryConfig, RetryError, RetryExecutor};

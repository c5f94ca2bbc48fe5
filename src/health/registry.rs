//! Dependency health tracking and circuit breaking
//!
//! Tracks per-dependency success/failure counts. Sustained consecutive
//! failures open a circuit for a cooldown window so the engine stops
//! hammering a dead dependency; the watchdog reads the same records to
//! observe systemic failure without re-deriving it from logs.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditLog};
use crate::domain::now_ms;

/// Consecutive failures before a dependency is marked unhealthy and its
/// circuit opens
pub const DEFAULT_CIRCUIT_THRESHOLD: u32 = 5;

/// How long an open circuit stays open
pub const DEFAULT_RESET_WINDOW_SECS: u64 = 300;

/// Consecutive failures before a dependency is flagged degraded
const DEGRADED_THRESHOLD: u32 = 2;

/// Health status of a tracked dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Recent calls are succeeding
    #[default]
    Healthy,
    /// A few consecutive failures, or a half-open probe is due
    Degraded,
    /// Circuit open — calls are refused until the reset window elapses
    Unhealthy,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Per-dependency health record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    /// Dependency name
    pub name: String,

    /// Current status
    pub status: ServiceStatus,

    /// Failures since the last success
    pub consecutive_failures: u32,

    /// Total successes recorded
    pub total_successes: u64,

    /// Total failures recorded
    pub total_failures: u64,

    /// Last success timestamp (Unix milliseconds)
    pub last_success_at: Option<i64>,

    /// Last failure timestamp (Unix milliseconds)
    pub last_failure_at: Option<i64>,

    /// While set and in the future, the circuit is open
    pub circuit_open_until: Option<i64>,
}

impl ServiceHealth {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ServiceStatus::Healthy,
            consecutive_failures: 0,
            total_successes: 0,
            total_failures: 0,
            last_success_at: None,
            last_failure_at: None,
            circuit_open_until: None,
        }
    }
}

/// Registry of dependency health records
///
/// All mutation goes through `record_success`/`record_failure`; the single
/// registry-wide lock covers the read-modify-write of shared counters.
pub struct HealthRegistry {
    services: RwLock<HashMap<String, ServiceHealth>>,
    circuit_threshold: u32,
    reset_window: Duration,
    audit: Arc<AuditLog>,
}

impl HealthRegistry {
    /// Create a registry with explicit circuit parameters
    pub fn new(circuit_threshold: u32, reset_window: Duration, audit: Arc<AuditLog>) -> Self {
        debug!(circuit_threshold, ?reset_window, "HealthRegistry::new: called");
        Self {
            services: RwLock::new(HashMap::new()),
            circuit_threshold,
            reset_window,
            audit,
        }
    }

    /// Create a registry with the default threshold and reset window
    pub fn with_defaults(audit: Arc<AuditLog>) -> Self {
        Self::new(
            DEFAULT_CIRCUIT_THRESHOLD,
            Duration::from_secs(DEFAULT_RESET_WINDOW_SECS),
            audit,
        )
    }

    /// Register a dependency, defaulting to healthy. Idempotent.
    pub fn register(&self, name: &str) {
        debug!(%name, "HealthRegistry::register: called");
        if let Ok(mut services) = self.services.write() {
            services.entry(name.to_string()).or_insert_with(|| ServiceHealth::new(name));
        }
    }

    /// Record a successful call to a dependency
    pub fn record_success(&self, name: &str) {
        debug!(%name, "HealthRegistry::record_success: called");
        let mut event = None;
        let mut circuit_closed = false;

        if let Ok(mut services) = self.services.write() {
            let health = services.entry(name.to_string()).or_insert_with(|| ServiceHealth::new(name));

            health.consecutive_failures = 0;
            health.total_successes += 1;
            health.last_success_at = Some(now_ms());

            if health.status != ServiceStatus::Healthy {
                event = Some((health.status, ServiceStatus::Healthy));
                circuit_closed = health.circuit_open_until.is_some();
                health.status = ServiceStatus::Healthy;
                health.circuit_open_until = None;
            }
        }

        if let Some((from, to)) = event {
            debug!(%name, %from, %to, "record_success: status transition");
            self.audit.emit(AuditEvent::ServiceStatusChanged {
                service: name.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        if circuit_closed {
            self.audit.emit(AuditEvent::CircuitClosed {
                service: name.to_string(),
            });
        }
    }

    /// Record a failed call to a dependency
    ///
    /// At `circuit_threshold` consecutive failures the dependency goes
    /// unhealthy and its circuit opens for the reset window; further
    /// failures push the window out.
    pub fn record_failure(&self, name: &str, error: &str) {
        debug!(%name, %error, "HealthRegistry::record_failure: called");
        let mut transition = None;
        let mut circuit_opened = None;

        if let Ok(mut services) = self.services.write() {
            let health = services.entry(name.to_string()).or_insert_with(|| ServiceHealth::new(name));

            health.consecutive_failures += 1;
            health.total_failures += 1;
            health.last_failure_at = Some(now_ms());

            if health.consecutive_failures >= self.circuit_threshold {
                let open_until = now_ms() + self.reset_window.as_millis() as i64;
                if health.status != ServiceStatus::Unhealthy {
                    transition = Some((health.status, ServiceStatus::Unhealthy));
                    circuit_opened = Some(open_until);
                }
                health.status = ServiceStatus::Unhealthy;
                health.circuit_open_until = Some(open_until);
            } else if health.consecutive_failures >= DEGRADED_THRESHOLD && health.status == ServiceStatus::Healthy {
                transition = Some((health.status, ServiceStatus::Degraded));
                health.status = ServiceStatus::Degraded;
            }
        }

        if let Some((from, to)) = transition {
            warn!(%name, %from, %to, %error, "dependency status changed");
            self.audit.emit(AuditEvent::ServiceStatusChanged {
                service: name.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        if let Some(open_until_ms) = circuit_opened {
            warn!(%name, open_until_ms, "circuit opened");
            self.audit.emit(AuditEvent::CircuitOpened {
                service: name.to_string(),
                open_until_ms,
            });
        }
    }

    /// Whether the circuit is currently open for a dependency
    ///
    /// When the reset window has elapsed this clears the circuit and
    /// demotes the dependency to degraded: the half-open probe may
    /// proceed, but the dependency is not healthy until a success lands.
    pub fn is_circuit_open(&self, name: &str) -> bool {
        let mut demoted = false;
        let open = if let Ok(mut services) = self.services.write() {
            match services.get_mut(name) {
                Some(health) => match health.circuit_open_until {
                    Some(until) if now_ms() < until => true,
                    Some(_) => {
                        health.circuit_open_until = None;
                        if health.status == ServiceStatus::Unhealthy {
                            health.status = ServiceStatus::Degraded;
                            demoted = true;
                        }
                        false
                    }
                    None => false,
                },
                None => false,
            }
        } else {
            false
        };

        if demoted {
            debug!(%name, "is_circuit_open: reset window elapsed, half-open probe allowed");
            self.audit.emit(AuditEvent::ServiceStatusChanged {
                service: name.to_string(),
                from: ServiceStatus::Unhealthy.to_string(),
                to: ServiceStatus::Degraded.to_string(),
            });
        }

        open
    }

    /// Current status of a dependency, if registered
    pub fn status_of(&self, name: &str) -> Option<ServiceStatus> {
        self.services.read().ok()?.get(name).map(|h| h.status)
    }

    /// Snapshot of a single dependency's record
    pub fn health_of(&self, name: &str) -> Option<ServiceHealth> {
        self.services.read().ok()?.get(name).cloned()
    }

    /// Snapshot of every tracked dependency, sorted by name
    pub fn snapshot(&self) -> Vec<ServiceHealth> {
        let mut all: Vec<_> = self
            .services
            .read()
            .map(|services| services.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(threshold: u32, window: Duration) -> HealthRegistry {
        HealthRegistry::new(threshold, window, Arc::new(AuditLog::default()))
    }

    #[test]
    fn test_register_is_idempotent() {
        let reg = registry(5, Duration::from_secs(300));
        reg.register("mailer");
        reg.record_failure("mailer", "smtp down");
        reg.register("mailer");

        let health = reg.health_of("mailer").unwrap();
        assert_eq!(health.total_failures, 1);
        assert_eq!(health.status, ServiceStatus::Healthy);
    }

    #[test]
    fn test_degraded_after_two_consecutive_failures() {
        let reg = registry(5, Duration::from_secs(300));
        reg.record_failure("mailer", "x");
        assert_eq!(reg.status_of("mailer"), Some(ServiceStatus::Healthy));

        reg.record_failure("mailer", "x");
        assert_eq!(reg.status_of("mailer"), Some(ServiceStatus::Degraded));
        assert!(!reg.is_circuit_open("mailer"));
    }

    #[test]
    fn test_circuit_opens_at_threshold() {
        let reg = registry(5, Duration::from_secs(300));
        for _ in 0..4 {
            reg.record_failure("mailer", "x");
        }
        assert!(!reg.is_circuit_open("mailer"));

        reg.record_failure("mailer", "x");
        assert_eq!(reg.status_of("mailer"), Some(ServiceStatus::Unhealthy));
        assert!(reg.is_circuit_open("mailer"));

        let health = reg.health_of("mailer").unwrap();
        assert!(health.circuit_open_until.unwrap() > now_ms());
    }

    #[test]
    fn test_success_resets_streak_and_closes_circuit() {
        let reg = registry(3, Duration::from_secs(300));
        for _ in 0..3 {
            reg.record_failure("mailer", "x");
        }
        assert!(reg.is_circuit_open("mailer"));

        reg.record_success("mailer");
        assert!(!reg.is_circuit_open("mailer"));

        let health = reg.health_of("mailer").unwrap();
        assert_eq!(health.status, ServiceStatus::Healthy);
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.circuit_open_until.is_none());
    }

    #[test]
    fn test_half_open_demotes_to_degraded() {
        let reg = registry(2, Duration::from_millis(30));
        reg.record_failure("mailer", "x");
        reg.record_failure("mailer", "x");
        assert!(reg.is_circuit_open("mailer"));

        std::thread::sleep(Duration::from_millis(50));

        // Window elapsed: probe allowed, but still flagged degraded
        assert!(!reg.is_circuit_open("mailer"));
        assert_eq!(reg.status_of("mailer"), Some(ServiceStatus::Degraded));
        assert!(reg.health_of("mailer").unwrap().circuit_open_until.is_none());
    }

    #[test]
    fn test_failure_after_half_open_reopens_circuit() {
        let reg = registry(2, Duration::from_millis(30));
        reg.record_failure("mailer", "x");
        reg.record_failure("mailer", "x");
        std::thread::sleep(Duration::from_millis(50));
        assert!(!reg.is_circuit_open("mailer"));

        // Streak was never reset, so one more failure trips it again
        reg.record_failure("mailer", "x");
        assert!(reg.is_circuit_open("mailer"));
    }

    #[test]
    fn test_unknown_dependency_circuit_is_closed() {
        let reg = registry(5, Duration::from_secs(300));
        assert!(!reg.is_circuit_open("nobody"));
        assert_eq!(reg.status_of("nobody"), None);
    }

    #[test]
    fn test_status_change_events_emitted() {
        let audit = Arc::new(AuditLog::default());
        let reg = HealthRegistry::new(2, Duration::from_secs(300), audit.clone());

        reg.record_failure("mailer", "x");
        reg.record_failure("mailer", "x");
        reg.record_success("mailer");

        let kinds: Vec<_> = audit
            .recent(16)
            .into_iter()
            .map(|r| r.event.event_type())
            .collect();
        assert!(kinds.contains(&"ServiceStatusChanged"));
        assert!(kinds.contains(&"CircuitOpened"));
        assert!(kinds.contains(&"CircuitClosed"));
    }

    #[test]
    fn test_snapshot_sorted_by_name() {
        let reg = registry(5, Duration::from_secs(300));
        reg.register("zulu");
        reg.register("alpha");

        let all = reg.snapshot();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "alpha");
        assert_eq!(all[1].name, "zulu");
    }
}

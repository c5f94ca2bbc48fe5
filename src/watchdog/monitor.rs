//! Independent health monitor over the execution loop
//!
//! The watchdog reads what the engine exposes — the shared state record,
//! queue depths, the health registry, the audit trail — and never touches
//! the engine's internals. Its one enforcement power is a force-pause of
//! the loop when task failures run away; everything else is an alert.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::config::WatchdogConfig;
use crate::audit::{AuditEvent, AuditLog};
use crate::health::{HealthRegistry, ServiceStatus};
use crate::ralph::{LoopState, Ralph};
use crate::source::{QueueDepths, SourceError, TaskSource};

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Worth an operator's attention
    Warning,
    /// The system is failing; enforcement may follow
    Critical,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// What a watchdog alert is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Tasks are failing back to back
    ConsecutiveFailures,
    /// Too many error events inside the trailing window
    ErrorRate,
    /// Too many tasks parked for approval
    ApprovalBacklog,
    /// Too many tasks sitting in progress
    InProgressBacklog,
    /// A tracked dependency has its circuit open
    DependencyUnhealthy,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConsecutiveFailures => write!(f, "consecutive_failures"),
            Self::ErrorRate => write!(f, "error_rate"),
            Self::ApprovalBacklog => write!(f, "approval_backlog"),
            Self::InProgressBacklog => write!(f, "in_progress_backlog"),
            Self::DependencyUnhealthy => write!(f, "dependency_unhealthy"),
        }
    }
}

/// One finding from a health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub kind: AlertKind,
    pub message: String,
}

/// Result of one watchdog check
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    pub loop_state: LoopState,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub consecutive_failures: u32,
    pub depths: QueueDepths,
    pub errors_in_window: usize,
    pub paused_by_watchdog: bool,
    pub healthy: bool,
    pub alerts: Vec<Alert>,
}

#[derive(Default)]
struct Tracking {
    last_completed: u64,
    last_failed: u64,
    consecutive_failures: u32,
    paused_by_watchdog: bool,
    latest: Option<HealthMetrics>,
}

/// Periodic health monitor with force-pause authority
pub struct Watchdog {
    config: WatchdogConfig,
    ralph: Arc<Ralph>,
    source: Arc<dyn TaskSource>,
    registry: Arc<HealthRegistry>,
    audit: Arc<AuditLog>,
    tracking: Mutex<Tracking>,
}

impl Watchdog {
    pub fn new(
        config: WatchdogConfig,
        ralph: Arc<Ralph>,
        source: Arc<dyn TaskSource>,
        registry: Arc<HealthRegistry>,
        audit: Arc<AuditLog>,
    ) -> Self {
        debug!(?config, "Watchdog::new: called");
        Self {
            config,
            ralph,
            source,
            registry,
            audit,
            tracking: Mutex::new(Tracking::default()),
        }
    }

    /// Run checks on the configured period until aborted
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            "Watchdog::run: monitoring started"
        );

        loop {
            match self.check_once().await {
                Ok(metrics) if metrics.healthy => {
                    debug!("Watchdog::run: check passed");
                }
                Ok(metrics) => {
                    warn!(alerts = metrics.alerts.len(), "Watchdog::run: check found problems");
                }
                Err(err) => {
                    error!(error = %err, "Watchdog::run: check failed");
                }
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Run a single health check and apply enforcement
    pub async fn check_once(&self) -> Result<HealthMetrics, SourceError> {
        let snapshot = self.ralph.status();
        let depths = self.source.depths().await?;
        let errors_in_window = self.audit.errors_within(self.config.error_window());

        let mut tracking = self.tracking.lock().await;

        // Derive the failure streak from counter deltas: any completion
        // since the last check breaks the streak
        let completed_delta = snapshot.tasks_completed.saturating_sub(tracking.last_completed);
        let failed_delta = snapshot.tasks_failed.saturating_sub(tracking.last_failed);
        if completed_delta > 0 {
            tracking.consecutive_failures = 0;
        }
        tracking.consecutive_failures = tracking.consecutive_failures.saturating_add(failed_delta as u32);
        tracking.last_completed = snapshot.tasks_completed;
        tracking.last_failed = snapshot.tasks_failed;

        let mut alerts = Vec::new();

        if tracking.consecutive_failures >= self.config.consecutive_failure_threshold {
            alerts.push(Alert {
                level: AlertLevel::Critical,
                kind: AlertKind::ConsecutiveFailures,
                message: format!(
                    "{} consecutive task failures (threshold {})",
                    tracking.consecutive_failures, self.config.consecutive_failure_threshold
                ),
            });
        }

        if errors_in_window >= self.config.error_rate_threshold {
            alerts.push(Alert {
                level: AlertLevel::Critical,
                kind: AlertKind::ErrorRate,
                message: format!(
                    "{} errors in the last {}s (threshold {})",
                    errors_in_window, self.config.error_window_secs, self.config.error_rate_threshold
                ),
            });
        }

        if depths.awaiting_approval >= self.config.approval_backlog_threshold {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                kind: AlertKind::ApprovalBacklog,
                message: format!(
                    "{} tasks awaiting approval (threshold {}); consider pausing intake",
                    depths.awaiting_approval, self.config.approval_backlog_threshold
                ),
            });
        }

        if depths.in_progress >= self.config.in_progress_threshold {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                kind: AlertKind::InProgressBacklog,
                message: format!(
                    "{} tasks in progress (threshold {})",
                    depths.in_progress, self.config.in_progress_threshold
                ),
            });
        }

        for service in self.registry.snapshot() {
            if service.status == ServiceStatus::Unhealthy {
                alerts.push(Alert {
                    level: AlertLevel::Warning,
                    kind: AlertKind::DependencyUnhealthy,
                    message: format!("dependency '{}' is unhealthy, circuit open", service.name),
                });
            }
        }

        for alert in &alerts {
            warn!(level = %alert.level, kind = %alert.kind, "{}", alert.message);
            self.audit.emit(AuditEvent::WatchdogAlert {
                level: alert.level.to_string(),
                kind: alert.kind.to_string(),
                message: alert.message.clone(),
            });
        }

        // Enforcement: force-pause once per incident. The flag stays set
        // until an operator resets it, so repeated checks over the same
        // broken streak do not re-trigger the side effect.
        let over_failure_threshold =
            tracking.consecutive_failures >= self.config.consecutive_failure_threshold;
        if over_failure_threshold && !tracking.paused_by_watchdog {
            match self.ralph.pause() {
                Ok(()) => {
                    tracking.paused_by_watchdog = true;
                    warn!(
                        consecutive_failures = tracking.consecutive_failures,
                        "Watchdog::check_once: force-pausing the loop"
                    );
                    self.audit.emit(AuditEvent::WatchdogPaused {
                        consecutive_failures: tracking.consecutive_failures,
                    });
                }
                Err(err) => {
                    warn!(error = %err, "Watchdog::check_once: could not pause the loop");
                }
            }
        }

        let healthy = snapshot.state != LoopState::Error
            && !alerts.iter().any(|a| a.level == AlertLevel::Critical);

        let metrics = HealthMetrics {
            loop_state: snapshot.state,
            tasks_completed: snapshot.tasks_completed,
            tasks_failed: snapshot.tasks_failed,
            consecutive_failures: tracking.consecutive_failures,
            depths,
            errors_in_window,
            paused_by_watchdog: tracking.paused_by_watchdog,
            healthy,
            alerts,
        };
        tracking.latest = Some(metrics.clone());
        Ok(metrics)
    }

    /// Clear the force-pause latch and the failure streak
    ///
    /// Does not resume the loop; that stays an operator decision.
    pub async fn reset_pause(&self) {
        let mut tracking = self.tracking.lock().await;
        info!("Watchdog::reset_pause: clearing force-pause latch");
        tracking.paused_by_watchdog = false;
        tracking.consecutive_failures = 0;
        self.audit.emit(AuditEvent::WatchdogPauseReset);
    }

    /// Whether the watchdog has force-paused the loop and not been reset
    pub async fn paused_by_watchdog(&self) -> bool {
        self.tracking.lock().await.paused_by_watchdog
    }

    /// Metrics from the most recent check, if any
    pub async fn latest_metrics(&self) -> Option<HealthMetrics> {
        self.tracking.lock().await.latest.clone()
    }
}

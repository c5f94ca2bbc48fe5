//! Control surface over the execution loop
//!
//! `Ralph` owns the spawned loop task and is what the daemon, the CLI and
//! the watchdog talk to: start, stop, pause, resume, status. State and
//! counters live in the shared [`RalphState`] record, so stopping the loop
//! never loses them.

use std::sync::Arc;

use eyre::{Result, bail};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::config::Guardrails;
use super::engine::RalphEngine;
use super::state::{LoopState, RalphState, StatusSnapshot};
use crate::audit::{AuditEvent, AuditLog};

/// Handle to the execution loop
pub struct Ralph {
    engine: Arc<RalphEngine>,
    state: Arc<RalphState>,
    guardrails: Guardrails,
    audit: Arc<AuditLog>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Ralph {
    pub fn new(engine: Arc<RalphEngine>) -> Self {
        let state = engine.state().clone();
        let guardrails = engine.config().guardrails();
        let audit = engine.audit().clone();
        Self {
            engine,
            state,
            guardrails,
            audit,
            worker: Mutex::new(None),
        }
    }

    /// Spawn the loop; errors if it is already running
    pub async fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            bail!("execution loop is already running");
        }

        info!("Ralph::start: spawning execution loop");
        self.state.mark_started();
        self.audit.emit(AuditEvent::LoopStarted);

        let engine = self.engine.clone();
        *worker = Some(tokio::spawn(async move { engine.run().await }));
        Ok(())
    }

    /// Abort the loop task; errors if it is not running
    ///
    /// Counters and the pause flag survive a stop.
    pub async fn stop(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        let Some(handle) = worker.take() else {
            bail!("execution loop is not running");
        };

        info!("Ralph::stop: aborting execution loop");
        handle.abort();
        // Cancelled is the expected way for the loop task to end
        let _ = handle.await;

        self.state.set_current_task(None);
        self.state.set_state(LoopState::Stopped);
        self.audit.emit(AuditEvent::LoopStopped);
        Ok(())
    }

    /// Request a pause at the next task or step boundary
    ///
    /// Never interrupts a step in flight. Idempotent while active.
    pub fn pause(&self) -> Result<()> {
        let state = self.state.state();
        match state {
            LoopState::Running | LoopState::Processing | LoopState::AwaitingApproval | LoopState::Error => {
                self.state.request_pause();
                info!(from = %state, "Ralph::pause: pause requested");
                Ok(())
            }
            LoopState::Paused => {
                debug!("Ralph::pause: already paused");
                Ok(())
            }
            LoopState::Stopped => bail!("cannot pause: execution loop is stopped"),
        }
    }

    /// Clear a pause; errors if no pause is pending or in effect
    pub fn resume(&self) -> Result<()> {
        if self.state.state() != LoopState::Paused && !self.state.pause_requested() {
            bail!("execution loop is not paused");
        }
        info!("Ralph::resume: clearing pause");
        self.state.clear_pause();
        Ok(())
    }

    /// Point-in-time status
    pub fn status(&self) -> StatusSnapshot {
        self.state.snapshot()
    }

    /// The limits the loop runs under
    pub fn guardrails(&self) -> Guardrails {
        self.guardrails
    }

    /// Shared state record (for the watchdog and tests)
    pub fn state(&self) -> &Arc<RalphState> {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::decompose::TaskDecomposer;
    use crate::dispatch::{EchoHandler, HandlerRegistry, StepDispatcher};
    use crate::health::{HealthRegistry, RetryConfig, RetryExecutor};
    use crate::ralph::checkpoint::AutoGate;
    use crate::ralph::config::EngineConfig;
    use crate::source::{MemorySource, TaskSource};
    use crate::domain::Task;
    use std::time::Duration;

    fn build(source: Arc<MemorySource>) -> Ralph {
        let audit = Arc::new(AuditLog::default());
        let recovery = RetryExecutor::new(Arc::new(HealthRegistry::with_defaults(audit.clone())));
        let retry = RetryConfig {
            max_retries: 1,
            base_delay_ms: 1,
            max_delay_ms: 2,
            exponential_base: 2.0,
            jitter: false,
        };
        let registry =
            HandlerRegistry::new().with_fallback(Arc::new(EchoHandler::new(Duration::from_millis(1))));
        let engine = RalphEngine::new(
            Arc::new(RalphState::new()),
            source as Arc<dyn TaskSource>,
            TaskDecomposer::new(recovery, retry),
            StepDispatcher::new(registry, Duration::from_millis(500), audit.clone()),
            Arc::new(AutoGate::new(Duration::from_millis(1))),
            EngineConfig {
                poll_interval_secs: 1,
                ..Default::default()
            },
            audit,
        );
        Ralph::new(Arc::new(engine))
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let ralph = build(Arc::new(MemorySource::new()));
        assert_eq!(ralph.status().state, LoopState::Stopped);

        ralph.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ralph.status().state, LoopState::Running);

        ralph.stop().await.unwrap();
        assert_eq!(ralph.status().state, LoopState::Stopped);
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let ralph = build(Arc::new(MemorySource::new()));
        ralph.start().await.unwrap();
        assert!(ralph.start().await.is_err());
        ralph.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_not_running_is_rejected() {
        let ralph = build(Arc::new(MemorySource::new()));
        assert!(ralph.stop().await.is_err());
    }

    #[tokio::test]
    async fn test_pause_is_rejected_while_stopped() {
        let ralph = build(Arc::new(MemorySource::new()));
        assert!(ralph.pause().is_err());
        assert!(ralph.resume().is_err());
    }

    #[tokio::test]
    async fn test_pause_and_resume_round_trip() {
        let ralph = build(Arc::new(MemorySource::new()));
        ralph.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        ralph.pause().unwrap();
        assert!(ralph.status().pause_requested);

        // The loop parks at its next boundary
        tokio::time::timeout(Duration::from_secs(3), async {
            while ralph.status().state != LoopState::Paused {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        // Pausing again while paused is a no-op
        ralph.pause().unwrap();

        ralph.resume().unwrap();
        assert!(!ralph.status().pause_requested);

        ralph.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_counters_survive_stop_start() {
        let source = Arc::new(MemorySource::new());
        source.push(Task::new("001-a", "A", "- [ ] check the inbox"));
        let ralph = build(source.clone());

        ralph.start().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while source.archived_ids().is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        ralph.stop().await.unwrap();

        assert_eq!(ralph.status().tasks_completed, 1);

        ralph.start().await.unwrap();
        ralph.stop().await.unwrap();
        assert_eq!(ralph.status().tasks_completed, 1);
    }
}

//! Observable loop state
//!
//! The engine is the sole writer of the machine state; the watchdog, the
//! control surface and status reporting all read the same shared record.
//! Counters are process-lifetime and survive stop/start cycles.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::debug;

use crate::domain::now_ms;

/// Execution loop state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Not running
    #[default]
    Stopped,
    /// Running, between tasks
    Running,
    /// Pause requested and honored; waiting for resume
    Paused,
    /// A task is actively executing
    Processing,
    /// Held at a checkpoint boundary
    AwaitingApproval,
    /// Last iteration raised; backing off before retrying
    Error,
}

impl LoopState {
    /// Whether the loop task is live in any form
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Processing => write!(f, "processing"),
            Self::AwaitingApproval => write!(f, "awaiting_approval"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// The task currently owned by the loop, as visible to readers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentTask {
    pub id: String,
    pub title: String,
    pub current_step: usize,
    pub total_steps: usize,
}

/// Point-in-time view of the loop for status consumers
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: LoopState,
    pub pause_requested: bool,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub steps_executed: u64,
    pub started_at: Option<i64>,
    pub last_activity_at: Option<i64>,
    pub current_task: Option<CurrentTask>,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct StateInner {
    state: LoopState,
    started_at: Option<i64>,
    last_activity_at: Option<i64>,
    current_task: Option<CurrentTask>,
    last_error: Option<String>,
}

/// Shared loop state record
#[derive(Default)]
pub struct RalphState {
    inner: RwLock<StateInner>,
    pause_requested: AtomicBool,
    resume: Notify,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    steps_executed: AtomicU64,
}

impl RalphState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current machine state
    pub fn state(&self) -> LoopState {
        self.inner.read().map(|inner| inner.state).unwrap_or_default()
    }

    pub fn set_state(&self, state: LoopState) {
        if let Ok(mut inner) = self.inner.write() {
            debug!(from = %inner.state, to = %state, "RalphState::set_state");
            inner.state = state;
        } else {
            debug!("RalphState::set_state: lock poisoned");
        }
    }

    /// Record loop startup: running, fresh started_at, stale error cleared
    pub fn mark_started(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.state = LoopState::Running;
            inner.started_at = Some(now_ms());
            inner.last_activity_at = Some(now_ms());
            inner.last_error = None;
        }
    }

    /// Record activity for staleness tracking
    pub fn touch(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.last_activity_at = Some(now_ms());
        }
    }

    pub fn set_current_task(&self, task: Option<CurrentTask>) {
        if let Ok(mut inner) = self.inner.write() {
            inner.current_task = task;
            inner.last_activity_at = Some(now_ms());
        }
    }

    /// Advance the visible step cursor of the current task
    pub fn set_progress(&self, current_step: usize) {
        if let Ok(mut inner) = self.inner.write() {
            if let Some(task) = inner.current_task.as_mut() {
                task.current_step = current_step;
            }
            inner.last_activity_at = Some(now_ms());
        }
    }

    pub fn set_last_error(&self, error: impl Into<String>) {
        if let Ok(mut inner) = self.inner.write() {
            inner.last_error = Some(error.into());
        }
    }

    // === Counters (process-lifetime, never reset by stop) ===

    pub fn add_task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_step_executed(&self) {
        self.steps_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed.load(Ordering::Relaxed)
    }

    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.load(Ordering::Relaxed)
    }

    pub fn steps_executed(&self) -> u64 {
        self.steps_executed.load(Ordering::Relaxed)
    }

    // === Pause signal ===

    /// Ask the loop to pause at its next boundary
    pub fn request_pause(&self) {
        debug!("RalphState::request_pause");
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    /// Clear the pause flag and wake any parked loop
    pub fn clear_pause(&self) {
        debug!("RalphState::clear_pause");
        self.pause_requested.store(false, Ordering::SeqCst);
        self.resume.notify_waiters();
    }

    pub fn pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::SeqCst)
    }

    /// Park while the pause flag is set; returns whether a pause happened
    ///
    /// Sets `Paused` for the duration and `Running` on wakeup. Cancellable:
    /// aborting the caller while parked is safe.
    pub async fn wait_if_paused(&self) -> bool {
        if !self.pause_requested() {
            return false;
        }

        self.set_state(LoopState::Paused);
        loop {
            // Register before re-checking so a concurrent clear_pause is
            // never missed
            let resumed = self.resume.notified();
            if !self.pause_requested() {
                break;
            }
            resumed.await;
        }
        self.set_state(LoopState::Running);
        self.touch();
        true
    }

    /// Point-in-time snapshot for status consumers
    pub fn snapshot(&self) -> StatusSnapshot {
        let (state, started_at, last_activity_at, current_task, last_error) =
            if let Ok(inner) = self.inner.read() {
                (
                    inner.state,
                    inner.started_at,
                    inner.last_activity_at,
                    inner.current_task.clone(),
                    inner.last_error.clone(),
                )
            } else {
                debug!("RalphState::snapshot: lock poisoned");
                (LoopState::Stopped, None, None, None, None)
            };

        StatusSnapshot {
            state,
            pause_requested: self.pause_requested(),
            tasks_completed: self.tasks_completed(),
            tasks_failed: self.tasks_failed(),
            steps_executed: self.steps_executed(),
            started_at,
            last_activity_at,
            current_task,
            last_error,
        }
    }
}

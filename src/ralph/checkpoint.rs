//! Checkpoint gates
//!
//! Every N steps the loop parks in `awaiting_approval` and asks its gate
//! for clearance. The gate decides what approval means: a dwell timer for
//! unattended runs, an operator signal for supervised ones. The loop only
//! guarantees it will not advance until the gate returns.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Default dwell before an unattended checkpoint clears
pub const DEFAULT_AUTO_DWELL_MS: u64 = 1_000;

/// Decides when a checkpoint pause may end
#[async_trait]
pub trait CheckpointGate: Send + Sync {
    /// Hold the loop at a checkpoint until cleared
    async fn wait_for_approval(&self, task_id: &str, step: u32);
}

/// Clears checkpoints after a fixed dwell
pub struct AutoGate {
    dwell: Duration,
}

impl AutoGate {
    pub fn new(dwell: Duration) -> Self {
        Self { dwell }
    }
}

impl Default for AutoGate {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_AUTO_DWELL_MS))
    }
}

#[async_trait]
impl CheckpointGate for AutoGate {
    async fn wait_for_approval(&self, task_id: &str, step: u32) {
        debug!(%task_id, step, dwell_ms = self.dwell.as_millis() as u64, "AutoGate: dwelling");
        tokio::time::sleep(self.dwell).await;
    }
}

/// Holds checkpoints until an operator approves
///
/// One approval clears one checkpoint. An approval issued while nothing is
/// parked is banked for the next checkpoint rather than lost.
pub struct ManualGate {
    notify: Notify,
}

impl ManualGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { notify: Notify::new() })
    }

    /// Clear the currently parked checkpoint (or bank one clearance)
    pub fn approve(&self) {
        info!("ManualGate::approve: checkpoint cleared");
        self.notify.notify_one();
    }
}

#[async_trait]
impl CheckpointGate for ManualGate {
    async fn wait_for_approval(&self, task_id: &str, step: u32) {
        info!(%task_id, step, "ManualGate: holding for approval");
        self.notify.notified().await;
    }
}

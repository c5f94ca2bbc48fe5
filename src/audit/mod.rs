//! Audit trail
//!
//! Every significant engine action emits an [`AuditEvent`]: task and step
//! lifecycle, checkpoint pauses, circuit transitions, watchdog actions.
//! Emission is fire-and-forget — the engine never blocks on or fails from
//! the audit path. Events fan out to a broadcast bus for external consumers,
//! mirror to `tracing`, and land in a bounded in-memory ring that backs the
//! watchdog's recent-error queries.

use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Default broadcast channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Default in-memory ring capacity (records)
pub const DEFAULT_RING_CAPACITY: usize = 4_096;

/// The vocabulary of engine activity
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuditEvent {
    // === Loop lifecycle ===
    /// The execution loop started
    LoopStarted,
    /// The execution loop stopped
    LoopStopped,
    /// An iteration of the loop body raised; the loop backs off and retries
    LoopError { message: String },

    // === Task lifecycle ===
    /// A task was claimed from the queue
    TaskStarted { task_id: String, title: String },
    /// A task was decomposed into steps
    TaskDecomposed {
        task_id: String,
        total_steps: usize,
        decomposer: String,
    },
    /// A task finished with every step succeeding
    TaskCompleted { task_id: String, total_steps: usize },
    /// A task was aborted
    TaskFailed { task_id: String, error: String },

    // === Step execution ===
    /// A step attempt began
    StepStarted {
        task_id: String,
        step: u32,
        category: String,
        retry: bool,
    },
    /// A step attempt finished
    StepCompleted {
        task_id: String,
        step: u32,
        category: String,
        result: String,
        duration_ms: u64,
    },
    /// The loop paused at a checkpoint boundary
    CheckpointReached { task_id: String, step: u32 },

    // === Dependency health ===
    /// A tracked dependency changed status
    ServiceStatusChanged {
        service: String,
        from: String,
        to: String,
    },
    /// A circuit opened after sustained failures
    CircuitOpened { service: String, open_until_ms: i64 },
    /// A circuit closed after a successful call
    CircuitClosed { service: String },

    // === Watchdog ===
    /// The watchdog raised an alert
    WatchdogAlert {
        level: String,
        kind: String,
        message: String,
    },
    /// The watchdog force-paused the loop
    WatchdogPaused { consecutive_failures: u32 },
    /// An operator cleared the watchdog pause
    WatchdogPauseReset,
}

impl AuditEvent {
    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            AuditEvent::LoopStarted => "LoopStarted",
            AuditEvent::LoopStopped => "LoopStopped",
            AuditEvent::LoopError { .. } => "LoopError",
            AuditEvent::TaskStarted { .. } => "TaskStarted",
            AuditEvent::TaskDecomposed { .. } => "TaskDecomposed",
            AuditEvent::TaskCompleted { .. } => "TaskCompleted",
            AuditEvent::TaskFailed { .. } => "TaskFailed",
            AuditEvent::StepStarted { .. } => "StepStarted",
            AuditEvent::StepCompleted { .. } => "StepCompleted",
            AuditEvent::CheckpointReached { .. } => "CheckpointReached",
            AuditEvent::ServiceStatusChanged { .. } => "ServiceStatusChanged",
            AuditEvent::CircuitOpened { .. } => "CircuitOpened",
            AuditEvent::CircuitClosed { .. } => "CircuitClosed",
            AuditEvent::WatchdogAlert { .. } => "WatchdogAlert",
            AuditEvent::WatchdogPaused { .. } => "WatchdogPaused",
            AuditEvent::WatchdogPauseReset => "WatchdogPauseReset",
        }
    }

    /// Whether this event counts toward the recent-error tally
    pub fn is_error(&self) -> bool {
        match self {
            AuditEvent::LoopError { .. } | AuditEvent::TaskFailed { .. } | AuditEvent::CircuitOpened { .. } => true,
            AuditEvent::StepCompleted { result, .. } => result == "failure" || result == "timeout",
            _ => false,
        }
    }
}

/// A timestamped audit record as kept in the ring
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Timestamp of the event
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    /// The event
    pub event: AuditEvent,
}

impl AuditRecord {
    /// Create a new record stamped with the current time
    pub fn new(event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Fire-and-forget audit log
///
/// `emit` never blocks and never fails: broadcast sends with no subscribers
/// are dropped, and ring writes are bounded.
pub struct AuditLog {
    tx: broadcast::Sender<AuditRecord>,
    ring: RwLock<VecDeque<AuditRecord>>,
    ring_capacity: usize,
}

impl AuditLog {
    /// Create a new audit log with the given capacities
    pub fn new(channel_capacity: usize, ring_capacity: usize) -> Self {
        debug!(channel_capacity, ring_capacity, "AuditLog::new: called");
        let (tx, _) = broadcast::channel(channel_capacity);
        Self {
            tx,
            ring: RwLock::new(VecDeque::with_capacity(ring_capacity.min(256))),
            ring_capacity,
        }
    }

    /// Emit an event to all subscribers and the ring
    pub fn emit(&self, event: AuditEvent) {
        debug!(event_type = event.event_type(), "AuditLog::emit");
        let record = AuditRecord::new(event);

        if let Ok(mut ring) = self.ring.write() {
            if ring.len() >= self.ring_capacity {
                ring.pop_front();
            }
            ring.push_back(record.clone());
        }

        // Ignore send errors (no subscribers is OK)
        let _ = self.tx.send(record);
    }

    /// Subscribe to receive records emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<AuditRecord> {
        debug!("AuditLog::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Count error events recorded within the trailing window
    pub fn errors_within(&self, window: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(3600));
        let count = self
            .ring
            .read()
            .map(|ring| {
                ring.iter()
                    .rev()
                    .take_while(|r| r.timestamp >= cutoff)
                    .filter(|r| r.event.is_error())
                    .count()
            })
            .unwrap_or(0);
        debug!(count, "AuditLog::errors_within: returning");
        count
    }

    /// Most recent records, newest last, capped at `limit`
    pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        self.ring
            .read()
            .map(|ring| ring.iter().rev().take(limit).rev().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of active broadcast subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY, DEFAULT_RING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let log = AuditLog::default();
        // Must not panic or error with nobody listening
        log.emit(AuditEvent::LoopStarted);
        assert_eq!(log.recent(10).len(), 1);
    }

    #[tokio::test]
    async fn test_emit_and_receive() {
        let log = AuditLog::default();
        let mut rx = log.subscribe();

        log.emit(AuditEvent::TaskStarted {
            task_id: "001-intro".to_string(),
            title: "Intro".to_string(),
        });

        let record = rx.recv().await.unwrap();
        assert_eq!(record.event.event_type(), "TaskStarted");
    }

    #[test]
    fn test_ring_is_bounded() {
        let log = AuditLog::new(16, 3);
        for _ in 0..10 {
            log.emit(AuditEvent::LoopStarted);
        }
        assert_eq!(log.recent(100).len(), 3);
    }

    #[test]
    fn test_errors_within_counts_only_errors() {
        let log = AuditLog::default();

        log.emit(AuditEvent::LoopStarted);
        log.emit(AuditEvent::TaskFailed {
            task_id: "t1".to_string(),
            error: "boom".to_string(),
        });
        log.emit(AuditEvent::StepCompleted {
            task_id: "t1".to_string(),
            step: 1,
            category: "process".to_string(),
            result: "timeout".to_string(),
            duration_ms: 300_000,
        });
        log.emit(AuditEvent::StepCompleted {
            task_id: "t1".to_string(),
            step: 2,
            category: "process".to_string(),
            result: "success".to_string(),
            duration_ms: 12,
        });
        log.emit(AuditEvent::LoopError {
            message: "source unreachable".to_string(),
        });

        assert_eq!(log.errors_within(Duration::from_secs(3600)), 3);
    }

    #[test]
    fn test_event_serialization_tagged() {
        let event = AuditEvent::CircuitOpened {
            service: "decomposer".to_string(),
            open_until_ms: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"CircuitOpened\""));

        let parsed: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type(), "CircuitOpened");
        assert!(parsed.is_error());
    }

    #[test]
    fn test_watchdog_events_not_errors() {
        let paused = AuditEvent::WatchdogPaused {
            consecutive_failures: 5,
        };
        assert!(!paused.is_error());
        assert_eq!(paused.event_type(), "WatchdogPaused");
    }
}

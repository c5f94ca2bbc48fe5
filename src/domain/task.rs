//! Task domain type
//!
//! One unit of work pulled from the queue. The engine owns the current task
//! exclusively while processing; at most one task is current at any time.

use serde::{Deserialize, Serialize};

use super::now_ms;
use super::step::Step;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue
    #[default]
    Pending,
    /// Actively being executed by the engine
    Processing,
    /// All steps succeeded
    Completed,
    /// Aborted after a step failure, guardrail, or decomposition error
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One unit of work pulled from the task queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Identifier derived from the source location (e.g. file stem)
    pub id: String,

    /// Short title for display
    pub title: String,

    /// Raw task text as found at the source
    pub content: String,

    /// Current status
    pub status: TaskStatus,

    /// Ordered steps produced by decomposition
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Index of the step currently executing (0-based into `steps`)
    pub current_step: usize,

    /// Total step count, fixed at decomposition time
    pub total_steps: usize,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// When processing began (Unix milliseconds)
    pub started_at: Option<i64>,

    /// When processing finished, success or failure (Unix milliseconds)
    pub completed_at: Option<i64>,

    /// Last error message (if any)
    pub last_error: Option<String>,
}

impl Task {
    /// Create a new pending task
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            status: TaskStatus::Pending,
            steps: Vec::new(),
            current_step: 0,
            total_steps: 0,
            created_at: now_ms(),
            started_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    /// Attach decomposed steps, resetting progress tracking
    pub fn set_steps(&mut self, steps: Vec<Step>) {
        self.total_steps = steps.len();
        self.steps = steps;
        self.current_step = 0;
    }

    /// Advance the current-step cursor
    pub fn set_current_step(&mut self, index: usize) {
        self.current_step = index;
    }

    /// Transition to processing
    pub fn begin(&mut self) {
        self.status = TaskStatus::Processing;
        self.started_at = Some(now_ms());
    }

    /// Mark the task completed
    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now_ms());
    }

    /// Mark the task failed with a human-readable error
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(now_ms());
        self.last_error = Some(error.into());
    }

    /// Whether the task has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }
}

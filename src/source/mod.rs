//! Task sources
//!
//! Where the loop finds work and where finished work goes. Sources are
//! externally synchronized: artifacts may vanish between calls, and the
//! engine treats "already moved" as a benign race rather than an error.

mod dir;
mod memory;

pub use dir::{APPROVAL_DIR, ARCHIVE_DIR, DirSource, FAILED_DIR, INBOX_DIR, PROCESSING_DIR};
pub use memory::MemorySource;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::Task;

/// Error types for task source operations
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of moving a task artifact out of the active queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// The artifact was moved
    Archived,
    /// The artifact was already gone
    NotFound,
}

/// Point-in-time queue depths
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    pub pending: usize,
    pub awaiting_approval: usize,
    pub in_progress: usize,
}

/// A queue the loop can pull tasks from
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Claim the next eligible task, in lexicographic id order
    async fn next_eligible(&self) -> Result<Option<Task>, SourceError>;

    /// Raw content of a task still in the queue
    async fn read_content(&self, task_id: &str) -> Result<String, SourceError>;

    /// Move a completed task's artifact to the archive
    ///
    /// An already-missing artifact reports [`ArchiveOutcome::NotFound`]
    /// instead of erroring.
    async fn archive(&self, task_id: &str) -> Result<ArchiveOutcome, SourceError>;

    /// Set a failed task's artifact aside for inspection
    async fn fail(&self, task_id: &str) -> Result<ArchiveOutcome, SourceError>;

    /// Queue depths for supervision thresholds
    async fn depths(&self) -> Result<QueueDepths, SourceError>;
}

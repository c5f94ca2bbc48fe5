//! In-memory task source
//!
//! Backs tests and embedded deployments where no queue directory exists.
//! Same claim/archive semantics as [`super::DirSource`], minus the files.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{ArchiveOutcome, QueueDepths, SourceError, TaskSource};
use crate::domain::Task;

#[derive(Default)]
struct Inner {
    pending: Vec<Task>,
    processing: Vec<Task>,
    archived: Vec<String>,
    failed: Vec<String>,
    awaiting_approval: usize,
}

/// Task queue held entirely in memory
#[derive(Default)]
pub struct MemorySource {
    inner: Mutex<Inner>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pending task
    pub fn push(&self, task: Task) {
        if let Ok(mut inner) = self.lock() {
            inner.pending.push(task);
            inner.pending.sort_by(|a, b| a.id.cmp(&b.id));
        }
    }

    /// Pretend some tasks are parked for approval
    pub fn set_awaiting_approval(&self, count: usize) {
        if let Ok(mut inner) = self.lock() {
            inner.awaiting_approval = count;
        }
    }

    /// Ids archived so far, in archive order
    pub fn archived_ids(&self) -> Vec<String> {
        self.lock().map(|inner| inner.archived.clone()).unwrap_or_default()
    }

    /// Ids failed so far, in failure order
    pub fn failed_ids(&self) -> Vec<String> {
        self.lock().map(|inner| inner.failed.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, SourceError> {
        self.inner
            .lock()
            .map_err(|_| SourceError::Unavailable("memory source lock poisoned".to_string()))
    }
}

#[async_trait]
impl TaskSource for MemorySource {
    async fn next_eligible(&self) -> Result<Option<Task>, SourceError> {
        let mut inner = self.lock()?;
        if inner.pending.is_empty() {
            return Ok(None);
        }
        let task = inner.pending.remove(0);
        inner.processing.push(task.clone());
        Ok(Some(task))
    }

    async fn read_content(&self, task_id: &str) -> Result<String, SourceError> {
        let inner = self.lock()?;
        inner
            .processing
            .iter()
            .chain(inner.pending.iter())
            .find(|t| t.id == task_id)
            .map(|t| t.content.clone())
            .ok_or_else(|| SourceError::NotFound(task_id.to_string()))
    }

    async fn archive(&self, task_id: &str) -> Result<ArchiveOutcome, SourceError> {
        let mut inner = self.lock()?;
        match inner.processing.iter().position(|t| t.id == task_id) {
            Some(index) => {
                inner.processing.remove(index);
                inner.archived.push(task_id.to_string());
                Ok(ArchiveOutcome::Archived)
            }
            None => Ok(ArchiveOutcome::NotFound),
        }
    }

    async fn fail(&self, task_id: &str) -> Result<ArchiveOutcome, SourceError> {
        let mut inner = self.lock()?;
        match inner.processing.iter().position(|t| t.id == task_id) {
            Some(index) => {
                inner.processing.remove(index);
                inner.failed.push(task_id.to_string());
                Ok(ArchiveOutcome::Archived)
            }
            None => Ok(ArchiveOutcome::NotFound),
        }
    }

    async fn depths(&self) -> Result<QueueDepths, SourceError> {
        let inner = self.lock()?;
        Ok(QueueDepths {
            pending: inner.pending.len(),
            awaiting_approval: inner.awaiting_approval,
            in_progress: inner.processing.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> Task {
        Task::new(id, id, format!("# {id}\n- [ ] work\n"))
    }

    #[tokio::test]
    async fn test_claim_order_is_lexicographic() {
        let source = MemorySource::new();
        source.push(task("b"));
        source.push(task("a"));

        assert_eq!(source.next_eligible().await.unwrap().unwrap().id, "a");
        assert_eq!(source.next_eligible().await.unwrap().unwrap().id, "b");
        assert!(source.next_eligible().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_archive_and_fail_track_ids() {
        let source = MemorySource::new();
        source.push(task("a"));
        source.push(task("b"));

        let first = source.next_eligible().await.unwrap().unwrap();
        source.archive(&first.id).await.unwrap();

        let second = source.next_eligible().await.unwrap().unwrap();
        source.fail(&second.id).await.unwrap();

        assert_eq!(source.archived_ids(), vec!["a".to_string()]);
        assert_eq!(source.failed_ids(), vec!["b".to_string()]);
        assert_eq!(source.archive("a").await.unwrap(), ArchiveOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_depths_reflect_queue_movement() {
        let source = MemorySource::new();
        source.push(task("a"));
        source.push(task("b"));
        source.set_awaiting_approval(3);

        source.next_eligible().await.unwrap();

        let depths = source.depths().await.unwrap();
        assert_eq!(depths.pending, 1);
        assert_eq!(depths.in_progress, 1);
        assert_eq!(depths.awaiting_approval, 3);
    }

    #[tokio::test]
    async fn test_read_content_by_id() {
        let source = MemorySource::new();
        source.push(task("a"));

        assert!(source.read_content("a").await.unwrap().contains("work"));
        assert!(matches!(
            source.read_content("zzz").await,
            Err(SourceError::NotFound(_))
        ));
    }
}

//! Folder-backed task queue
//!
//! Layout under the queue root:
//!
//! ```text
//! inbox/        pending tasks, one markdown file each
//! processing/   the claimed task while the loop owns it
//! approval/     tasks parked for human approval
//! archive/      completed tasks
//! failed/       failed tasks, kept for inspection
//! ```
//!
//! Claiming renames `inbox/<file>` to `processing/<file>`, so a crash
//! leaves the artifact in `processing/` for startup recovery instead of
//! losing it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{ArchiveOutcome, QueueDepths, SourceError, TaskSource};
use crate::domain::Task;

pub const INBOX_DIR: &str = "inbox";
pub const PROCESSING_DIR: &str = "processing";
pub const APPROVAL_DIR: &str = "approval";
pub const ARCHIVE_DIR: &str = "archive";
pub const FAILED_DIR: &str = "failed";

const TASK_EXT: &str = ".md";

/// Task queue over a directory tree
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(?root, "DirSource::new: called");
        Self { root }
    }

    /// Queue root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the queue directory layout. Idempotent.
    pub async fn init(&self) -> Result<(), SourceError> {
        for dir in [INBOX_DIR, PROCESSING_DIR, APPROVAL_DIR, ARCHIVE_DIR, FAILED_DIR] {
            tokio::fs::create_dir_all(self.dir(dir)).await?;
        }
        debug!(root = ?self.root, "DirSource::init: layout ready");
        Ok(())
    }

    /// Move leftovers of a crashed run from `processing/` back to `inbox/`
    ///
    /// Returns how many artifacts were requeued.
    pub async fn recover(&self) -> Result<usize, SourceError> {
        let mut recovered = 0;
        for name in self.entries(PROCESSING_DIR).await? {
            let src = self.dir(PROCESSING_DIR).join(&name);
            let dst = self.dir(INBOX_DIR).join(&name);
            match tokio::fs::rename(&src, &dst).await {
                Ok(()) => {
                    info!(%name, "DirSource::recover: requeued stuck task");
                    recovered += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(recovered)
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Sorted task file names in one queue directory
    async fn entries(&self, dir: &str) -> Result<Vec<String>, SourceError> {
        let path = self.dir(dir);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.ends_with(TASK_EXT) && !name.starts_with('.') {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Move a task file between queue directories
    async fn shift(&self, task_id: &str, from: &str, to: &str) -> Result<ArchiveOutcome, SourceError> {
        let file = format!("{task_id}{TASK_EXT}");
        let src = self.dir(from).join(&file);
        let dst = self.dir(to).join(&file);
        match tokio::fs::rename(&src, &dst).await {
            Ok(()) => {
                debug!(%task_id, from, to, "DirSource::shift: moved");
                Ok(ArchiveOutcome::Archived)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(%task_id, from, to, "DirSource::shift: already gone");
                Ok(ArchiveOutcome::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// First markdown heading, else the file stem
    fn title_from(content: &str, stem: &str) -> String {
        content
            .lines()
            .find_map(|line| line.trim().strip_prefix("# "))
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| stem.to_string())
    }
}

#[async_trait]
impl TaskSource for DirSource {
    async fn next_eligible(&self) -> Result<Option<Task>, SourceError> {
        for name in self.entries(INBOX_DIR).await? {
            let src = self.dir(INBOX_DIR).join(&name);
            let dst = self.dir(PROCESSING_DIR).join(&name);

            // Claim by rename; a vanished file means something else took it
            match tokio::fs::rename(&src, &dst).await {
                Ok(()) => {
                    let stem = name.strip_suffix(TASK_EXT).unwrap_or(&name);
                    let content = tokio::fs::read_to_string(&dst).await?;
                    let title = Self::title_from(&content, stem);
                    info!(task_id = %stem, %title, "DirSource::next_eligible: claimed task");
                    return Ok(Some(Task::new(stem, title, content)));
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    async fn read_content(&self, task_id: &str) -> Result<String, SourceError> {
        let file = format!("{task_id}{TASK_EXT}");
        for dir in [PROCESSING_DIR, INBOX_DIR, APPROVAL_DIR] {
            match tokio::fs::read_to_string(self.dir(dir).join(&file)).await {
                Ok(content) => return Ok(content),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(SourceError::NotFound(task_id.to_string()))
    }

    async fn archive(&self, task_id: &str) -> Result<ArchiveOutcome, SourceError> {
        self.shift(task_id, PROCESSING_DIR, ARCHIVE_DIR).await
    }

    async fn fail(&self, task_id: &str) -> Result<ArchiveOutcome, SourceError> {
        self.shift(task_id, PROCESSING_DIR, FAILED_DIR).await
    }

    async fn depths(&self) -> Result<QueueDepths, SourceError> {
        Ok(QueueDepths {
            pending: self.entries(INBOX_DIR).await?.len(),
            awaiting_approval: self.entries(APPROVAL_DIR).await?.len(),
            in_progress: self.entries(PROCESSING_DIR).await?.len(),
        })
    }
}

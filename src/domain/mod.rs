//! Domain types
//!
//! Core domain types: Task and the Steps it decomposes into.
//! Tasks are owned by the task source before and after processing;
//! the engine owns the current task exclusively while it runs.

mod step;
mod task;

pub use step::{Step, StepCategory, StepResult};
pub use task::{Task, TaskStatus};

/// Current wall-clock time in Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

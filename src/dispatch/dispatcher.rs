//! Step dispatch
//!
//! Routes a step to its category handler under a hard timeout and records
//! the attempt on the step itself. A timeout is an outcome, not an error:
//! the step is marked `timeout` and the loop moves on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::handler::{HandlerRegistry, StepContext};
use crate::audit::{AuditEvent, AuditLog};
use crate::domain::{Step, StepResult};

/// Hard ceiling on a single step attempt
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

/// Executes single step attempts against the handler registry
pub struct StepDispatcher {
    registry: HandlerRegistry,
    step_timeout: Duration,
    audit: Arc<AuditLog>,
}

impl StepDispatcher {
    pub fn new(registry: HandlerRegistry, step_timeout: Duration, audit: Arc<AuditLog>) -> Self {
        debug!(?step_timeout, "StepDispatcher::new: called");
        Self {
            registry,
            step_timeout,
            audit,
        }
    }

    /// Execute one attempt of `step`, recording outcome, output and timing
    ///
    /// `retry` flags a second attempt of the same step so consumers of the
    /// audit trail can tell correction attempts from first tries.
    pub async fn dispatch(&self, ctx: &StepContext, step: &mut Step, retry: bool) -> StepResult {
        let handler = self.registry.resolve(step.category);

        step.begin();
        self.audit.emit(AuditEvent::StepStarted {
            task_id: ctx.task_id.clone(),
            step: step.number,
            category: step.category.to_string(),
            retry,
        });

        let started = Instant::now();
        let attempt = tokio::time::timeout(self.step_timeout, handler.handle(step, ctx)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match attempt {
            Ok(outcome) if !outcome.is_error => {
                step.set_output(outcome.content);
                StepResult::Success
            }
            Ok(outcome) => {
                warn!(task_id = %ctx.task_id, step = step.number, error = %outcome.content, "step failed");
                step.set_error(outcome.content);
                StepResult::Failure
            }
            Err(_) => {
                warn!(
                    task_id = %ctx.task_id,
                    step = step.number,
                    timeout_secs = self.step_timeout.as_secs(),
                    "step timed out"
                );
                step.set_error(format!(
                    "timed out after {}s",
                    self.step_timeout.as_secs()
                ));
                StepResult::Timeout
            }
        };

        step.finish(result, duration_ms);
        self.audit.emit(AuditEvent::StepCompleted {
            task_id: ctx.task_id.clone(),
            step: step.number,
            category: step.category.to_string(),
            result: result.to_string(),
            duration_ms,
        });

        result
    }
}

//! The supervisory execution loop
//!
//! One long-lived task runs [`RalphEngine::run`]: claim the next task from
//! the source, decompose it, execute steps in order under the guardrails,
//! checkpoint every N steps, self-correct failed steps once, finalize.
//! Task-level failures feed counters and move on; loop-level errors back
//! off and retry. Nothing in here may take the process down.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::checkpoint::CheckpointGate;
use super::config::EngineConfig;
use super::state::{CurrentTask, LoopState, RalphState};
use crate::audit::{AuditEvent, AuditLog};
use crate::decompose::TaskDecomposer;
use crate::dispatch::{StepContext, StepDispatcher};
use crate::domain::Task;
use crate::source::{ArchiveOutcome, SourceError, TaskSource};

/// The execution loop
pub struct RalphEngine {
    state: Arc<RalphState>,
    source: Arc<dyn TaskSource>,
    decomposer: TaskDecomposer,
    dispatcher: StepDispatcher,
    gate: Arc<dyn CheckpointGate>,
    config: EngineConfig,
    audit: Arc<AuditLog>,
}

impl RalphEngine {
    pub fn new(
        state: Arc<RalphState>,
        source: Arc<dyn TaskSource>,
        decomposer: TaskDecomposer,
        dispatcher: StepDispatcher,
        gate: Arc<dyn CheckpointGate>,
        config: EngineConfig,
        audit: Arc<AuditLog>,
    ) -> Self {
        debug!(?config, "RalphEngine::new: called");
        Self {
            state,
            source,
            decomposer,
            dispatcher,
            gate,
            config,
            audit,
        }
    }

    /// Shared state record (for the control surface and watchdog)
    pub fn state(&self) -> &Arc<RalphState> {
        &self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Run the loop until the owning task is aborted
    ///
    /// Every suspension point in here is a plain await, so aborting the
    /// spawned future stops the loop promptly (an in-flight handler dies
    /// with its timeout).
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            max_steps_per_task = self.config.max_steps_per_task,
            "RalphEngine::run: loop started"
        );

        loop {
            // Pause takes effect here, between tasks
            self.state.wait_if_paused().await;

            match self.iterate().await {
                Ok(true) => {
                    // Processed a task; look for the next one immediately
                }
                Ok(false) => {
                    tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
                }
                Err(error) => {
                    warn!(%error, "loop iteration failed; backing off");
                    self.state.set_state(LoopState::Error);
                    self.state.set_last_error(error.to_string());
                    self.audit.emit(AuditEvent::LoopError {
                        message: error.to_string(),
                    });
                    tokio::time::sleep(Duration::from_secs(self.config.error_backoff_secs)).await;
                    self.state.set_state(LoopState::Running);
                }
            }
        }
    }

    /// One loop iteration: claim and process a task if one is eligible
    async fn iterate(&self) -> Result<bool, SourceError> {
        match self.source.next_eligible().await? {
            Some(task) => {
                self.process_task(task).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Process one task to completion or failure
    ///
    /// Never errors: every outcome is recorded on the task and the shared
    /// state. Returns the finalized task.
    pub async fn process_task(&self, mut task: Task) -> Task {
        info!(task_id = %task.id, title = %task.title, "processing task");
        self.state.set_state(LoopState::Processing);
        self.state.set_current_task(Some(CurrentTask {
            id: task.id.clone(),
            title: task.title.clone(),
            current_step: 0,
            total_steps: 0,
        }));
        self.audit.emit(AuditEvent::TaskStarted {
            task_id: task.id.clone(),
            title: task.title.clone(),
        });
        task.begin();

        let decomposition = self.decomposer.decompose(&task.content).await;
        let origin = decomposition.origin;
        task.set_steps(decomposition.steps);
        self.state.set_current_task(Some(CurrentTask {
            id: task.id.clone(),
            title: task.title.clone(),
            current_step: 0,
            total_steps: task.total_steps,
        }));
        self.audit.emit(AuditEvent::TaskDecomposed {
            task_id: task.id.clone(),
            total_steps: task.total_steps,
            decomposer: origin.to_string(),
        });

        let failure = self.execute_steps(&mut task).await;
        self.finalize(&mut task, failure).await;

        self.state.set_current_task(None);
        self.state.set_state(LoopState::Running);
        task
    }

    /// Execute the task's steps in order; Some(error) aborts the task
    async fn execute_steps(&self, task: &mut Task) -> Option<String> {
        let ctx = StepContext::for_task(task);
        let checkpoint_every = self.config.checkpoint_every() as usize;

        for index in 0..task.steps.len() {
            // Guardrail: a runaway decomposition fails the task, not the loop
            if index >= self.config.max_steps_per_task {
                warn!(
                    task_id = %task.id,
                    total_steps = task.total_steps,
                    limit = self.config.max_steps_per_task,
                    "guardrail exceeded"
                );
                return Some(format!(
                    "guardrail exceeded: {} steps, limit is {}",
                    task.total_steps, self.config.max_steps_per_task
                ));
            }

            // A requested pause lands between steps, never mid-step
            if self.state.wait_if_paused().await {
                self.state.set_state(LoopState::Processing);
            }

            if index > 0 && index % checkpoint_every == 0 {
                self.checkpoint(&task.id, task.steps[index].number).await;
            }

            task.set_current_step(index);
            self.state.set_progress(index);

            let step = &mut task.steps[index];
            let mut result = self.dispatcher.dispatch(&ctx, step, false).await;
            self.state.add_step_executed();

            if !result.is_success() {
                // Exactly one self-correction attempt of the same step
                warn!(
                    task_id = %task.id,
                    step = step.number,
                    %result,
                    "step did not succeed; attempting self-correction"
                );
                result = self.dispatcher.dispatch(&ctx, step, true).await;
                self.state.add_step_executed();
            }

            if !result.is_success() {
                return Some(format!(
                    "step {} failed after self-correction: {}",
                    step.number,
                    step.error.as_deref().unwrap_or("no error recorded")
                ));
            }
        }

        None
    }

    /// Park at a checkpoint until the gate clears it
    async fn checkpoint(&self, task_id: &str, step: u32) {
        info!(%task_id, step, "checkpoint reached; awaiting approval");
        self.state.set_state(LoopState::AwaitingApproval);
        self.audit.emit(AuditEvent::CheckpointReached {
            task_id: task_id.to_string(),
            step,
        });
        self.gate.wait_for_approval(task_id, step).await;
        self.state.set_state(LoopState::Processing);
        self.state.touch();
    }

    /// Record the terminal outcome and move the artifact out of the queue
    async fn finalize(&self, task: &mut Task, failure: Option<String>) {
        match failure {
            None => {
                task.complete();
                self.state.add_task_completed();
                info!(task_id = %task.id, total_steps = task.total_steps, "task completed");
                self.audit.emit(AuditEvent::TaskCompleted {
                    task_id: task.id.clone(),
                    total_steps: task.total_steps,
                });
                self.put_away(&task.id, true).await;
            }
            Some(error) => {
                task.fail(&error);
                self.state.add_task_failed();
                self.state.set_last_error(&error);
                warn!(task_id = %task.id, %error, "task failed");
                self.audit.emit(AuditEvent::TaskFailed {
                    task_id: task.id.clone(),
                    error,
                });
                self.put_away(&task.id, false).await;
            }
        }
    }

    /// Archive or set aside the task artifact, tolerating races
    ///
    /// A missing artifact means something else already moved it — benign.
    /// An IO failure leaves it in place for startup recovery.
    async fn put_away(&self, task_id: &str, completed: bool) {
        let outcome = if completed {
            self.source.archive(task_id).await
        } else {
            self.source.fail(task_id).await
        };

        match outcome {
            Ok(ArchiveOutcome::Archived) => {}
            Ok(ArchiveOutcome::NotFound) => {
                debug!(%task_id, "task artifact already moved");
            }
            Err(error) => {
                warn!(%task_id, %error, "could not move task artifact; leaving it for recovery");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::decompose::TaskDecomposer;
    use crate::dispatch::{EchoHandler, HandlerOutcome, HandlerRegistry, StepHandler};
    use crate::domain::{StepCategory, StepResult, TaskStatus};
    use crate::health::{HealthRegistry, RetryConfig, RetryExecutor};
    use crate::ralph::checkpoint::AutoGate;
    use crate::source::MemorySource;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` attempts, then succeeds
    struct FlakyHandler {
        category: StepCategory,
        failures: AtomicU32,
    }

    impl FlakyHandler {
        fn new(category: StepCategory, failures: u32) -> Self {
            Self {
                category,
                failures: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl StepHandler for FlakyHandler {
        fn category(&self) -> StepCategory {
            self.category
        }

        async fn handle(&self, _step: &crate::domain::Step, _ctx: &StepContext) -> HandlerOutcome {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                HandlerOutcome::error("transient failure")
            } else {
                HandlerOutcome::success("recovered")
            }
        }
    }

    struct Harness {
        engine: RalphEngine,
        source: Arc<MemorySource>,
        audit: Arc<AuditLog>,
    }

    fn harness(registry: HandlerRegistry, config: EngineConfig) -> Harness {
        let audit = Arc::new(AuditLog::default());
        let health = Arc::new(HealthRegistry::with_defaults(audit.clone()));
        let recovery = RetryExecutor::new(health);
        let retry = RetryConfig {
            max_retries: 1,
            base_delay_ms: 1,
            max_delay_ms: 2,
            exponential_base: 2.0,
            jitter: false,
        };
        let source = Arc::new(MemorySource::new());
        let registry = if registry.categories().is_empty() {
            registry.with_fallback(Arc::new(EchoHandler::new(Duration::from_millis(1))))
        } else {
            registry
        };
        let dispatcher = StepDispatcher::new(registry, Duration::from_millis(500), audit.clone());
        let engine = RalphEngine::new(
            Arc::new(RalphState::new()),
            source.clone(),
            TaskDecomposer::new(recovery, retry),
            dispatcher,
            Arc::new(AutoGate::new(Duration::from_millis(1))),
            config,
            audit.clone(),
        );
        Harness { engine, source, audit }
    }

    async fn claim(source: &MemorySource, task: Task) -> Task {
        source.push(task);
        source.next_eligible().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_task_with_all_steps_succeeding_is_completed_and_archived() {
        let h = harness(HandlerRegistry::new(), EngineConfig::default());
        let task = claim(
            &h.source,
            Task::new("001-morning", "Morning", "- [ ] email the board\n- [ ] tweet the update"),
        )
        .await;

        let done = h.engine.process_task(task).await;

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.total_steps, 2);
        assert!(done.steps.iter().all(|s| s.succeeded()));
        assert_eq!(h.source.archived_ids(), vec!["001-morning".to_string()]);
        assert_eq!(h.engine.state().tasks_completed(), 1);
        assert_eq!(h.engine.state().steps_executed(), 2);
        assert_eq!(h.engine.state().state(), LoopState::Running);
        assert!(h.engine.state().snapshot().current_task.is_none());
    }

    #[tokio::test]
    async fn test_one_flake_is_self_corrected() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(FlakyHandler::new(StepCategory::Email, 1)));
        let h = harness(registry, EngineConfig::default());

        let task = claim(&h.source, Task::new("t", "T", "- [ ] email the board")).await;
        let done = h.engine.process_task(task).await;

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.steps[0].result, Some(StepResult::Success));
        // First attempt + self-correction
        assert_eq!(h.engine.state().steps_executed(), 2);
        assert_eq!(h.engine.state().tasks_failed(), 0);
    }

    #[tokio::test]
    async fn test_double_failure_fails_the_task() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(FlakyHandler::new(StepCategory::Email, 10)));
        let h = harness(registry, EngineConfig::default());

        let task = claim(
            &h.source,
            Task::new("t", "T", "- [ ] email the board\n- [ ] tweet the update"),
        )
        .await;
        let done = h.engine.process_task(task).await;

        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done.last_error.as_deref().unwrap().contains("step 1"));
        // Step 2 never ran
        assert!(done.steps[1].result.is_none());
        assert_eq!(h.engine.state().steps_executed(), 2);
        assert_eq!(h.engine.state().tasks_failed(), 1);
        assert_eq!(h.source.failed_ids(), vec!["t".to_string()]);
        assert_eq!(h.engine.state().snapshot().last_error.unwrap().contains("self-correction"), true);
    }

    #[tokio::test]
    async fn test_guardrail_aborts_oversized_task() {
        let config = EngineConfig {
            max_steps_per_task: 3,
            ..Default::default()
        };
        let h = harness(HandlerRegistry::new(), config);

        let content = (1..=4).map(|i| format!("- [ ] step number {i}")).collect::<Vec<_>>().join("\n");
        let task = claim(&h.source, Task::new("big", "Big", content)).await;
        let done = h.engine.process_task(task).await;

        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done.last_error.as_deref().unwrap().contains("guardrail"));
        // Exactly the allowed steps ran
        assert_eq!(h.engine.state().steps_executed(), 3);
        assert!(done.steps[3].result.is_none());
    }

    #[tokio::test]
    async fn test_checkpoints_fire_every_interval() {
        let config = EngineConfig {
            checkpoint_interval: 2,
            ..Default::default()
        };
        let h = harness(HandlerRegistry::new(), config);

        // 2 * interval + 1 steps must checkpoint at least twice
        let content = (1..=5).map(|i| format!("{i}. step number {i}")).collect::<Vec<_>>().join("\n");
        let task = claim(&h.source, Task::new("cp", "Checkpoints", content)).await;
        let done = h.engine.process_task(task).await;

        assert_eq!(done.status, TaskStatus::Completed);
        let checkpoints = h
            .audit
            .recent(64)
            .into_iter()
            .filter(|r| r.event.event_type() == "CheckpointReached")
            .count();
        assert_eq!(checkpoints, 2);
    }

    #[tokio::test]
    async fn test_prose_task_runs_as_single_process_step() {
        let h = harness(HandlerRegistry::new(), EngineConfig::default());
        let task = claim(&h.source, Task::new("p", "Prose", "ponder the quarterly numbers")).await;
        let done = h.engine.process_task(task).await;

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.total_steps, 1);
        assert_eq!(done.steps[0].category, StepCategory::Process);
    }

    #[tokio::test]
    async fn test_audit_trail_covers_task_lifecycle() {
        let h = harness(HandlerRegistry::new(), EngineConfig::default());
        let task = claim(&h.source, Task::new("a", "A", "- [ ] check the inbox")).await;
        h.engine.process_task(task).await;

        let kinds: Vec<_> = h.audit.recent(64).into_iter().map(|r| r.event.event_type()).collect();
        for expected in ["TaskStarted", "TaskDecomposed", "StepStarted", "StepCompleted", "TaskCompleted"] {
            assert!(kinds.contains(&expected), "missing {expected} in {kinds:?}");
        }
    }
}

//! Task decomposition
//!
//! An external decomposition service (an LLM planner, typically) gets the
//! first shot, guarded by the retry executor so a flaky planner cannot stall
//! the loop. Anything short of a usable step list falls back to the rule
//! table. Decomposition itself never fails.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::rules;
use crate::domain::{Step, StepCategory};
use crate::health::{RetryConfig, RetryExecutor};

/// Service name the decomposer is tracked under in the health registry
pub const DECOMPOSER_SERVICE: &str = "decomposer";

/// A step proposed by an external decomposition service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedStep {
    pub description: String,
    /// Category label; anything outside the known set lands on `process`
    #[serde(default)]
    pub category: Option<String>,
}

impl PlannedStep {
    pub fn new(description: impl Into<String>, category: Option<&str>) -> Self {
        Self { description: description.into(), category: category.map(String::from) }
    }
}

/// Errors an external decomposition service can produce
#[derive(Debug, Error)]
pub enum DecomposeError {
    #[error("decomposition service unavailable: {0}")]
    Unavailable(String),

    #[error("decomposition service returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// External decomposition boundary
#[async_trait]
pub trait DecompositionService: Send + Sync {
    async fn decompose(&self, task_text: &str) -> Result<Vec<PlannedStep>, DecomposeError>;
}

/// Which path produced a decomposition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecomposerKind {
    External,
    Rules,
}

impl std::fmt::Display for DecomposerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::External => write!(f, "external"),
            Self::Rules => write!(f, "rules"),
        }
    }
}

/// A decomposition result: ordered steps plus the path that produced them
#[derive(Debug, Clone)]
pub struct Decomposition {
    pub steps: Vec<Step>,
    pub origin: DecomposerKind,
}

/// Turns raw task text into an ordered list of steps
pub struct TaskDecomposer {
    service: Option<Arc<dyn DecompositionService>>,
    recovery: RetryExecutor,
    retry: RetryConfig,
}

impl TaskDecomposer {
    /// Rule-based decomposer with no external service
    pub fn new(recovery: RetryExecutor, retry: RetryConfig) -> Self {
        Self { service: None, recovery, retry }
    }

    /// Attach an external decomposition service
    pub fn with_service(mut self, service: Arc<dyn DecompositionService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Decompose task text into steps, numbered densely from 1
    pub async fn decompose(&self, text: &str) -> Decomposition {
        if let Some(service) = &self.service {
            let result = self
                .recovery
                .with_retry(DECOMPOSER_SERVICE, &self.retry, || {
                    let service = service.clone();
                    async move { service.decompose(text).await }
                })
                .await;

            match result {
                Ok(planned) => {
                    let steps = Self::from_planned(planned);
                    if steps.is_empty() {
                        debug!("TaskDecomposer::decompose: external service returned no usable steps, falling back to rules");
                    } else {
                        return Decomposition { steps, origin: DecomposerKind::External };
                    }
                }
                Err(err) if err.is_circuit_open() => {
                    debug!("TaskDecomposer::decompose: decomposer circuit open, falling back to rules");
                }
                Err(err) => {
                    warn!(error = %err, "TaskDecomposer::decompose: external decomposition failed, falling back to rules");
                }
            }
        }

        Decomposition { steps: rules::parse_steps(text), origin: DecomposerKind::Rules }
    }

    /// Convert planned steps to domain steps: blank descriptions dropped,
    /// category labels validated, numbering made dense
    fn from_planned(planned: Vec<PlannedStep>) -> Vec<Step> {
        planned
            .into_iter()
            .filter(|p| !p.description.trim().is_empty())
            .enumerate()
            .map(|(i, p)| {
                let category = p
                    .category
                    .as_deref()
                    .and_then(StepCategory::from_label)
                    .unwrap_or_default();
                Step::new(i as u32 + 1, category, p.description.trim())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::health::HealthRegistry;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetryConfig {
        RetryConfig { max_retries: 1, base_delay_ms: 1, max_delay_ms: 2, exponential_base: 2.0, jitter: false }
    }

    fn executor() -> RetryExecutor {
        let audit = Arc::new(AuditLog::new(16, 16));
        RetryExecutor::new(Arc::new(HealthRegistry::with_defaults(audit)))
    }

    struct ScriptedService {
        calls: AtomicU32,
        response: Result<Vec<PlannedStep>, String>,
    }

    impl ScriptedService {
        fn ok(steps: Vec<PlannedStep>) -> Self {
            Self { calls: AtomicU32::new(0), response: Ok(steps) }
        }

        fn failing(message: &str) -> Self {
            Self { calls: AtomicU32::new(0), response: Err(message.to_string()) }
        }
    }

    #[async_trait]
    impl DecompositionService for ScriptedService {
        async fn decompose(&self, _task_text: &str) -> Result<Vec<PlannedStep>, DecomposeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Ok(steps) => Ok(steps.clone()),
                Err(msg) => Err(DecomposeError::Unavailable(msg.clone())),
            }
        }
    }

    #[tokio::test]
    async fn test_rules_used_when_no_service_attached() {
        let decomposer = TaskDecomposer::new(executor(), fast_retry());
        let result = decomposer.decompose("- [ ] email the board").await;

        assert_eq!(result.origin, DecomposerKind::Rules);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].category, StepCategory::Email);
    }

    #[tokio::test]
    async fn test_external_steps_used_when_service_succeeds() {
        let service = Arc::new(ScriptedService::ok(vec![
            PlannedStep::new("scan the inbox", Some("read")),
            PlannedStep::new("reply to the urgent thread", Some("email")),
        ]));
        let decomposer = TaskDecomposer::new(executor(), fast_retry()).with_service(service.clone());

        let result = decomposer.decompose("handle morning email").await;

        assert_eq!(result.origin, DecomposerKind::External);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].number, 1);
        assert_eq!(result.steps[0].category, StepCategory::Read);
        assert_eq!(result.steps[1].number, 2);
        assert_eq!(result.steps[1].category, StepCategory::Email);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_category_label_lands_on_process() {
        let service = Arc::new(ScriptedService::ok(vec![
            PlannedStep::new("do the thing", Some("telepathy")),
            PlannedStep::new("do the other thing", None),
        ]));
        let decomposer = TaskDecomposer::new(executor(), fast_retry()).with_service(service);

        let result = decomposer.decompose("whatever").await;

        assert_eq!(result.steps[0].category, StepCategory::Process);
        assert_eq!(result.steps[1].category, StepCategory::Process);
    }

    #[tokio::test]
    async fn test_blank_planned_steps_are_dropped_and_renumbered() {
        let service = Arc::new(ScriptedService::ok(vec![
            PlannedStep::new("  ", Some("read")),
            PlannedStep::new("real step", Some("write")),
        ]));
        let decomposer = TaskDecomposer::new(executor(), fast_retry()).with_service(service);

        let result = decomposer.decompose("whatever").await;

        assert_eq!(result.origin, DecomposerKind::External);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].number, 1);
        assert_eq!(result.steps[0].description, "real step");
    }

    #[tokio::test]
    async fn test_empty_external_response_falls_back_to_rules() {
        let service = Arc::new(ScriptedService::ok(vec![]));
        let decomposer = TaskDecomposer::new(executor(), fast_retry()).with_service(service);

        let result = decomposer.decompose("1. check the ledger").await;

        assert_eq!(result.origin, DecomposerKind::Rules);
        assert_eq!(result.steps[0].category, StepCategory::Read);
    }

    #[tokio::test]
    async fn test_failing_service_falls_back_after_retries() {
        let service = Arc::new(ScriptedService::failing("planner offline"));
        let decomposer = TaskDecomposer::new(executor(), fast_retry()).with_service(service.clone());

        let result = decomposer.decompose("1. check the ledger").await;

        assert_eq!(result.origin, DecomposerKind::Rules);
        // max_retries = 1 means two attempts before giving up
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_service_entirely() {
        let audit = Arc::new(AuditLog::new(16, 16));
        let registry = Arc::new(HealthRegistry::new(2, std::time::Duration::from_secs(300), audit));
        registry.record_failure(DECOMPOSER_SERVICE, "planner offline");
        registry.record_failure(DECOMPOSER_SERVICE, "planner offline");
        assert!(registry.is_circuit_open(DECOMPOSER_SERVICE));

        let service = Arc::new(ScriptedService::ok(vec![PlannedStep::new("unreachable", None)]));
        let decomposer = TaskDecomposer::new(RetryExecutor::new(registry), fast_retry())
            .with_service(service.clone());

        let result = decomposer.decompose("- [ ] tweet the update").await;

        assert_eq!(result.origin, DecomposerKind::Rules);
        assert_eq!(result.steps[0].category, StepCategory::Social);
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }
}

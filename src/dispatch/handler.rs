//! Step handler trait and registry

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::domain::{Step, StepCategory, Task};

/// How long the fallback handler pretends to work
pub const DEFAULT_ECHO_WAIT_MS: u64 = 100;

/// Task-level context passed to handlers alongside the step
#[derive(Debug, Clone)]
pub struct StepContext {
    pub task_id: String,
    pub task_title: String,
}

impl StepContext {
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            task_title: task.title.clone(),
        }
    }
}

/// Result of a handler invocation
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    pub content: String,
    pub is_error: bool,
}

impl HandlerOutcome {
    /// Create a successful outcome
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// Create a failed outcome
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// A handler that executes steps of one category
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Category this handler serves
    fn category(&self) -> StepCategory;

    /// Execute one step attempt
    async fn handle(&self, step: &Step, ctx: &StepContext) -> HandlerOutcome;
}

/// Fallback handler for categories with nothing registered
///
/// Logs the step, waits briefly to simulate work, succeeds.
pub struct EchoHandler {
    wait: Duration,
}

impl EchoHandler {
    pub fn new(wait: Duration) -> Self {
        Self { wait }
    }
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_ECHO_WAIT_MS))
    }
}

#[async_trait]
impl StepHandler for EchoHandler {
    fn category(&self) -> StepCategory {
        StepCategory::Process
    }

    async fn handle(&self, step: &Step, ctx: &StepContext) -> HandlerOutcome {
        info!(
            task_id = %ctx.task_id,
            step = step.number,
            category = %step.category,
            "EchoHandler::handle: {}",
            step.description
        );
        tokio::time::sleep(self.wait).await;
        HandlerOutcome::success(format!("completed: {}", step.description))
    }
}

/// Maps step categories to handlers
///
/// Categories with no registered handler fall through to the echo handler,
/// so dispatch always has somewhere to send a step.
pub struct HandlerRegistry {
    handlers: HashMap<StepCategory, Arc<dyn StepHandler>>,
    fallback: Arc<dyn StepHandler>,
}

impl HandlerRegistry {
    /// Create an empty registry with the echo fallback
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(EchoHandler::default()),
        }
    }

    /// Replace the fallback handler
    pub fn with_fallback(mut self, fallback: Arc<dyn StepHandler>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Register a handler under its own category
    pub fn register(&mut self, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(handler.category(), handler);
    }

    /// Handler for a category, or the fallback
    pub fn resolve(&self, category: StepCategory) -> Arc<dyn StepHandler> {
        self.handlers
            .get(&category)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Whether a category has its own handler
    pub fn has_handler(&self, category: StepCategory) -> bool {
        self.handlers.contains_key(&category)
    }

    /// Registered categories
    pub fn categories(&self) -> Vec<StepCategory> {
        self.handlers.keys().copied().collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedHandler {
        category: StepCategory,
        outcome: &'static str,
    }

    #[async_trait]
    impl StepHandler for FixedHandler {
        fn category(&self) -> StepCategory {
            self.category
        }

        async fn handle(&self, _step: &Step, _ctx: &StepContext) -> HandlerOutcome {
            HandlerOutcome::success(self.outcome)
        }
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = HandlerOutcome::success("sent");
        assert!(!ok.is_error);
        assert_eq!(ok.content, "sent");

        let bad = HandlerOutcome::error("smtp refused");
        assert!(bad.is_error);
    }

    #[tokio::test]
    async fn test_resolve_prefers_registered_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(FixedHandler {
            category: StepCategory::Email,
            outcome: "mail sent",
        }));

        let step = Step::new(1, StepCategory::Email, "email the board");
        let ctx = StepContext {
            task_id: "t1".to_string(),
            task_title: "Morning email".to_string(),
        };

        let outcome = registry.resolve(StepCategory::Email).handle(&step, &ctx).await;
        assert_eq!(outcome.content, "mail sent");
        assert!(registry.has_handler(StepCategory::Email));
        assert!(!registry.has_handler(StepCategory::Social));
    }

    #[tokio::test]
    async fn test_unregistered_category_falls_back_to_echo() {
        let registry = HandlerRegistry::new();
        let step = Step::new(2, StepCategory::Social, "tweet the launch");
        let ctx = StepContext {
            task_id: "t1".to_string(),
            task_title: "Launch day".to_string(),
        };

        let outcome = registry.resolve(StepCategory::Social).handle(&step, &ctx).await;
        assert!(!outcome.is_error);
        assert!(outcome.content.contains("tweet the launch"));
    }
}

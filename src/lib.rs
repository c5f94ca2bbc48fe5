//! ralphd - autonomous task-execution daemon
//!
//! ralphd runs a single supervised execution loop ("Ralph") that claims
//! tasks from a folder queue, decomposes them into categorized steps,
//! executes each step through a handler registry, and survives its own
//! failures: per-step timeouts, one self-correction retry, circuit
//! breakers around flaky dependencies, and an independent watchdog with
//! force-pause authority.
//!
//! # Core Concepts
//!
//! - **One task at a time**: the loop owns at most one task; order is the
//!   lexicographic order of queue file names
//! - **Failures are data**: a failed task moves to `failed/` and the loop
//!   keeps going; only an operator or the watchdog stops it
//! - **Checkpoints**: every N steps the loop parks and asks its gate for
//!   approval before continuing
//! - **Everything audited**: every task, step, circuit and watchdog action
//!   lands on the audit trail
//!
//! # Modules
//!
//! - [`ralph`] - The execution loop, its state machine and control surface
//! - [`decompose`] - Task text to ordered, categorized steps
//! - [`dispatch`] - Step handlers and timeout-guarded dispatch
//! - [`source`] - Task queues (folder-backed and in-memory)
//! - [`health`] - Dependency health, circuit breaking and retry
//! - [`watchdog`] - Independent monitoring with force-pause authority
//! - [`audit`] - The audit trail
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod audit;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod decompose;
pub mod dispatch;
pub mod domain;
pub mod health;
pub mod ralph;
pub mod source;
pub mod watchdog;

// Re-export commonly used types
pub use audit::{AuditEvent, AuditLog, AuditRecord};
pub use config::{Config, LoggingConfig, QueueConfig, RecoveryConfig};
pub use decompose::{
    DecomposeError, DecomposerKind, Decomposition, DecompositionService, PlannedStep, TaskDecomposer,
};
pub use dispatch::{EchoHandler, HandlerOutcome, HandlerRegistry, StepContext, StepDispatcher, StepHandler};
pub use domain::{Step, StepCategory, StepResult, Task, TaskStatus};
pub use health::{
    HealthRegistry, RetryConfig, RetryError, RetryExecutor, ServiceHealth, ServiceStatus,
};
pub use ralph::{
    AutoGate, CheckpointGate, CurrentTask, EngineConfig, Guardrails, LoopState, ManualGate, Ralph,
    RalphEngine, RalphState, StatusSnapshot,
};
pub use source::{ArchiveOutcome, DirSource, MemorySource, QueueDepths, SourceError, TaskSource};
pub use watchdog::{Alert, AlertKind, AlertLevel, HealthMetrics, Watchdog, WatchdogConfig};

//! The execution loop and its control surface
//!
//! "Ralph" is the single long-lived worker at the heart of the daemon. The
//! [`RalphEngine`] runs the claim/decompose/execute cycle, [`RalphState`]
//! makes it observable, and [`Ralph`] is the handle everything else holds.

mod checkpoint;
mod config;
mod engine;
mod handle;
mod state;

pub use checkpoint::{AutoGate, CheckpointGate, DEFAULT_AUTO_DWELL_MS, ManualGate};
pub use config::{EngineConfig, Guardrails};
pub use engine::RalphEngine;
pub use handle::Ralph;
pub use state::{CurrentTask, LoopState, RalphState, StatusSnapshot};

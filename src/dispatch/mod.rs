//! Step execution: category handlers, registry, timeout dispatch

mod dispatcher;
mod handler;

pub use dispatcher::{DEFAULT_STEP_TIMEOUT_SECS, StepDispatcher};
pub use handler::{
    DEFAULT_ECHO_WAIT_MS, EchoHandler, HandlerOutcome, HandlerRegistry, StepContext, StepHandler,
};

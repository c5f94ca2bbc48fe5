//! Step domain type
//!
//! One atomic, ordered sub-action of a Task. Steps are created once by the
//! decomposer and mutated only by the dispatcher while that step executes;
//! the self-correction retry re-mutates the same step index, never renumbers.

use serde::{Deserialize, Serialize};

use super::now_ms;

/// Step category inferred from the step text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepCategory {
    /// Compose or send email
    Email,
    /// Direct messaging (WhatsApp etc.)
    Messaging,
    /// Social platforms (LinkedIn, Twitter, ...)
    Social,
    /// Read/review/check something
    Read,
    /// Write/create/draft content
    Write,
    /// Move/organize/file things
    Organize,
    /// Generic catch-all
    #[default]
    Process,
}

impl StepCategory {
    /// All categories, in declaration order
    pub const ALL: [StepCategory; 7] = [
        StepCategory::Email,
        StepCategory::Messaging,
        StepCategory::Social,
        StepCategory::Read,
        StepCategory::Write,
        StepCategory::Organize,
        StepCategory::Process,
    ];

    /// Parse a category label as produced by `Display`/serde
    ///
    /// Used to validate labels coming back from an external decomposer.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "email" => Some(Self::Email),
            "messaging" => Some(Self::Messaging),
            "social" => Some(Self::Social),
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "organize" => Some(Self::Organize),
            "process" => Some(Self::Process),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Messaging => write!(f, "messaging"),
            Self::Social => write!(f, "social"),
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Organize => write!(f, "organize"),
            Self::Process => write!(f, "process"),
        }
    }
}

/// Outcome of one step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResult {
    /// Handler completed and reported success
    Success,
    /// Handler completed and reported failure
    Failure,
    /// Handler exceeded the step timeout and was cancelled
    Timeout,
    /// Step was skipped
    Skipped,
}

impl StepResult {
    /// Whether this result counts as a pass for task progression
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for StepResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Timeout => write!(f, "timeout"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// One atomic sub-action of a Task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Sequence number (1-based, dense, no gaps)
    pub number: u32,

    /// Category used for handler routing
    pub category: StepCategory,

    /// Human-readable description of the action
    pub description: String,

    /// When execution of this step began (Unix milliseconds)
    pub started_at: Option<i64>,

    /// When execution of this step finished (Unix milliseconds)
    pub completed_at: Option<i64>,

    /// Execution outcome, None until the step has run
    pub result: Option<StepResult>,

    /// Free-text output from the handler
    pub output: Option<String>,

    /// Error message when the step did not succeed
    pub error: Option<String>,

    /// Wall-clock execution time in milliseconds
    pub duration_ms: Option<u64>,
}

impl Step {
    /// Create a new step awaiting execution
    pub fn new(number: u32, category: StepCategory, description: impl Into<String>) -> Self {
        Self {
            number,
            category,
            description: description.into(),
            started_at: None,
            completed_at: None,
            result: None,
            output: None,
            error: None,
            duration_ms: None,
        }
    }

    /// Mark the step as started, clearing any prior attempt
    ///
    /// The self-correction retry calls this on the same step index, so a
    /// fresh attempt wipes the previous result/output/error.
    pub fn begin(&mut self) {
        self.started_at = Some(now_ms());
        self.completed_at = None;
        self.result = None;
        self.output = None;
        self.error = None;
        self.duration_ms = None;
    }

    /// Record the outcome of an attempt
    pub fn finish(&mut self, result: StepResult, duration_ms: u64) {
        self.completed_at = Some(now_ms());
        self.result = Some(result);
        self.duration_ms = Some(duration_ms);
    }

    /// Attach handler output
    pub fn set_output(&mut self, output: impl Into<String>) {
        self.output = Some(output.into());
    }

    /// Attach an error message
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    /// Whether the step's final result is success
    pub fn succeeded(&self) -> bool {
        self.result.map(|r| r.is_success()).unwrap_or(false)
    }
}

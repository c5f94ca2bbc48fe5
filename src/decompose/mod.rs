//! Task decomposition: external service first, rule table as fallback

mod decomposer;
mod rules;

pub use decomposer::{
    DECOMPOSER_SERVICE, Decomposition, DecomposeError, DecomposerKind, DecompositionService,
    PlannedStep, TaskDecomposer,
};
pub use rules::{CATEGORY_RULES, infer_category, parse_steps};

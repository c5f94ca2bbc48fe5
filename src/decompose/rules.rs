//! Rule-based decomposition
//!
//! Checkbox lines (`- [ ] ...`) and numbered lines (`N. ...`) become steps;
//! each step's category comes from an ordered keyword table, checked top to
//! bottom, first match wins. Data, not code — swapping in a real classifier
//! later only touches the caller.

use crate::domain::{Step, StepCategory};

/// Ordered keyword-to-category table
pub const CATEGORY_RULES: &[(&[&str], StepCategory)] = &[
    (&["email"], StepCategory::Email),
    (&["whatsapp", "message"], StepCategory::Messaging),
    (
        &["linkedin", "facebook", "instagram", "twitter", "tweet", "social"],
        StepCategory::Social,
    ),
    (&["read", "review", "check"], StepCategory::Read),
    (&["write", "create", "draft"], StepCategory::Write),
    (&["move", "organize", "file"], StepCategory::Organize),
];

/// Infer a category from step text; `process` when nothing matches
pub fn infer_category(text: &str) -> StepCategory {
    let lower = text.to_lowercase();
    for (keywords, category) in CATEGORY_RULES {
        if keywords.iter().any(|keyword| lower.contains(keyword)) {
            return *category;
        }
    }
    StepCategory::Process
}

/// Extract the actionable text from a checkbox or numbered line
fn actionable_text(line: &str) -> Option<&str> {
    let trimmed = line.trim();

    if let Some(rest) = trimmed.strip_prefix("- [ ]") {
        let rest = rest.trim();
        return (!rest.is_empty()).then_some(rest);
    }

    if let Some(dot) = trimmed.find('.')
        && dot > 0
        && trimmed[..dot].chars().all(|c| c.is_ascii_digit())
    {
        let rest = trimmed[dot + 1..].trim();
        return (!rest.is_empty()).then_some(rest);
    }

    None
}

/// Parse raw task text into ordered, 1-indexed steps
///
/// Zero actionable lines yields a single `process` step describing the
/// whole task.
pub fn parse_steps(text: &str) -> Vec<Step> {
    let mut steps = Vec::new();

    for line in text.lines() {
        if let Some(description) = actionable_text(line) {
            let number = steps.len() as u32 + 1;
            steps.push(Step::new(number, infer_category(description), description));
        }
    }

    if steps.is_empty() {
        let description = text.trim();
        let description = if description.is_empty() { "(empty task)" } else { description };
        steps.push(Step::new(1, StepCategory::Process, description));
    }

    steps
}

//! Grammar and expansion error types.
//!
//! The split mirrors when each failure can occur: [`GrammarError`] is
//! detected while freezing a grammar and is always fatal to the run;
//! [`ExpandError`] happens while producing a single query, is recorded
//! against that query, and never stops the worker.

use thiserror::Error;

/// Fatal grammar construction errors, detected at freeze time.
#[derive(Debug, Error)]
pub enum GrammarError {
    #[error("rule `{referenced}` referenced from `{from}` does not exist")]
    UnknownRule { referenced: String, from: String },

    #[error("template placeholder `{{{placeholder}}}` in rule `{rule}` has no inline binding and no matching rule")]
    UnknownPlaceholder { placeholder: String, rule: String },

    #[error("entry rule `{0}` does not exist")]
    UnknownEntry(String),

    #[error("choice in rule `{rule}` has no options")]
    EmptyChoice { rule: String },

    #[error("choice in rule `{rule}` has {options} options but {weights} weights")]
    WeightMismatch {
        rule: String,
        options: usize,
        weights: usize,
    },

    #[error("choice in rule `{rule}` has a zero weight; weights must be positive")]
    ZeroWeight { rule: String },

    #[error("repeat in rule `{rule}` has min {min} > max {max}")]
    InvalidRepeat { rule: String, min: u32, max: u32 },

    #[error("repeat in rule `{rule}` has max {max} above the configured cap {cap}")]
    RepeatAboveCap { rule: String, max: u32, cap: u32 },

    #[error("maybe in rule `{rule}` has probability {p} outside [0, 1]")]
    InvalidProbability { rule: String, p: f64 },
}

/// Per-query expansion errors. Recorded, never fatal.
#[derive(Debug, Clone, Error)]
pub enum ExpandError {
    #[error("lambda failed: {0}")]
    Lambda(String),

    #[error("entry rule `{0}` does not exist in this grammar")]
    UnknownEntry(String),
}

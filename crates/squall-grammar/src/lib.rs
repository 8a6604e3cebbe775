//! # squall-grammar
//!
//! The grammar expansion engine: a tree-walking evaluator of composable
//! generator elements with a seeded random source and a mutable generation
//! context.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        squall-grammar                        │
//! │  ┌──────────┐    ┌───────────┐    ┌───────────────────────┐  │
//! │  │ Builder  │ →  │  Grammar  │ →  │ expand(ctx) → String  │  │
//! │  │ (rules)  │    │ (frozen)  │    │  (per-query Context)  │  │
//! │  └──────────┘    └───────────┘    └───────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rules are composed from the element algebra ([`Element`]): literals,
//! choices (optionally weighted), templates with named placeholders,
//! bounded repetition, probabilistic inclusion, rule references, user
//! lambdas, numbers, and schema-aware field/table picks. A grammar is
//! frozen before first use; freezing resolves every reference, validates
//! weights and bounds, and runs the recursion analysis that lets the depth
//! cap force terminating branches.
//!
//! Expansion is deterministic: the same frozen grammar, seed, and schema
//! snapshot always produce the same string.

mod context;
mod element;
mod error;
mod grammar;

pub use context::{Context, ExpandConfig, ExpandWarnings, StateValue};
pub use element::{
    choice, digit, field, field_where, lambda, lit, maybe, number, repeat, rule_ref, table,
    table_where, template, weighted, with_slot, ColumnPredicate, Element, LambdaFn,
    TablePredicate, TemplatePart,
};
pub use error::{ExpandError, GrammarError};
pub use grammar::{Grammar, GrammarBuilder, DEFAULT_ENTRY};

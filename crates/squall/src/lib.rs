//! # Squall
//!
//! A random query generator (RQG) for PostgreSQL-compatible databases.
//!
//! Squall expands a user-defined declarative grammar into large volumes of
//! syntactically valid, semantically plausible SQL, optionally enriched
//! with live schema introspection, and executes the queries against a
//! target database with concurrency, backpressure, and deterministic
//! reproducibility.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               Squall                                 │
//! │  ┌─────────┐   ┌───────────┐   ┌────────────┐   ┌────────────────┐  │
//! │  │ Grammar │ → │  Workers  │ → │ Uniqueness │ → │  Coordinator   │  │
//! │  │ (rules) │   │ (seeded)  │   │  (Bloom)   │   │ (DDL barrier)  │  │
//! │  └─────────┘   └───────────┘   └────────────┘   └────────────────┘  │
//! │        ▲              ▲                                 │           │
//! │   SchemaView    (seed, worker, index)              Postgres         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Determinism is the core contract: worker `w` expands global index `i`
//! with a stream derived from `(master_seed, w, i)`, so the same seed
//! always reproduces the same queries, run to run and resume to resume.
//!
//! # Quick start
//!
//! ```
//! use squall::prelude::*;
//!
//! let grammar = GrammarBuilder::new("demo")
//!     .rule("query", template("SELECT {col} FROM {tab} WHERE id < {n};"))
//!     .rule("col", choice([lit("a"), lit("b")]))
//!     .rule("tab", lit("t"))
//!     .rule("n", number(1, 1000))
//!     .freeze()
//!     .expect("valid grammar");
//!
//! let config = RunConfig {
//!     grammar: "demo".to_owned(),
//!     count: Some(100),
//!     workers: 2,
//!     seed: Some(42),
//!     deterministic: true,
//!     ..RunConfig::default()
//! };
//!
//! let summary = Runner::new(config)
//!     .register(grammar)
//!     .run()
//!     .expect("run");
//! assert_eq!(summary.snapshot.generated, 100);
//! ```
//!
//! # Crates
//!
//! - [`grammar`]: the element algebra, contexts, and frozen rule tables
//! - [`schema`]: schema snapshots from DDL scripts or introspection
//! - [`filter`]: the rotating Bloom uniqueness window
//! - [`rng`]: splittable deterministic random streams
//! - [`config`]: run configuration and layered loading
//! - [`exec`]: endpoint adapters, the DDL barrier, error classification
//! - [`run`]: partitioning, the worker pool, checkpoints, reporting

pub use squall_config as config;
pub use squall_exec as exec;
pub use squall_filter as filter;
pub use squall_grammar as grammar;
pub use squall_rng as rng;
pub use squall_run as run;
pub use squall_schema as schema;

pub use squall_config::RunConfig;
pub use squall_grammar::{Grammar, GrammarBuilder};
pub use squall_run::{exit_code, RunError, Runner, RunSummary};

/// The commonly-used surface in one import.
pub mod prelude {
    pub use squall_config::{
        CheckpointConfig, OutputConfig, RunConfig, SchemaConfig, SchemaMode, SinkMode,
        UniquenessConfig, UniquenessMode,
    };
    pub use squall_filter::{Fingerprint, UniquenessWindow, Verdict};
    pub use squall_grammar::{
        choice, digit, field, field_where, lambda, lit, maybe, number, repeat, rule_ref, table,
        table_where, template, weighted, with_slot, Context, Element, ExpandConfig, Grammar,
        GrammarBuilder, StateValue,
    };
    pub use squall_rng::{derive_seed, StreamRng};
    pub use squall_run::{
        exit_code, CallbackSink, FileSink, NullSink, QuerySink, ReportSnapshot, RunError, Runner,
        RunSummary, StdoutSink,
    };
    pub use squall_schema::{schema_from_ddl, SchemaView, TypeTag};
}

//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("deterministic mode requires a master seed")]
    MissingSeed,

    #[error("workers must be at least 1")]
    NoWorkers,

    #[error("batch size must be at least 1")]
    EmptyBatch,

    #[error("uniqueness false-positive rate {0} is outside (0, 1)")]
    BadFpr(f64),

    #[error("uniqueness capacity must be positive")]
    ZeroCapacity,

    #[error("schema mode `{mode}` requires a source ({expects})")]
    MissingSchemaSource { mode: String, expects: String },

    #[error("output sink `file` requires a path")]
    MissingOutputPath,

    #[error("checkpointing requires a cadence (queries or seconds)")]
    MissingCheckpointCadence,

    #[error("execution is enabled but neither count nor duration bounds the run")]
    UnboundedExecution,
}

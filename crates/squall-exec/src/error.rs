//! Execution error types.

use thiserror::Error;

/// Failures surfaced by the execution layer.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("endpoint unreachable after {attempts} attempts: {last}")]
    Unreachable { attempts: u32, last: String },

    #[error("failed to connect to endpoint: {0}")]
    Connect(String),

    #[error("schema introspection failed: {0}")]
    Introspection(String),

    #[error("execution stopped after SQL error ({code}): {message}")]
    StoppedOnSqlError { code: String, message: String },
}

//! Top-level run errors and their process exit codes.

use thiserror::Error;

use squall_config::ConfigError;
use squall_exec::ExecError;
use squall_grammar::GrammarError;
use squall_schema::SchemaError;

use crate::checkpoint::CheckpointError;

/// Everything that can abort a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("grammar `{0}` is not registered")]
    UnknownGrammar(String),

    #[error(transparent)]
    Grammar(#[from] GrammarError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("failed to read schema source `{path}`: {source}")]
    SchemaSource {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to open output sink: {0}")]
    Output(#[from] std::io::Error),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("run cancelled")]
    Cancelled,
}

impl RunError {
    /// Maps the error to the documented process exit code.
    ///
    /// `0` normal, `1` fatal configuration error, `2` endpoint unreachable,
    /// `3` cancelled, `4` checkpoint corruption.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_)
            | Self::UnknownGrammar(_)
            | Self::Grammar(_)
            | Self::Schema(_)
            | Self::SchemaSource { .. }
            | Self::Output(_) => 1,
            Self::Exec(e) => match e {
                ExecError::Unreachable { .. } | ExecError::Connect(_) => 2,
                _ => 1,
            },
            Self::Checkpoint(_) => 4,
            Self::Cancelled => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_the_contract() {
        assert_eq!(RunError::UnknownGrammar("g".into()).exit_code(), 1);
        assert_eq!(
            RunError::Exec(ExecError::Unreachable {
                attempts: 8,
                last: "refused".into()
            })
            .exit_code(),
            2
        );
        assert_eq!(RunError::Cancelled.exit_code(), 3);
        assert_eq!(
            RunError::Checkpoint(CheckpointError::Corrupt("bad json".into())).exit_code(),
            4
        );
    }
}

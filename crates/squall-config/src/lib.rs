//! # squall-config
//!
//! The run configuration: every knob the engine recognizes, layered
//! loading (defaults → TOML file → `SQUALL_*` environment), and the
//! startup validation that turns bad knobs into fatal errors before any
//! worker spawns.

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Uniqueness filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniquenessMode {
    Off,
    Probabilistic,
}

/// Uniqueness filter knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UniquenessConfig {
    pub mode: UniquenessMode,
    /// Target false-positive rate when probabilistic.
    pub fpr: f64,
    /// Capacity `n` used to size the bit array.
    pub capacity: u64,
    /// Fresh expansions attempted per duplicate before passing it through.
    pub retry_cap: u32,
}

impl Default for UniquenessConfig {
    fn default() -> Self {
        Self {
            mode: UniquenessMode::Off,
            fpr: 0.01,
            capacity: 1 << 20,
            retry_cap: 4,
        }
    }
}

/// Where the schema view comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Introspect `information_schema` over the endpoint.
    Introspect,
    /// Parse a DDL script from a file.
    DdlFile,
    /// Run with an empty schema view.
    None,
}

/// Schema view knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub mode: SchemaMode,
    /// DSN for `introspect`, file path for `ddl_file`.
    pub source: Option<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            mode: SchemaMode::None,
            source: None,
        }
    }
}

/// Where generated queries are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkMode {
    Stdout,
    File,
    None,
}

/// Output sink knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub sink: SinkMode,
    /// Target path when the sink is `file`.
    pub path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sink: SinkMode::None,
            path: None,
        }
    }
}

/// Checkpointing knobs. Checkpointing is enabled by setting `path`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub path: Option<PathBuf>,
    /// Write after this many queries per worker.
    pub every_queries: Option<u64>,
    /// Write after this many seconds.
    pub every_secs: Option<u64>,
}

/// The complete run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Name of the frozen grammar to run.
    pub grammar: String,
    /// Rule to invoke.
    pub entry_rule: String,
    /// Total queries to attempt; `None` means unbounded.
    pub count: Option<u64>,
    /// Wall-clock cap in seconds; checked at batch boundaries.
    pub duration_secs: Option<u64>,
    /// Worker thread count.
    pub workers: usize,
    /// Per-worker batch size between stop-flag polls and checkpoints.
    pub batch: usize,
    /// Master seed. Required when `deterministic` is set.
    pub seed: Option<u64>,
    /// Fail at startup unless a seed is configured.
    pub deterministic: bool,
    /// Recursion cap for element expansion.
    pub max_depth: usize,
    /// Upper bound applied to every repeat element.
    pub repeat_cap: u32,
    /// Keep executing after SQL errors.
    pub continue_on_error: bool,
    /// Endpoint DSN; absent means dry-run generation only.
    pub dsn: Option<String>,
    pub uniqueness: UniquenessConfig,
    pub schema: SchemaConfig,
    pub output: OutputConfig,
    pub checkpoint: CheckpointConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            grammar: String::new(),
            entry_rule: "query".to_owned(),
            count: Some(10_000),
            duration_secs: None,
            workers: default_workers(),
            batch: 1000,
            seed: None,
            deterministic: false,
            max_depth: 32,
            repeat_cap: 64,
            continue_on_error: true,
            dsn: None,
            uniqueness: UniquenessConfig::default(),
            schema: SchemaConfig::default(),
            output: OutputConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

impl RunConfig {
    /// Validates the configuration. Every failure here is fatal (exit 1).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deterministic && self.seed.is_none() {
            return Err(ConfigError::MissingSeed);
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.batch == 0 {
            return Err(ConfigError::EmptyBatch);
        }
        if self.uniqueness.mode == UniquenessMode::Probabilistic {
            if !(self.uniqueness.fpr > 0.0 && self.uniqueness.fpr < 1.0) {
                return Err(ConfigError::BadFpr(self.uniqueness.fpr));
            }
            if self.uniqueness.capacity == 0 {
                return Err(ConfigError::ZeroCapacity);
            }
        }
        match self.schema.mode {
            SchemaMode::Introspect if self.schema.source.is_none() && self.dsn.is_none() => {
                return Err(ConfigError::MissingSchemaSource {
                    mode: "introspect".to_owned(),
                    expects: "a DSN".to_owned(),
                });
            }
            SchemaMode::DdlFile if self.schema.source.is_none() => {
                return Err(ConfigError::MissingSchemaSource {
                    mode: "ddl_file".to_owned(),
                    expects: "a file path".to_owned(),
                });
            }
            _ => {}
        }
        if self.output.sink == SinkMode::File && self.output.path.is_none() {
            return Err(ConfigError::MissingOutputPath);
        }
        if self.checkpoint.path.is_some()
            && self.checkpoint.every_queries.is_none()
            && self.checkpoint.every_secs.is_none()
        {
            return Err(ConfigError::MissingCheckpointCadence);
        }
        if self.dsn.is_some() && self.count.is_none() && self.duration_secs.is_none() {
            return Err(ConfigError::UnboundedExecution);
        }
        Ok(())
    }

    /// The introspection DSN: `schema.source` when set, else the run DSN.
    #[must_use]
    pub fn introspection_dsn(&self) -> Option<&str> {
        self.schema
            .source
            .as_deref()
            .or(self.dsn.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        RunConfig::default().validate().expect("defaults are valid");
    }

    #[test]
    fn deterministic_mode_requires_seed() {
        let config = RunConfig {
            deterministic: true,
            seed: None,
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::MissingSeed
        ));

        let config = RunConfig {
            deterministic: true,
            seed: Some(42),
            ..RunConfig::default()
        };
        config.validate().expect("seeded deterministic run is valid");
    }

    #[test]
    fn probabilistic_uniqueness_checks_fpr() {
        let mut config = RunConfig::default();
        config.uniqueness.mode = UniquenessMode::Probabilistic;
        config.uniqueness.fpr = 1.5;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::BadFpr(_)
        ));

        config.uniqueness.fpr = 0.0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::BadFpr(_)
        ));
    }

    #[test]
    fn ddl_file_mode_requires_source() {
        let mut config = RunConfig::default();
        config.schema.mode = SchemaMode::DdlFile;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::MissingSchemaSource { .. }
        ));
    }

    #[test]
    fn introspect_mode_accepts_run_dsn() {
        let mut config = RunConfig::default();
        config.schema.mode = SchemaMode::Introspect;
        config.dsn = Some("host=localhost user=postgres".to_owned());
        config.validate().expect("run DSN satisfies introspection");
        assert_eq!(
            config.introspection_dsn(),
            Some("host=localhost user=postgres")
        );
    }

    #[test]
    fn execution_must_be_bounded() {
        let config = RunConfig {
            dsn: Some("host=localhost".to_owned()),
            count: None,
            duration_secs: None,
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::UnboundedExecution
        ));
    }

    #[test]
    fn checkpoint_path_needs_cadence() {
        let mut config = RunConfig::default();
        config.checkpoint.path = Some("run.ckpt".into());
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::MissingCheckpointCadence
        ));

        config.checkpoint.every_queries = Some(10_000);
        config.validate().expect("cadence satisfies checkpointing");
    }
}

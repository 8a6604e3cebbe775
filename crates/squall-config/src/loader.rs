//! Configuration loader with multi-source merging.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::RunConfig;

/// Layered loader: built-in defaults, then an optional TOML file, then
/// `SQUALL_*` environment variables.
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    /// Creates a loader with no config file and the default `SQUALL` prefix.
    #[must_use]
    pub fn new() -> Self {
        Self {
            file: None,
            env_prefix: "SQUALL".to_owned(),
        }
    }

    /// Points the loader at a TOML config file.
    #[must_use]
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Overrides the environment variable prefix (default `SQUALL`).
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Loads and merges all sources. Does not validate; call
    /// [`RunConfig::validate`] on the result.
    pub fn load(self) -> Result<RunConfig> {
        let mut builder = config::Config::builder();

        // 1. Built-in defaults
        builder = builder.add_source(config::Config::try_from(&RunConfig::default())?);

        // 2. Explicit TOML file
        if let Some(file) = &self.file {
            builder = builder.add_source(
                config::File::from(file.clone())
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        // 3. Environment variables (SQUALL_*)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let merged = builder.build().context("failed to build configuration")?;
        merged
            .try_deserialize()
            .context("failed to deserialize configuration")
    }

    /// Loads configuration or falls back to defaults.
    #[must_use]
    pub fn load_or_default(self) -> RunConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

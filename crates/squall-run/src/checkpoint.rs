//! Checkpoint documents and atomic storage.
//!
//! The on-disk format is a single JSON object:
//!
//! ```json
//! {
//!   "master_seed": 42,
//!   "total": 1000000,
//!   "workers": 8,
//!   "done": [124999, 249999, ...],
//!   "started_at": "2026-08-01T12:00:00Z",
//!   "schema_fingerprint": "0f3a..."
//! }
//! ```
//!
//! `done[w]` is the last global index worker `w` completed; on resume the
//! worker continues at `done[w] + 1`. A worker that has not completed
//! anything stores `start - 1` (wrapping at zero), so `done[w] + 1` is
//! always the next index to run. Writes are atomic: the document lands in
//! a temporary file that is renamed over the target.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Checkpoint I/O and validation failures. Exit code 4.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to read checkpoint: {0}")]
    Read(#[from] std::io::Error),

    #[error("checkpoint is corrupt: {0}")]
    Corrupt(String),

    #[error("checkpoint does not match this run: {0}")]
    Mismatch(String),

    #[error("checkpoint schema fingerprint {found} does not match current schema {expected}")]
    SchemaMismatch { expected: String, found: String },
}

/// The resumable state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub master_seed: u64,
    pub total: Option<u64>,
    pub workers: u32,
    /// Last completed global index per worker (`start - 1` if none).
    pub done: Vec<u64>,
    pub started_at: DateTime<Utc>,
    /// Hex xxh3-128 of the schema view the run started with.
    pub schema_fingerprint: String,
}

impl Checkpoint {
    /// Rejects resumption against a different run shape or schema.
    pub fn validate_resume(
        &self,
        master_seed: u64,
        total: Option<u64>,
        workers: u32,
        schema_fingerprint: &str,
    ) -> Result<(), CheckpointError> {
        if self.master_seed != master_seed {
            return Err(CheckpointError::Mismatch(format!(
                "master_seed {} != {master_seed}",
                self.master_seed
            )));
        }
        if self.total != total {
            return Err(CheckpointError::Mismatch(format!(
                "total {:?} != {total:?}",
                self.total
            )));
        }
        if self.workers != workers {
            return Err(CheckpointError::Mismatch(format!(
                "workers {} != {workers}",
                self.workers
            )));
        }
        if self.done.len() != workers as usize {
            return Err(CheckpointError::Corrupt(format!(
                "done has {} entries for {workers} workers",
                self.done.len()
            )));
        }
        if self.schema_fingerprint != schema_fingerprint {
            return Err(CheckpointError::SchemaMismatch {
                expected: schema_fingerprint.to_owned(),
                found: self.schema_fingerprint.clone(),
            });
        }
        Ok(())
    }
}

/// Atomic checkpoint storage at a fixed path.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// True if a checkpoint exists at the path.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Writes the checkpoint atomically (temp file + rename).
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| CheckpointError::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "checkpoint written");
        Ok(())
    }

    /// Loads and parses the checkpoint.
    pub fn load(&self) -> Result<Checkpoint, CheckpointError> {
        let bytes = std::fs::read(&self.path)?;
        serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Corrupt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Checkpoint {
        Checkpoint {
            master_seed: 42,
            total: Some(1000),
            workers: 4,
            done: vec![249, 499, 749, 999],
            started_at: Utc::now(),
            schema_fingerprint: "00ff".to_owned(),
        }
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path().join("run.ckpt"));
        assert!(!store.exists());

        let checkpoint = sample();
        store.save(&checkpoint).expect("save");
        assert!(store.exists());

        let loaded = store.load().expect("load");
        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn save_replaces_previous_atomically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path().join("run.ckpt"));

        store.save(&sample()).expect("first save");
        let mut second = sample();
        second.done = vec![300, 550, 800, 999];
        store.save(&second).expect("second save");

        assert_eq!(store.load().expect("load").done, vec![300, 550, 800, 999]);
        // No stray temp file survives.
        assert!(!dir.path().join("run.tmp").exists());
    }

    #[test]
    fn corrupt_checkpoint_is_detected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.ckpt");
        std::fs::write(&path, b"{ not json").expect("write");

        let err = CheckpointStore::new(&path).load().unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt(_)));
    }

    #[test]
    fn resume_validation_catches_mismatches() {
        let checkpoint = sample();
        checkpoint
            .validate_resume(42, Some(1000), 4, "00ff")
            .expect("matching resume");

        assert!(matches!(
            checkpoint.validate_resume(43, Some(1000), 4, "00ff"),
            Err(CheckpointError::Mismatch(_))
        ));
        assert!(matches!(
            checkpoint.validate_resume(42, Some(1000), 8, "00ff"),
            Err(CheckpointError::Mismatch(_))
        ));
        assert!(matches!(
            checkpoint.validate_resume(42, Some(1000), 4, "beef"),
            Err(CheckpointError::SchemaMismatch { .. })
        ));
    }
}

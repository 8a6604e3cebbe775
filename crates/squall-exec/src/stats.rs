//! Aggregate execution counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::classify::SqlErrorKind;

/// Example messages kept per error kind for the final report.
const MAX_SAMPLES_PER_KIND: usize = 10;

/// Lock-free counters plus a bounded sample of error messages per kind.
#[derive(Default)]
pub struct ExecStats {
    submitted: AtomicU64,
    ok: AtomicU64,
    errors: [AtomicU64; SqlErrorKind::ALL.len()],
    samples: Mutex<BTreeMap<SqlErrorKind, Vec<String>>>,
}

impl ExecStats {
    pub(crate) fn note_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_ok(&self) {
        self.ok.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_sql_error(&self, kind: SqlErrorKind, code: &str, message: &str) {
        let index = SqlErrorKind::ALL
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(SqlErrorKind::ALL.len() - 1);
        self.errors[index].fetch_add(1, Ordering::Relaxed);

        let mut samples = self.samples.lock().expect("samples lock poisoned");
        let bucket = samples.entry(kind).or_default();
        if bucket.len() < MAX_SAMPLES_PER_KIND {
            bucket.push(format!("{code}: {message}"));
        }
    }

    /// Point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> ExecStatsSnapshot {
        let mut errors = BTreeMap::new();
        for (index, kind) in SqlErrorKind::ALL.iter().enumerate() {
            let count = self.errors[index].load(Ordering::Relaxed);
            if count > 0 {
                errors.insert(kind.label().to_owned(), count);
            }
        }
        let samples = self
            .samples
            .lock()
            .expect("samples lock poisoned")
            .iter()
            .map(|(kind, messages)| (kind.label().to_owned(), messages.clone()))
            .collect();
        ExecStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            ok: self.ok.load(Ordering::Relaxed),
            errors,
            samples,
        }
    }
}

/// Serializable view of [`ExecStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecStatsSnapshot {
    pub submitted: u64,
    pub ok: u64,
    /// Error counts keyed by kind label.
    pub errors: BTreeMap<String, u64>,
    /// Up to ten example messages per kind.
    pub samples: BTreeMap<String, Vec<String>>,
}

impl ExecStatsSnapshot {
    /// Total errors across kinds.
    #[must_use]
    pub fn error_total(&self) -> u64 {
        self.errors.values().sum()
    }
}

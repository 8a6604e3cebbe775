//! The rotating two-filter uniqueness window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bloom::BloomFilter;
use crate::Fingerprint;

/// Outcome of a uniqueness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Definitely not seen in the current window.
    Fresh,
    /// Seen in the current window, or a false positive at the configured
    /// rate.
    Duplicate,
}

/// Counters exposed to the run reporter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    pub fresh: u64,
    pub duplicates: u64,
    pub rotations: u64,
}

struct WindowInner {
    active: BloomFilter,
    sealed: Option<BloomFilter>,
}

/// A Bloom filter pair with rotation.
///
/// Writes go to the active filter; lookups union the active and the sealed
/// filter. When the active filter's occupancy crosses the rotation
/// threshold it seals, a fresh filter takes over writes, and the previous
/// sealed filter (if any) is discarded. Memory is bounded at two filters;
/// uniqueness covers a sliding window of roughly `2 * capacity` queries.
///
/// The bit arrays themselves are atomic, so checks from many workers share
/// a read lock; the write lock is only taken for the rare rotation swap.
pub struct UniquenessWindow {
    inner: RwLock<WindowInner>,
    capacity: u64,
    target_fpr: f64,
    rotation_threshold: f64,
    fresh: AtomicU64,
    duplicates: AtomicU64,
    rotations: AtomicU64,
}

impl UniquenessWindow {
    /// Default occupancy threshold at which the active filter seals.
    pub const DEFAULT_ROTATION_THRESHOLD: f64 = 0.5;

    /// Creates a window sized for `(capacity, target_fpr)` per filter.
    #[must_use]
    pub fn new(capacity: u64, target_fpr: f64) -> Self {
        Self::with_rotation_threshold(capacity, target_fpr, Self::DEFAULT_ROTATION_THRESHOLD)
    }

    /// Creates a window with an explicit rotation threshold in `(0, 1]`.
    #[must_use]
    pub fn with_rotation_threshold(
        capacity: u64,
        target_fpr: f64,
        rotation_threshold: f64,
    ) -> Self {
        Self {
            inner: RwLock::new(WindowInner {
                active: BloomFilter::new(capacity, target_fpr),
                sealed: None,
            }),
            capacity,
            target_fpr,
            rotation_threshold: rotation_threshold.clamp(f64::EPSILON, 1.0),
            fresh: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
        }
    }

    /// Checks a fingerprint against the window and records it.
    ///
    /// Never returns `Fresh` for a fingerprint inserted earlier in the
    /// window; may return `Duplicate` spuriously at the configured rate.
    pub fn check_and_add(&self, fp: Fingerprint) -> Verdict {
        let needs_rotation;
        let verdict = {
            let inner = self.inner.read().expect("filter lock poisoned");
            let in_sealed = inner
                .sealed
                .as_ref()
                .is_some_and(|sealed| sealed.might_contain(fp));
            // Insert into the active filter even on a sealed hit, so the
            // mark survives the sealed filter's eventual discard.
            let in_active = inner.active.insert(fp);
            needs_rotation = inner.active.load_factor() > self.rotation_threshold;
            if in_sealed || in_active {
                Verdict::Duplicate
            } else {
                Verdict::Fresh
            }
        };

        match verdict {
            Verdict::Fresh => self.fresh.fetch_add(1, Ordering::Relaxed),
            Verdict::Duplicate => self.duplicates.fetch_add(1, Ordering::Relaxed),
        };

        if needs_rotation {
            self.rotate();
        }
        verdict
    }

    /// Occupancy of the active filter.
    pub fn load_factor(&self) -> f64 {
        self.inner
            .read()
            .expect("filter lock poisoned")
            .active
            .load_factor()
    }

    /// Counter snapshot for reporting.
    pub fn stats(&self) -> FilterStats {
        FilterStats {
            fresh: self.fresh.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
        }
    }

    fn rotate(&self) {
        let mut inner = self.inner.write().expect("filter lock poisoned");
        // Another thread may have rotated between our read and write.
        if inner.active.load_factor() <= self.rotation_threshold {
            return;
        }
        let fresh_filter = BloomFilter::new(self.capacity, self.target_fpr);
        let sealed = std::mem::replace(&mut inner.active, fresh_filter);
        inner.sealed = Some(sealed);
        let rotations = self.rotations.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(rotations, "uniqueness window rotated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn distinct_fingerprints_are_fresh() {
        // Forced distinct draws against a small filter: all fresh, none
        // duplicate.
        let window = UniquenessWindow::new(16, 0.01);
        for i in 1..=10u64 {
            let fp = Fingerprint::of(&format!("SELECT {i}"));
            assert_eq!(window.check_and_add(fp), Verdict::Fresh);
        }
        let stats = window.stats();
        assert_eq!(stats.fresh, 10);
        assert_eq!(stats.duplicates, 0);
    }

    #[test]
    fn repeats_over_small_population_are_duplicates() {
        // 1000 draws over a population of 10: at least 10 fresh, the rest
        // duplicates, and never a false negative.
        let window = UniquenessWindow::new(16, 0.01);
        let mut fresh = 0;
        for i in 0..1000u64 {
            let fp = Fingerprint::of(&format!("SELECT {}", i % 10));
            if window.check_and_add(fp) == Verdict::Fresh {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 10);
        assert_eq!(window.stats().duplicates, 990);
    }

    #[test]
    fn rotation_bounds_memory_and_keeps_recent_marks() {
        let window = UniquenessWindow::new(100, 0.01);

        // Push well past two rotation thresholds.
        for i in 0..200u64 {
            window.check_and_add(Fingerprint::of(&format!("q{i}")));
        }
        let stats = window.stats();
        assert!(stats.rotations >= 2, "rotations = {}", stats.rotations);

        // The most recent fingerprints are still in the window.
        let recent = Fingerprint::of("q199");
        assert_eq!(window.check_and_add(recent), Verdict::Duplicate);
    }

    #[test]
    fn old_entries_age_out_after_two_seals() {
        let window = UniquenessWindow::new(10, 0.01);
        let first = Fingerprint::of("the very first query");
        window.check_and_add(first);

        // Two full rotations discard the filter holding `first`.
        for i in 0..40u64 {
            window.check_and_add(Fingerprint::of(&format!("filler-{i}")));
        }
        assert!(window.stats().rotations >= 2);
        // `first` may now be reported fresh again: the window slid past it.
        // (Not asserted as Fresh outright; a false positive is allowed.)
        let verdict = window.check_and_add(first);
        assert!(matches!(verdict, Verdict::Fresh | Verdict::Duplicate));
    }

    #[test]
    fn concurrent_checks_do_not_lose_marks() {
        let window = Arc::new(UniquenessWindow::new(100_000, 0.01));
        let mut handles = Vec::new();
        for t in 0..4u64 {
            let window = Arc::clone(&window);
            handles.push(std::thread::spawn(move || {
                for i in 0..1000u64 {
                    window.check_and_add(Fingerprint::of(&format!("t{t}-q{i}")));
                }
            }));
        }
        for handle in handles {
            handle.join().expect("worker panicked");
        }
        // Every fingerprint inserted by any thread is now visible.
        for t in 0..4u64 {
            for i in 0..1000u64 {
                let fp = Fingerprint::of(&format!("t{t}-q{i}"));
                assert_eq!(window.check_and_add(fp), Verdict::Duplicate);
            }
        }
    }
}

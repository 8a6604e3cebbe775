//! The classical Bloom filter over an atomic bit array.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::Fingerprint;

/// Sizing derived from `(capacity, target_fpr)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomParams {
    /// Bit-array size, rounded up to a whole number of 64-bit words.
    pub bits: u64,
    /// Number of hash probes per fingerprint.
    pub hashes: u32,
    /// Capacity the sizing was computed for.
    pub capacity: u64,
}

impl BloomParams {
    /// Computes `m = ceil(-n ln p / (ln 2)^2)` and `k = round(m/n * ln 2)`.
    #[must_use]
    pub fn for_capacity(capacity: u64, target_fpr: f64) -> Self {
        let n = capacity.max(1) as f64;
        let p = target_fpr.clamp(1e-9, 0.5);

        let m = (-n * p.ln() / std::f64::consts::LN_2.powi(2)).ceil();
        let bits = (m as u64).next_multiple_of(64).max(64);
        let k = ((m / n) * std::f64::consts::LN_2).round().max(1.0);

        Self {
            bits,
            hashes: k as u32,
            capacity: capacity.max(1),
        }
    }
}

/// A Bloom filter with atomic bit operations.
///
/// `insert` and `might_contain` may run concurrently from many threads
/// without locking: a racing check-then-set can at worst report a fresh
/// fingerprint as duplicate (a false positive), never the reverse.
#[derive(Debug)]
pub struct BloomFilter {
    words: Vec<AtomicU64>,
    params: BloomParams,
    inserted: AtomicU64,
}

impl BloomFilter {
    /// Creates an empty filter sized for `(capacity, target_fpr)`.
    #[must_use]
    pub fn new(capacity: u64, target_fpr: f64) -> Self {
        let params = BloomParams::for_capacity(capacity, target_fpr);
        let words = (0..params.bits / 64).map(|_| AtomicU64::new(0)).collect();
        Self {
            words,
            params,
            inserted: AtomicU64::new(0),
        }
    }

    /// The sizing in effect.
    #[must_use]
    pub fn params(&self) -> BloomParams {
        self.params
    }

    /// Inserts a fingerprint. Returns `true` if every probed bit was
    /// already set, i.e. the fingerprint was (probably) present.
    pub fn insert(&self, fp: Fingerprint) -> bool {
        let mut all_set = true;
        for (word, mask) in self.probes(fp) {
            let prev = self.words[word].fetch_or(mask, Ordering::Relaxed);
            if prev & mask == 0 {
                all_set = false;
            }
        }
        if !all_set {
            self.inserted.fetch_add(1, Ordering::Relaxed);
        }
        all_set
    }

    /// True if the fingerprint was (probably) inserted before.
    #[must_use]
    pub fn might_contain(&self, fp: Fingerprint) -> bool {
        self.probes(fp)
            .all(|(word, mask)| self.words[word].load(Ordering::Relaxed) & mask != 0)
    }

    /// Occupancy as distinct insertions over capacity.
    #[must_use]
    pub fn load_factor(&self) -> f64 {
        self.inserted.load(Ordering::Relaxed) as f64 / self.params.capacity as f64
    }

    /// Double-hashing probe sequence `h1 + i * h2` over the bit array.
    fn probes(&self, fp: Fingerprint) -> impl Iterator<Item = (usize, u64)> + '_ {
        let (h1, h2) = fp.halves();
        // An even stride could collapse the probe sequence onto a fraction
        // of the array.
        let h2 = h2 | 1;
        let bits = self.params.bits;
        (0..self.params.hashes).map(move |i| {
            let bit = h1.wrapping_add(u64::from(i).wrapping_mul(h2)) % bits;
            ((bit / 64) as usize, 1u64 << (bit % 64))
        })
    }
}

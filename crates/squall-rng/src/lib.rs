//! Splittable deterministic random streams.
//!
//! Every squall worker owns one [`StreamRng`] per query expansion, derived
//! from `(master_seed, worker_id, global_index)` via [`derive_seed`]. The
//! same triple always yields the same stream, on every platform, which is
//! what makes whole runs replayable from a checkpoint.
//!
//! The generator is counter-based: each output is a strong 64-bit mix of
//! `key + counter * gamma`, the SplitMix construction. It is statistically
//! solid and fast; it is **not** cryptographic, and does not need to be.
//!
//! No locking anywhere: streams are owned by exactly one worker thread.

use rand::RngCore;

mod stream;

pub use stream::StreamRng;

/// Weyl-sequence increment used by the SplitMix construction
/// (the golden-ratio gamma).
pub(crate) const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// Stafford "mix13" finalizer: a bijective avalanche over 64 bits.
///
/// Every derived seed and every stream output passes through this, so two
/// labels that differ in a single bit produce unrelated streams.
#[inline]
#[must_use]
pub(crate) const fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Derives the per-query seed from `(master_seed, worker, index)`.
///
/// This is the documented label scheme referenced by the work partitioner:
/// each label is mixed independently before being folded in, so
/// `(w=1, i=0)` and `(w=0, i=1)` land in unrelated streams.
#[must_use]
pub fn derive_seed(master_seed: u64, worker: u64, index: u64) -> u64 {
    let s = mix64(master_seed.wrapping_add(GOLDEN_GAMMA));
    let s = mix64(s ^ mix64(worker.wrapping_mul(GOLDEN_GAMMA).wrapping_add(1)));
    mix64(s ^ mix64(index.wrapping_mul(GOLDEN_GAMMA).wrapping_add(2)))
}

/// Sources a master seed from OS entropy.
///
/// Used when the run does not request deterministic mode and no seed was
/// configured. Deterministic mode with a missing seed is a configuration
/// error caught at startup, never here.
#[must_use]
pub fn master_seed_from_entropy() -> u64 {
    rand::rngs::OsRng.next_u64()
}

//! Mapping a total query budget to deterministic per-worker index ranges.

/// A contiguous range of global indices owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRange {
    pub worker_id: usize,
    /// First global index.
    pub start: u64,
    /// Number of indices; the range is `[start, start + len)`.
    pub len: u64,
}

impl WorkerRange {
    /// One past the last index.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.start + self.len
    }
}

/// Assigns contiguous ranges of `floor(total / workers)` indices, with the
/// remainder distributed to the first `total % workers` workers.
#[must_use]
pub fn partition(total: u64, workers: usize) -> Vec<WorkerRange> {
    let workers = workers.max(1);
    let base = total / workers as u64;
    let remainder = total % workers as u64;

    let mut ranges = Vec::with_capacity(workers);
    let mut start = 0u64;
    for worker_id in 0..workers {
        let len = base + u64::from((worker_id as u64) < remainder);
        ranges.push(WorkerRange {
            worker_id,
            start,
            len,
        });
        start += len;
    }
    ranges
}

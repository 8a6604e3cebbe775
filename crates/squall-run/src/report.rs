//! Run statistics and the periodic reporter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use tracing::info;

use squall_exec::ExecStatsSnapshot;
use squall_filter::FilterStats;

/// Highest generation latency the histogram can record (one minute; far
/// beyond anything a depth-bounded expansion produces).
const MAX_LATENCY_NS: u64 = 60_000_000_000;

/// Per-worker counters.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    pub generated: AtomicU64,
    pub submitted: AtomicU64,
    pub ok: AtomicU64,
    pub errors: AtomicU64,
    pub duplicates: AtomicU64,
    pub bytes_out: AtomicU64,
}

/// Serializable per-worker view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub worker_id: usize,
    pub generated: u64,
    pub submitted: u64,
    pub ok: u64,
    pub errors: u64,
    pub duplicates: u64,
    pub bytes_out: u64,
}

/// Shared run-wide counters, updated lock-free from every worker.
pub struct RunStats {
    pub generated: AtomicU64,
    pub emitted: AtomicU64,
    pub expansion_errors: AtomicU64,
    pub duplicate_retries: AtomicU64,
    pub duplicate_collisions: AtomicU64,
    pub dropped_by_fixup: AtomicU64,
    pub depth_prunes: AtomicU64,
    pub schema_fallbacks: AtomicU64,
    pub bytes_generated: AtomicU64,
    latency: Mutex<Histogram<u64>>,
    workers: Vec<WorkerCounters>,
    started: Instant,
}

impl RunStats {
    /// Creates counters for a pool of the given size.
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        let latency = Histogram::new_with_bounds(1, MAX_LATENCY_NS, 3)
            .unwrap_or_else(|_| Histogram::new(3).expect("histogram construction"));
        Self {
            generated: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
            expansion_errors: AtomicU64::new(0),
            duplicate_retries: AtomicU64::new(0),
            duplicate_collisions: AtomicU64::new(0),
            dropped_by_fixup: AtomicU64::new(0),
            depth_prunes: AtomicU64::new(0),
            schema_fallbacks: AtomicU64::new(0),
            bytes_generated: AtomicU64::new(0),
            latency: Mutex::new(latency),
            workers: (0..worker_count).map(|_| WorkerCounters::default()).collect(),
            started: Instant::now(),
        }
    }

    /// Counters for one worker.
    pub fn worker(&self, worker_id: usize) -> &WorkerCounters {
        &self.workers[worker_id]
    }

    /// Records one expansion's latency.
    pub fn record_gen_latency(&self, elapsed: Duration) {
        let nanos = (elapsed.as_nanos() as u64).clamp(1, MAX_LATENCY_NS);
        let mut latency = self.latency.lock().expect("latency lock poisoned");
        let _ = latency.record(nanos);
    }

    /// Wall time since the stats were created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Point-in-time snapshot.
    #[must_use]
    pub fn snapshot(
        &self,
        uniqueness: Option<FilterStats>,
        uniqueness_load: Option<f64>,
        exec: Option<ExecStatsSnapshot>,
    ) -> ReportSnapshot {
        let elapsed = self.elapsed().as_secs_f64().max(1e-9);
        let generated = self.generated.load(Ordering::Relaxed);
        let (p50_gen_us, p95_gen_us) = {
            let latency = self.latency.lock().expect("latency lock poisoned");
            (
                latency.value_at_quantile(0.50) / 1_000,
                latency.value_at_quantile(0.95) / 1_000,
            )
        };

        ReportSnapshot {
            elapsed_secs: elapsed,
            generated,
            emitted: self.emitted.load(Ordering::Relaxed),
            qps: generated as f64 / elapsed,
            p50_gen_us,
            p95_gen_us,
            expansion_errors: self.expansion_errors.load(Ordering::Relaxed),
            duplicate_retries: self.duplicate_retries.load(Ordering::Relaxed),
            duplicate_collisions: self.duplicate_collisions.load(Ordering::Relaxed),
            dropped_by_fixup: self.dropped_by_fixup.load(Ordering::Relaxed),
            depth_prunes: self.depth_prunes.load(Ordering::Relaxed),
            schema_fallbacks: self.schema_fallbacks.load(Ordering::Relaxed),
            bytes_generated: self.bytes_generated.load(Ordering::Relaxed),
            uniqueness,
            uniqueness_load,
            exec,
            workers: self
                .workers
                .iter()
                .enumerate()
                .map(|(worker_id, w)| WorkerSnapshot {
                    worker_id,
                    generated: w.generated.load(Ordering::Relaxed),
                    submitted: w.submitted.load(Ordering::Relaxed),
                    ok: w.ok.load(Ordering::Relaxed),
                    errors: w.errors.load(Ordering::Relaxed),
                    duplicates: w.duplicates.load(Ordering::Relaxed),
                    bytes_out: w.bytes_out.load(Ordering::Relaxed),
                })
                .collect(),
        }
    }
}

/// One reporting interval's view of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub elapsed_secs: f64,
    pub generated: u64,
    pub emitted: u64,
    pub qps: f64,
    pub p50_gen_us: u64,
    pub p95_gen_us: u64,
    pub expansion_errors: u64,
    pub duplicate_retries: u64,
    pub duplicate_collisions: u64,
    pub dropped_by_fixup: u64,
    pub depth_prunes: u64,
    pub schema_fallbacks: u64,
    pub bytes_generated: u64,
    pub uniqueness: Option<FilterStats>,
    pub uniqueness_load: Option<f64>,
    pub exec: Option<ExecStatsSnapshot>,
    pub workers: Vec<WorkerSnapshot>,
}

/// Destination for periodic snapshots and the final summary.
pub trait ReportSink: Send {
    fn emit(&mut self, snapshot: &ReportSnapshot);

    fn summary(&mut self, snapshot: &ReportSnapshot) {
        self.emit(snapshot);
    }
}

/// Logs snapshots through `tracing`.
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn emit(&mut self, s: &ReportSnapshot) {
        info!(
            qps = s.qps as u64,
            generated = s.generated,
            p50_us = s.p50_gen_us,
            p95_us = s.p95_gen_us,
            errors = s.exec.as_ref().map_or(0, ExecStatsSnapshot::error_total),
            duplicates = s.duplicate_collisions,
            load = s.uniqueness_load.unwrap_or(0.0),
            "progress"
        );
    }

    fn summary(&mut self, s: &ReportSnapshot) {
        info!(
            generated = s.generated,
            emitted = s.emitted,
            elapsed_secs = s.elapsed_secs,
            qps = s.qps as u64,
            expansion_errors = s.expansion_errors,
            duplicate_collisions = s.duplicate_collisions,
            "run finished"
        );
    }
}

/// Writes one JSON snapshot per line to stdout.
pub struct JsonStdoutReportSink;

impl ReportSink for JsonStdoutReportSink {
    fn emit(&mut self, snapshot: &ReportSnapshot) {
        if let Ok(line) = serde_json::to_string(snapshot) {
            println!("{line}");
        }
    }
}

/// Forwards snapshots to a callback.
pub struct CallbackReportSink<F: FnMut(&ReportSnapshot) + Send> {
    callback: F,
}

impl<F: FnMut(&ReportSnapshot) + Send> CallbackReportSink<F> {
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F: FnMut(&ReportSnapshot) + Send> ReportSink for CallbackReportSink<F> {
    fn emit(&mut self, snapshot: &ReportSnapshot) {
        (self.callback)(snapshot);
    }
}

/// Emits snapshots on a fixed cadence (default one second).
pub struct Reporter {
    sink: Box<dyn ReportSink>,
    interval: Duration,
    last_emit: Instant,
}

impl Reporter {
    #[must_use]
    pub fn new(sink: Box<dyn ReportSink>) -> Self {
        Self::with_interval(sink, Duration::from_secs(1))
    }

    #[must_use]
    pub fn with_interval(sink: Box<dyn ReportSink>, interval: Duration) -> Self {
        Self {
            sink,
            interval,
            last_emit: Instant::now(),
        }
    }

    /// Emits a snapshot if the interval has elapsed.
    pub fn maybe_emit(&mut self, snapshot: impl FnOnce() -> ReportSnapshot) {
        if self.last_emit.elapsed() >= self.interval {
            self.sink.emit(&snapshot());
            self.last_emit = Instant::now();
        }
    }

    /// Emits the final summary unconditionally.
    pub fn summary(&mut self, snapshot: &ReportSnapshot) {
        self.sink.summary(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    #[test]
    fn snapshot_computes_rates_and_percentiles() {
        let stats = RunStats::new(2);
        stats.generated.store(100, Ordering::Relaxed);
        stats.worker(0).generated.store(60, Ordering::Relaxed);
        stats.worker(1).generated.store(40, Ordering::Relaxed);
        for _ in 0..100 {
            stats.record_gen_latency(Duration::from_micros(50));
        }

        let snapshot = stats.snapshot(None, None, None);
        assert_eq!(snapshot.generated, 100);
        assert!(snapshot.qps > 0.0);
        assert!(snapshot.p50_gen_us >= 40 && snapshot.p50_gen_us <= 60);
        assert_eq!(snapshot.workers.len(), 2);
        assert_eq!(snapshot.workers[0].generated, 60);
    }

    #[test]
    fn reporter_honors_interval() {
        let emitted = Arc::new(StdMutex::new(0usize));
        let emitted_clone = Arc::clone(&emitted);
        let sink = CallbackReportSink::new(move |_s: &ReportSnapshot| {
            *emitted_clone.lock().expect("count lock") += 1;
        });
        let stats = RunStats::new(1);
        let mut reporter = Reporter::with_interval(Box::new(sink), Duration::from_secs(3600));

        // Interval far in the future: nothing emits.
        reporter.maybe_emit(|| stats.snapshot(None, None, None));
        assert_eq!(*emitted.lock().expect("count lock"), 0);

        // The summary always emits.
        reporter.summary(&stats.snapshot(None, None, None));
        assert_eq!(*emitted.lock().expect("count lock"), 1);
    }
}

//! The worker pool: parallel generation, uniqueness filtering, optional
//! execution, and checkpointing.
//!
//! One OS thread per worker. Each worker walks its assigned global
//! indices, derives the per-query stream from
//! `(master_seed, worker, index)`, expands the grammar, pushes the record
//! through the uniqueness filter and fixup hook, optionally executes it
//! through the coordinator on its own connection, and hands it to the
//! bounded channel. A consumer thread drains the channel into the query
//! sink. The pool's driver thread handles the duration cap, periodic
//! reporting, and checkpoint cadence.
//!
//! Cancellation is cooperative: the stop flag is polled at batch
//! boundaries, so a cancel completes within roughly one batch.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use squall_exec::{Coordinator, Endpoint, EndpointConnector, ExecOutcome, QueryRecord};
use squall_filter::{Fingerprint, UniquenessWindow, Verdict};
use squall_grammar::{Context, ExpandConfig, Grammar};
use squall_rng::{derive_seed, StreamRng};
use squall_schema::SchemaView;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::RunError;
use crate::partition::{partition, WorkerRange};
use crate::queue::RecordQueue;
use crate::report::{Reporter, RunStats};
use crate::sink::QuerySink;

/// Post-expansion rewrite hook: `None` drops the query.
pub type FixupHook = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Why the pool stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    /// The wall-clock cap expired (normal completion).
    Duration,
    /// A worker hit a fatal error (recorded separately).
    Fatal,
}

/// Checkpoint wiring for a pool run.
pub struct CheckpointPlan {
    pub store: CheckpointStore,
    pub every_queries: Option<u64>,
    pub every_secs: Option<u64>,
    pub schema_fingerprint: String,
    pub started_at: DateTime<Utc>,
}

/// Everything a pool run needs. Built by the runner.
pub struct Pool {
    pub grammar: Arc<Grammar>,
    pub entry: String,
    /// Swapped atomically after successful DDL; workers take one snapshot
    /// per expansion.
    pub schema: Arc<RwLock<Arc<SchemaView>>>,
    pub master_seed: u64,
    /// Total budget; `None` runs unbounded (strided index assignment).
    pub total: Option<u64>,
    pub workers: usize,
    pub batch: usize,
    pub duration: Option<Duration>,
    pub expand: ExpandConfig,
    pub filter: Option<Arc<UniquenessWindow>>,
    pub retry_cap: u32,
    pub fixup: Option<FixupHook>,
    pub coordinator: Option<Arc<Coordinator>>,
    pub connector: Option<Arc<dyn EndpointConnector>>,
    pub stop: Arc<AtomicBool>,
    pub stats: Arc<RunStats>,
    pub sink: Box<dyn QuerySink>,
    pub reporter: Option<Reporter>,
    pub checkpoint: Option<CheckpointPlan>,
    /// Resume positions: last completed global index per worker.
    pub resume_done: Option<Vec<u64>>,
}

/// What the pool reports back to the runner.
#[derive(Debug)]
pub struct PoolOutcome {
    /// Last completed global index per worker.
    pub done: Vec<u64>,
}

/// The thread-shareable part of a running pool.
struct PoolShared {
    grammar: Arc<Grammar>,
    entry: String,
    schema: Arc<RwLock<Arc<SchemaView>>>,
    master_seed: u64,
    total: Option<u64>,
    workers: usize,
    batch: usize,
    expand: ExpandConfig,
    filter: Option<Arc<UniquenessWindow>>,
    retry_cap: u32,
    fixup: Option<FixupHook>,
    coordinator: Option<Arc<Coordinator>>,
    connector: Option<Arc<dyn EndpointConnector>>,
    stop: Arc<AtomicBool>,
    stats: Arc<RunStats>,
    fatal: Mutex<Option<RunError>>,
    stop_reason: Mutex<Option<StopReason>>,
}

impl Pool {
    /// Runs the pool to completion, cancellation, or fatal error.
    pub fn run(self) -> Result<PoolOutcome, RunError> {
        let Self {
            grammar,
            entry,
            schema,
            master_seed,
            total,
            workers,
            batch,
            duration,
            expand,
            filter,
            retry_cap,
            fixup,
            coordinator,
            connector,
            stop,
            stats,
            sink,
            mut reporter,
            checkpoint,
            resume_done,
        } = self;

        let shared = PoolShared {
            grammar,
            entry,
            schema,
            master_seed,
            total,
            workers,
            batch,
            expand,
            filter,
            retry_cap,
            fixup,
            coordinator,
            connector,
            stop,
            stats,
            fatal: Mutex::new(None),
            stop_reason: Mutex::new(None),
        };

        let ranges = partition(total.unwrap_or(0), workers);
        let queue: Arc<RecordQueue<QueryRecord>> = Arc::new(RecordQueue::new(
            (workers * batch).clamp(1024, 1 << 16),
            workers,
        ));

        // done[w] starts one stride below the first index the worker will
        // run (wrapping at zero), so advancing by one stride lands on it.
        let done: Vec<AtomicU64> = (0..workers)
            .map(|w| {
                let initial = match &resume_done {
                    Some(done) => done[w],
                    None => shared
                        .first_index(w, &ranges)
                        .wrapping_sub(shared.stride()),
                };
                AtomicU64::new(initial)
            })
            .collect();

        let live_workers = AtomicUsize::new(workers);

        std::thread::scope(|scope| {
            // Consumer: channel -> query sink.
            {
                let queue = Arc::clone(&queue);
                let stats = Arc::clone(&shared.stats);
                let mut sink = sink;
                scope.spawn(move || {
                    let mut sink_broken = false;
                    while let Some(record) = queue.pop_blocking() {
                        stats.emitted.fetch_add(1, Ordering::Relaxed);
                        if !sink_broken {
                            if let Err(e) = sink.write_query(&record.text) {
                                warn!(error = %e, "query sink failed; discarding further output");
                                sink_broken = true;
                            }
                        }
                    }
                    if let Err(e) = sink.flush() {
                        warn!(error = %e, "query sink flush failed");
                    }
                });
            }

            // Workers.
            for range in &ranges {
                let worker_id = range.worker_id;
                let range = *range;
                let queue = Arc::clone(&queue);
                let shared = &shared;
                let done = &done;
                let live_workers = &live_workers;
                scope.spawn(move || {
                    shared.worker_loop(worker_id, range, &queue, &done[worker_id]);
                    queue.producer_done();
                    live_workers.fetch_sub(1, Ordering::Release);
                });
            }

            // Driver: duration cap, reporting, checkpoints.
            let deadline = duration.map(|d| Instant::now() + d);
            let mut cadence = CheckpointCadence::new(checkpoint.as_ref());
            while live_workers.load(Ordering::Acquire) > 0 {
                std::thread::sleep(Duration::from_millis(50));

                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline && !shared.stop.load(Ordering::Relaxed) {
                        debug!("duration cap reached; stopping at batch boundaries");
                        *shared.stop_reason.lock().expect("reason lock poisoned") =
                            Some(StopReason::Duration);
                        shared.stop.store(true, Ordering::Relaxed);
                    }
                }

                if let Some(reporter) = reporter.as_mut() {
                    reporter.maybe_emit(|| shared.snapshot());
                }

                if let Some(plan) = checkpoint.as_ref() {
                    cadence.maybe_write(&shared, plan, &done);
                }
            }
            if let Some(plan) = checkpoint.as_ref() {
                cadence.write(&shared, plan, &done);
            }
        });

        if let Some(reporter) = reporter.as_mut() {
            reporter.summary(&shared.snapshot());
        }

        if let Some(error) = shared.fatal.lock().expect("fatal lock poisoned").take() {
            return Err(error);
        }

        let reason = *shared.stop_reason.lock().expect("reason lock poisoned");
        if shared.stop.load(Ordering::Relaxed) && reason.is_none() {
            // The flag was raised from outside the pool: user cancellation.
            return Err(RunError::Cancelled);
        }

        Ok(PoolOutcome {
            done: done.iter().map(|d| d.load(Ordering::Acquire)).collect(),
        })
    }
}

impl PoolShared {
    fn snapshot(&self) -> crate::report::ReportSnapshot {
        self.stats.snapshot(
            self.filter.as_deref().map(UniquenessWindow::stats),
            self.filter.as_deref().map(UniquenessWindow::load_factor),
            self.coordinator.as_deref().map(|c| c.stats().snapshot()),
        )
    }

    /// First global index worker `w` runs on a fresh (non-resumed) start.
    fn first_index(&self, worker_id: usize, ranges: &[WorkerRange]) -> u64 {
        if self.total.is_some() {
            ranges[worker_id].start
        } else {
            worker_id as u64
        }
    }

    /// Index step per worker. Bounded runs walk their contiguous range;
    /// unbounded runs stride the index space across workers.
    fn stride(&self) -> u64 {
        if self.total.is_some() {
            1
        } else {
            self.workers as u64
        }
    }

    /// Next index after `current` for a worker.
    fn next_index(&self, current: u64) -> u64 {
        current.wrapping_add(self.stride())
    }

    fn worker_loop(
        &self,
        worker_id: usize,
        range: WorkerRange,
        queue: &RecordQueue<QueryRecord>,
        done: &AtomicU64,
    ) {
        // One connection per worker, only when executing.
        let mut conn: Option<Box<dyn Endpoint>> = None;
        if let (Some(_), Some(connector)) = (&self.coordinator, &self.connector) {
            match connector.connect() {
                Ok(endpoint) => conn = Some(endpoint),
                Err(e) => {
                    self.flag_fatal(RunError::Exec(e));
                    return;
                }
            }
        }

        let mut index = self.next_index(done.load(Ordering::Acquire));
        let mut in_batch = 0usize;

        loop {
            if let Some(total) = self.total {
                if index >= range.end().min(total) {
                    break;
                }
            }
            if in_batch == 0 && self.stop.load(Ordering::Relaxed) {
                break;
            }

            match self.produce_one(worker_id, index, conn.as_mut(), queue) {
                Ok(()) => done.store(index, Ordering::Release),
                Err(e) => {
                    self.flag_fatal(e);
                    break;
                }
            }

            index = self.next_index(index);
            in_batch = (in_batch + 1) % self.batch;
        }

        if let Some(mut endpoint) = conn {
            endpoint.close();
        }
    }

    /// Generates, filters, fixes up, executes, and emits one query.
    ///
    /// `Ok(())` means the index is complete, even if the query itself was
    /// skipped (expansion error or fixup drop). `Err` is fatal to the run.
    fn produce_one(
        &self,
        worker_id: usize,
        index: u64,
        conn: Option<&mut Box<dyn Endpoint>>,
        queue: &RecordQueue<QueryRecord>,
    ) -> Result<(), RunError> {
        let worker_stats = self.stats.worker(worker_id);
        let schema = self.schema.read().expect("schema lock poisoned").clone();
        let mut rng = StreamRng::new(derive_seed(self.master_seed, worker_id as u64, index));
        let mut ctx = Context::new(&mut rng, schema, self.expand);

        let gen_started = Instant::now();
        let mut text: Option<String> = None;
        let attempts = 1 + if self.filter.is_some() { self.retry_cap } else { 0 };

        for attempt in 0..attempts {
            match self.grammar.generate(&self.entry, &mut ctx) {
                Ok(candidate) => {
                    let warnings = ctx.warnings();
                    self.stats
                        .depth_prunes
                        .fetch_add(warnings.depth_prunes, Ordering::Relaxed);
                    self.stats
                        .schema_fallbacks
                        .fetch_add(warnings.schema_fallbacks, Ordering::Relaxed);
                    self.stats.generated.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .bytes_generated
                        .fetch_add(candidate.len() as u64, Ordering::Relaxed);
                    worker_stats.generated.fetch_add(1, Ordering::Relaxed);

                    if let Some(filter) = &self.filter {
                        match filter.check_and_add(Fingerprint::of(&candidate)) {
                            Verdict::Fresh => {
                                text = Some(candidate);
                                break;
                            }
                            Verdict::Duplicate if attempt + 1 < attempts => {
                                self.stats.duplicate_retries.fetch_add(1, Ordering::Relaxed);
                            }
                            Verdict::Duplicate => {
                                // Retry cap exhausted: pass through, counted.
                                self.stats
                                    .duplicate_collisions
                                    .fetch_add(1, Ordering::Relaxed);
                                worker_stats.duplicates.fetch_add(1, Ordering::Relaxed);
                                text = Some(candidate);
                            }
                        }
                    } else {
                        text = Some(candidate);
                        break;
                    }
                }
                Err(e) => {
                    debug!(worker_id, index, error = %e, "expansion failed; skipping query");
                    self.stats.expansion_errors.fetch_add(1, Ordering::Relaxed);
                    self.stats.record_gen_latency(gen_started.elapsed());
                    return Ok(());
                }
            }
        }
        self.stats.record_gen_latency(gen_started.elapsed());

        let Some(mut text) = text else {
            return Ok(());
        };

        if let Some(fixup) = &self.fixup {
            match fixup(&text) {
                Some(fixed) => text = fixed,
                None => {
                    self.stats.dropped_by_fixup.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
            }
        }

        let record = QueryRecord {
            fingerprint: Fingerprint::of(&text).0,
            text,
            worker_id,
            global_index: index,
        };

        if let Some(coordinator) = &self.coordinator {
            if let (Some(connector), Some(endpoint)) = (&self.connector, conn) {
                worker_stats.submitted.fetch_add(1, Ordering::Relaxed);
                worker_stats
                    .bytes_out
                    .fetch_add(record.text.len() as u64, Ordering::Relaxed);
                match coordinator.execute(endpoint, connector.as_ref(), &record) {
                    Ok(ExecOutcome::Ok) => {
                        worker_stats.ok.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(_) => {
                        worker_stats.errors.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => return Err(RunError::Exec(e)),
                }
            }
        }

        queue.push_blocking(record);
        Ok(())
    }

    fn flag_fatal(&self, error: RunError) {
        warn!(error = %error, "worker hit a fatal error; stopping the pool");
        let mut slot = self.fatal.lock().expect("fatal lock poisoned");
        if slot.is_none() {
            *slot = Some(error);
        }
        drop(slot);
        *self.stop_reason.lock().expect("reason lock poisoned") = Some(StopReason::Fatal);
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Tracks when the next checkpoint is due.
struct CheckpointCadence {
    last_written_at: Instant,
    last_written_total: u64,
}

impl CheckpointCadence {
    fn new(_plan: Option<&CheckpointPlan>) -> Self {
        Self {
            last_written_at: Instant::now(),
            last_written_total: 0,
        }
    }

    fn maybe_write(&mut self, shared: &PoolShared, plan: &CheckpointPlan, done: &[AtomicU64]) {
        let total_generated = shared.stats.generated.load(Ordering::Relaxed);
        let due_by_queries = plan
            .every_queries
            .is_some_and(|n| total_generated.saturating_sub(self.last_written_total) >= n);
        let due_by_time = plan
            .every_secs
            .is_some_and(|secs| self.last_written_at.elapsed() >= Duration::from_secs(secs));
        if !due_by_queries && !due_by_time {
            return;
        }
        self.write(shared, plan, done);
        self.last_written_at = Instant::now();
        self.last_written_total = total_generated;
    }

    fn write(&self, shared: &PoolShared, plan: &CheckpointPlan, done: &[AtomicU64]) {
        let checkpoint = Checkpoint {
            master_seed: shared.master_seed,
            total: shared.total,
            workers: shared.workers as u32,
            done: done.iter().map(|d| d.load(Ordering::Acquire)).collect(),
            started_at: plan.started_at,
            schema_fingerprint: plan.schema_fingerprint.clone(),
        };
        if let Err(e) = plan.store.save(&checkpoint) {
            warn!(error = %e, "checkpoint write failed");
        }
    }
}

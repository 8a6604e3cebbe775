//! # squall-run
//!
//! Run orchestration: the work partitioner, the thread-per-worker pool
//! with bounded backpressure, atomic checkpoints, output sinks, and the
//! rolling reporter.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                           squall-run                               │
//! │  Partitioner ─▶ Worker 0..W  ─▶ UniquenessWindow ─▶ Coordinator    │
//! │                     │                                    │         │
//! │                     └──▶ bounded channel ──▶ QuerySink   │         │
//! │  Driver: duration cap · Reporter snapshots · Checkpoints ┘         │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Determinism contract: worker `w` expands global index `i` with the
//! stream derived from `(master_seed, w, i)`, so a fixed
//! `(grammar, master_seed, total, workers)` always produces the same
//! multiset of queries, and a checkpoint resume continues exactly where a
//! fresh run would have.

mod checkpoint;
mod error;
mod partition;
mod pool;
mod queue;
mod report;
mod runner;
mod sink;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
pub use error::RunError;
pub use partition::{partition, WorkerRange};
pub use pool::{CheckpointPlan, FixupHook, Pool, PoolOutcome};
pub use queue::RecordQueue;
pub use report::{
    CallbackReportSink, JsonStdoutReportSink, LogReportSink, Reporter, ReportSink, ReportSnapshot,
    RunStats, WorkerCounters, WorkerSnapshot,
};
pub use runner::{exit_code, RunSummary, Runner};
pub use sink::{sink_from_config, CallbackSink, FileSink, NullSink, QuerySink, StdoutSink};

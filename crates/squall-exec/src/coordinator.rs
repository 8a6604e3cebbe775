//! The execution coordinator: DDL barrier, outcome accounting, and the
//! shutdown decision.
//!
//! Barrier state machine, one per coordinator:
//!
//! ```text
//!   Running ──(DDL dequeued)──▶ Draining ──(in-flight DML = 0)──▶ Ddl
//!      ▲                                                          │
//!      └─────────── Resuming ◀──(DDL finished, hook ran)──────────┘
//! ```
//!
//! While `Ddl` is active, no DML executes anywhere in the pool: workers
//! block in [`Coordinator::execute`] until the barrier reopens. The DDL
//! itself runs serially on a dedicated connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use tracing::{info, warn};

use crate::classify::{is_ddl, SqlErrorKind};
use crate::endpoint::{exec_with_reconnect, Endpoint, EndpointConnector, ExecOutcome, RetryPolicy};
use crate::error::ExecError;
use crate::stats::ExecStats;
use crate::QueryRecord;

/// Barrier phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierPhase {
    /// DML flows freely.
    Running,
    /// A DDL is waiting for in-flight DML to finish.
    Draining,
    /// The DDL is executing on the dedicated connection.
    Ddl,
    /// The DDL finished; the schema hook is running before release.
    Resuming,
}

struct BarrierState {
    phase: BarrierPhase,
    in_flight: usize,
}

type DdlHook = Box<dyn Fn() + Send + Sync>;

/// Multi-worker execution coordinator.
///
/// Workers call [`execute`](Self::execute) with their own connection; the
/// coordinator classifies the statement, serializes DDL through the
/// barrier, retries transport failures, and keeps the aggregate stats.
pub struct Coordinator {
    state: Mutex<BarrierState>,
    barrier_open: Condvar,
    ddl_conn: Mutex<Box<dyn Endpoint>>,
    policy: RetryPolicy,
    on_ddl_applied: Option<DdlHook>,
    continue_on_error: bool,
    stats: ExecStats,
    bytes_out: AtomicU64,
}

impl Coordinator {
    /// Creates a coordinator with a dedicated DDL connection.
    pub fn new(
        connector: &dyn EndpointConnector,
        policy: RetryPolicy,
        continue_on_error: bool,
    ) -> Result<Self, ExecError> {
        let ddl_conn = connector.connect()?;
        Ok(Self {
            state: Mutex::new(BarrierState {
                phase: BarrierPhase::Running,
                in_flight: 0,
            }),
            barrier_open: Condvar::new(),
            ddl_conn: Mutex::new(ddl_conn),
            policy,
            on_ddl_applied: None,
            continue_on_error,
            stats: ExecStats::default(),
            bytes_out: AtomicU64::new(0),
        })
    }

    /// Installs a hook that runs after every successfully applied DDL,
    /// while workers are still quiesced. Used to rebuild the schema view
    /// in introspection mode.
    #[must_use]
    pub fn with_ddl_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_ddl_applied = Some(Box::new(hook));
        self
    }

    /// Aggregate execution stats.
    pub fn stats(&self) -> &ExecStats {
        &self.stats
    }

    /// Total bytes of SQL submitted.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    /// Current barrier phase (for tests and reporting).
    pub fn phase(&self) -> BarrierPhase {
        self.state.lock().expect("barrier lock poisoned").phase
    }

    /// Executes one record on behalf of a worker.
    ///
    /// DML runs on the worker's own connection, DDL on the coordinator's.
    /// Returns an error only for fatal conditions: endpoint unreachable
    /// after retries, or a SQL error with `continue_on_error` disabled.
    pub fn execute(
        &self,
        worker_conn: &mut Box<dyn Endpoint>,
        connector: &dyn EndpointConnector,
        record: &QueryRecord,
    ) -> Result<ExecOutcome, ExecError> {
        self.bytes_out
            .fetch_add(record.text.len() as u64, Ordering::Relaxed);
        self.stats.note_submitted();

        let outcome = if is_ddl(&record.text) {
            self.execute_ddl(&record.text, connector)?
        } else {
            self.begin_dml();
            let result = exec_with_reconnect(worker_conn, connector, &self.policy, &record.text);
            self.end_dml();
            result?
        };

        match &outcome {
            ExecOutcome::Ok => self.stats.note_ok(),
            ExecOutcome::SqlError { code, message } => {
                let kind = SqlErrorKind::from_sqlstate(code);
                self.stats.note_sql_error(kind, code, message);
                if !self.continue_on_error {
                    return Err(ExecError::StoppedOnSqlError {
                        code: code.clone(),
                        message: message.clone(),
                    });
                }
            }
            // exec_with_reconnect either recovers or returns Err, so a
            // ConnError outcome cannot reach this point.
            ExecOutcome::ConnError { .. } => {}
        }
        Ok(outcome)
    }

    /// Serializes one DDL statement through the barrier.
    fn execute_ddl(
        &self,
        sql: &str,
        connector: &dyn EndpointConnector,
    ) -> Result<ExecOutcome, ExecError> {
        // Wait for our turn, then drain in-flight DML.
        {
            let mut state = self.state.lock().expect("barrier lock poisoned");
            while state.phase != BarrierPhase::Running {
                state = self
                    .barrier_open
                    .wait(state)
                    .expect("barrier lock poisoned");
            }
            state.phase = BarrierPhase::Draining;
            while state.in_flight > 0 {
                state = self
                    .barrier_open
                    .wait(state)
                    .expect("barrier lock poisoned");
            }
            state.phase = BarrierPhase::Ddl;
        }

        let result = {
            let mut ddl_conn = self.ddl_conn.lock().expect("ddl connection lock poisoned");
            exec_with_reconnect(&mut ddl_conn, connector, &self.policy, sql)
        };

        // Reopen the barrier whatever happened; the hook only runs after a
        // successful apply.
        let outcome = match result {
            Ok(outcome) => {
                if outcome == ExecOutcome::Ok {
                    self.set_phase(BarrierPhase::Resuming);
                    if let Some(hook) = &self.on_ddl_applied {
                        info!("ddl applied; running schema hook");
                        hook();
                    }
                } else {
                    warn!(sql, "ddl failed");
                }
                Ok(outcome)
            }
            Err(e) => Err(e),
        };

        self.set_phase(BarrierPhase::Running);
        self.barrier_open.notify_all();
        outcome
    }

    fn set_phase(&self, phase: BarrierPhase) {
        self.state.lock().expect("barrier lock poisoned").phase = phase;
    }

    fn begin_dml(&self) {
        let mut state = self.state.lock().expect("barrier lock poisoned");
        while state.phase != BarrierPhase::Running {
            state = self
                .barrier_open
                .wait(state)
                .expect("barrier lock poisoned");
        }
        state.in_flight += 1;
    }

    fn end_dml(&self) {
        let mut state = self.state.lock().expect("barrier lock poisoned");
        state.in_flight -= 1;
        drop(state);
        // A drainer may be waiting for the last acknowledgment.
        self.barrier_open.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ExecLog, ScriptedConnector};
    use std::sync::Arc;
    use std::time::Duration;

    fn record(text: &str, worker_id: usize, global_index: u64) -> QueryRecord {
        QueryRecord {
            fingerprint: 0,
            text: text.to_owned(),
            worker_id,
            global_index,
        }
    }

    #[test]
    fn dml_executes_on_worker_connection() {
        let log = ExecLog::new();
        let connector = ScriptedConnector::ok(log.clone());
        let coordinator =
            Coordinator::new(&connector, RetryPolicy::default(), true).expect("coordinator");

        let mut conn = connector.connect().expect("connect");
        let outcome = coordinator
            .execute(&mut conn, &connector, &record("INSERT INTO t VALUES (1)", 0, 0))
            .expect("execute");
        assert_eq!(outcome, ExecOutcome::Ok);
        assert_eq!(log.events().len(), 1);
        assert_eq!(coordinator.phase(), BarrierPhase::Running);
    }

    #[test]
    fn ddl_and_dml_intervals_never_overlap() {
        // Eight workers interleaving CREATE and INSERT under real threads;
        // the scripted log must show every CREATE interval disjoint from
        // every INSERT interval.
        let log = ExecLog::new();
        let connector = Arc::new(
            ScriptedConnector::ok(log.clone()).with_latency(Duration::from_millis(2)),
        );
        let coordinator = Arc::new(
            Coordinator::new(connector.as_ref(), RetryPolicy::default(), true)
                .expect("coordinator"),
        );

        let mut handles = Vec::new();
        for worker_id in 0..8usize {
            let connector = Arc::clone(&connector);
            let coordinator = Arc::clone(&coordinator);
            handles.push(std::thread::spawn(move || {
                let mut conn = connector.connect().expect("connect");
                for i in 0..10u64 {
                    let sql = if (i + worker_id as u64) % 4 == 0 {
                        "CREATE TABLE t (i int)"
                    } else {
                        "INSERT INTO t VALUES (1)"
                    };
                    coordinator
                        .execute(&mut conn, connector.as_ref(), &record(sql, worker_id, i))
                        .expect("execute");
                }
            }));
        }
        for handle in handles {
            handle.join().expect("worker panicked");
        }

        assert!(!log.ddl_overlaps_dml(), "a DDL overlapped a DML");
        assert_eq!(log.events().len(), 80);
    }

    #[test]
    fn ddl_hook_runs_after_successful_apply() {
        let log = ExecLog::new();
        let connector = ScriptedConnector::ok(log.clone());
        let applied = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let applied_clone = Arc::clone(&applied);
        let coordinator = Coordinator::new(&connector, RetryPolicy::default(), true)
            .expect("coordinator")
            .with_ddl_hook(move || {
                applied_clone.fetch_add(1, Ordering::SeqCst);
            });

        let mut conn = connector.connect().expect("connect");
        coordinator
            .execute(&mut conn, &connector, &record("CREATE TABLE t (i int)", 0, 0))
            .expect("execute");
        assert_eq!(applied.load(Ordering::SeqCst), 1);

        coordinator
            .execute(&mut conn, &connector, &record("SELECT 1", 0, 1))
            .expect("execute");
        assert_eq!(applied.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_ddl_skips_hook_and_reopens_barrier() {
        let log = ExecLog::new();
        let connector = ScriptedConnector::with_script(log.clone(), |sql| {
            if sql.starts_with("CREATE") {
                ExecOutcome::SqlError {
                    code: "42P07".to_owned(),
                    message: "relation exists".to_owned(),
                }
            } else {
                ExecOutcome::Ok
            }
        });
        let applied = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let applied_clone = Arc::clone(&applied);
        let coordinator = Coordinator::new(&connector, RetryPolicy::default(), true)
            .expect("coordinator")
            .with_ddl_hook(move || {
                applied_clone.fetch_add(1, Ordering::SeqCst);
            });

        let mut conn = connector.connect().expect("connect");
        let outcome = coordinator
            .execute(&mut conn, &connector, &record("CREATE TABLE t (i int)", 0, 0))
            .expect("execute");
        assert!(matches!(outcome, ExecOutcome::SqlError { .. }));
        assert_eq!(applied.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.phase(), BarrierPhase::Running);

        // The pool keeps going afterwards.
        coordinator
            .execute(&mut conn, &connector, &record("SELECT 1", 0, 1))
            .expect("execute");
    }

    #[test]
    fn stop_on_first_sql_error_when_configured() {
        let log = ExecLog::new();
        let connector = ScriptedConnector::with_script(log, |_| ExecOutcome::SqlError {
            code: "23505".to_owned(),
            message: "duplicate key".to_owned(),
        });
        let coordinator =
            Coordinator::new(&connector, RetryPolicy::default(), false).expect("coordinator");

        let mut conn = connector.connect().expect("connect");
        let err = coordinator
            .execute(&mut conn, &connector, &record("INSERT INTO t VALUES (1)", 0, 0))
            .unwrap_err();
        assert!(matches!(err, ExecError::StoppedOnSqlError { .. }));
    }

    #[test]
    fn sql_errors_are_counted_by_kind() {
        let log = ExecLog::new();
        let connector = ScriptedConnector::with_script(log, |sql| {
            if sql.contains("bad") {
                ExecOutcome::SqlError {
                    code: "42601".to_owned(),
                    message: "syntax error".to_owned(),
                }
            } else {
                ExecOutcome::Ok
            }
        });
        let coordinator =
            Coordinator::new(&connector, RetryPolicy::default(), true).expect("coordinator");

        let mut conn = connector.connect().expect("connect");
        for i in 0..5u64 {
            let sql = if i % 2 == 0 { "SELECT bad" } else { "SELECT 1" };
            coordinator
                .execute(&mut conn, &connector, &record(sql, 0, i))
                .expect("execute");
        }

        let snapshot = coordinator.stats().snapshot();
        assert_eq!(snapshot.submitted, 5);
        assert_eq!(snapshot.ok, 2);
        assert_eq!(snapshot.errors.get("syntax"), Some(&3));
    }
}

//! Scripted endpoints for tests.
//!
//! [`ScriptedEndpoint`] records every executed statement with its wall-clock
//! interval into a shared [`ExecLog`], and answers with whatever outcome the
//! script decides. Barrier tests assert on the log's intervals; retry tests
//! script transport failures.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::classify::is_ddl;
use crate::endpoint::{Endpoint, EndpointConnector, ExecOutcome};
use crate::error::ExecError;

/// One recorded execution.
#[derive(Debug, Clone)]
pub struct ExecEvent {
    pub sql: String,
    pub started_at: Instant,
    pub finished_at: Instant,
    pub ddl: bool,
}

/// Shared log of executions across all scripted connections.
#[derive(Clone, Default)]
pub struct ExecLog {
    events: Arc<Mutex<Vec<ExecEvent>>>,
}

impl ExecLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<ExecEvent> {
        self.events.lock().expect("log lock poisoned").clone()
    }

    /// True if any DDL interval overlaps any DML interval.
    #[must_use]
    pub fn ddl_overlaps_dml(&self) -> bool {
        let events = self.events();
        for ddl in events.iter().filter(|e| e.ddl) {
            for dml in events.iter().filter(|e| !e.ddl) {
                if ddl.started_at < dml.finished_at && dml.started_at < ddl.finished_at {
                    return true;
                }
            }
        }
        false
    }

    fn record(&self, event: ExecEvent) {
        self.events.lock().expect("log lock poisoned").push(event);
    }
}

type Script = Arc<dyn Fn(&str) -> ExecOutcome + Send + Sync>;

/// An endpoint that answers from a script and logs every call.
pub struct ScriptedEndpoint {
    log: ExecLog,
    latency: Duration,
    script: Script,
    closed: bool,
}

impl Endpoint for ScriptedEndpoint {
    fn exec(&mut self, sql: &str) -> ExecOutcome {
        if self.closed {
            return ExecOutcome::ConnError {
                message: "closed".to_owned(),
            };
        }
        let started_at = Instant::now();
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let outcome = (self.script)(sql);
        self.log.record(ExecEvent {
            sql: sql.to_owned(),
            started_at,
            finished_at: Instant::now(),
            ddl: is_ddl(sql),
        });
        outcome
    }

    fn ping(&mut self) -> ExecOutcome {
        if self.closed {
            ExecOutcome::ConnError {
                message: "closed".to_owned(),
            }
        } else {
            ExecOutcome::Ok
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Builds scripted endpoints sharing one log.
pub struct ScriptedConnector {
    log: ExecLog,
    latency: Duration,
    script: Script,
    /// Number of upcoming `connect` calls that fail, for retry tests.
    connect_failures: AtomicU32,
}

impl ScriptedConnector {
    /// A connector whose endpoints always succeed instantly.
    #[must_use]
    pub fn ok(log: ExecLog) -> Self {
        Self::with_script(log, |_| ExecOutcome::Ok)
    }

    /// A connector whose endpoints answer from the given script.
    pub fn with_script<F>(log: ExecLog, script: F) -> Self
    where
        F: Fn(&str) -> ExecOutcome + Send + Sync + 'static,
    {
        Self {
            log,
            latency: Duration::ZERO,
            script: Arc::new(script),
            connect_failures: AtomicU32::new(0),
        }
    }

    /// Adds artificial per-statement latency (widens intervals for the
    /// barrier overlap checks).
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes the next `n` connect calls fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }
}

impl EndpointConnector for ScriptedConnector {
    fn connect(&self) -> Result<Box<dyn Endpoint>, ExecError> {
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ExecError::Connect("scripted connect failure".to_owned()));
        }
        Ok(Box::new(ScriptedEndpoint {
            log: self.log.clone(),
            latency: self.latency,
            script: Arc::clone(&self.script),
            closed: false,
        }))
    }
}

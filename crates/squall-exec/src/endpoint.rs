//! The endpoint abstraction and the Postgres adapter.
//!
//! The coordinator only ever talks to [`Endpoint`]: a narrow capability set
//! of execute, ping, and close. [`PgEndpoint`] implements it over the
//! synchronous `postgres` client (wire protocol v3); other adapters plug in
//! the same way. Reconnection with capped exponential backoff lives here
//! too, as [`exec_with_reconnect`].

use std::time::Duration;

use postgres::{Client, NoTls};
use tracing::{debug, warn};

use squall_schema::introspect::{self, IntrospectedColumn};
use squall_schema::SchemaView;

use crate::error::ExecError;

/// Result of executing one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Statement succeeded.
    Ok,
    /// The endpoint returned a SQL error; `code` is the SQLSTATE.
    SqlError { code: String, message: String },
    /// Transport-level failure; the connection is gone.
    ConnError { message: String },
}

/// A connected SQL endpoint.
pub trait Endpoint: Send {
    /// Executes one statement, discarding any result rows.
    fn exec(&mut self, sql: &str) -> ExecOutcome;

    /// Cheap health check.
    fn ping(&mut self) -> ExecOutcome;

    /// Closes the connection. Idempotent.
    fn close(&mut self);
}

/// Creates endpoint connections; one per worker plus one for DDL.
pub trait EndpointConnector: Send + Sync {
    /// Opens a fresh connection.
    fn connect(&self) -> Result<Box<dyn Endpoint>, ExecError>;
}

/// Reconnect policy for transport failures: capped exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            max: Duration::from_secs(2),
            attempts: 8,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given zero-based attempt.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.initial.saturating_mul(1u32 << attempt.min(16));
        exp.min(self.max)
    }
}

/// Executes a statement, transparently reconnecting on transport failures.
///
/// SQL errors are returned as-is and never retried. On a transport failure
/// the connection in `slot` is replaced via the connector and the statement
/// is retried, up to `policy.attempts` times; exhaustion is fatal
/// ([`ExecError::Unreachable`], exit code 2 at the run level).
pub fn exec_with_reconnect(
    slot: &mut Box<dyn Endpoint>,
    connector: &dyn EndpointConnector,
    policy: &RetryPolicy,
    sql: &str,
) -> Result<ExecOutcome, ExecError> {
    let mut last = match slot.exec(sql) {
        ExecOutcome::ConnError { message } => message,
        other => return Ok(other),
    };

    for attempt in 0..policy.attempts {
        std::thread::sleep(policy.delay(attempt));
        warn!(attempt, error = %last, "reconnecting to endpoint");
        match connector.connect() {
            Ok(fresh) => {
                *slot = fresh;
                match slot.exec(sql) {
                    ExecOutcome::ConnError { message } => last = message,
                    other => return Ok(other),
                }
            }
            Err(e) => last = e.to_string(),
        }
    }

    Err(ExecError::Unreachable {
        attempts: policy.attempts,
        last,
    })
}

// ============================================================================
// Postgres adapter
// ============================================================================

/// Connector for PostgreSQL-compatible endpoints.
#[derive(Debug, Clone)]
pub struct PgConnector {
    dsn: String,
}

impl PgConnector {
    /// Creates a connector for the given DSN (key/value or URL form).
    pub fn new(dsn: impl Into<String>) -> Self {
        Self { dsn: dsn.into() }
    }

    /// Opens a typed Postgres endpoint (used for introspection).
    pub fn connect_pg(&self) -> Result<PgEndpoint, ExecError> {
        let client =
            Client::connect(&self.dsn, NoTls).map_err(|e| ExecError::Connect(e.to_string()))?;
        debug!("connected to endpoint");
        Ok(PgEndpoint {
            client: Some(client),
        })
    }
}

impl EndpointConnector for PgConnector {
    fn connect(&self) -> Result<Box<dyn Endpoint>, ExecError> {
        Ok(Box::new(self.connect_pg()?))
    }
}

/// A live Postgres connection.
pub struct PgEndpoint {
    client: Option<Client>,
}

impl PgEndpoint {
    fn outcome_from_error(e: &postgres::Error) -> ExecOutcome {
        match e.as_db_error() {
            Some(db) => ExecOutcome::SqlError {
                code: db.code().code().to_owned(),
                message: db.message().to_owned(),
            },
            None => ExecOutcome::ConnError {
                message: e.to_string(),
            },
        }
    }

    /// Reads `information_schema` into a schema view.
    pub fn introspect(&mut self) -> Result<SchemaView, ExecError> {
        let Some(client) = self.client.as_mut() else {
            return Err(ExecError::Introspection("connection closed".to_owned()));
        };

        let column_rows = client
            .query(introspect::COLUMNS_SQL, &[])
            .map_err(|e| ExecError::Introspection(e.to_string()))?;
        let columns = column_rows
            .iter()
            .map(|row| IntrospectedColumn {
                table: row.get(0),
                column: row.get(1),
                sql_type: row.get(2),
                nullable: row.get::<_, String>(3) == "YES",
                default: row.get(4),
            })
            .collect();

        let pk_rows = client
            .query(introspect::PRIMARY_KEYS_SQL, &[])
            .map_err(|e| ExecError::Introspection(e.to_string()))?;
        let primary_keys = pk_rows.iter().map(|row| (row.get(0), row.get(1))).collect();

        Ok(introspect::assemble(columns, primary_keys))
    }
}

impl Endpoint for PgEndpoint {
    fn exec(&mut self, sql: &str) -> ExecOutcome {
        let Some(client) = self.client.as_mut() else {
            return ExecOutcome::ConnError {
                message: "connection closed".to_owned(),
            };
        };
        match client.batch_execute(sql) {
            Ok(()) => ExecOutcome::Ok,
            Err(e) => Self::outcome_from_error(&e),
        }
    }

    fn ping(&mut self) -> ExecOutcome {
        self.exec("SELECT 1")
    }

    fn close(&mut self) {
        self.client = None;
    }
}

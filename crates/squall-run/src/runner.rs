//! Top-level run orchestration.
//!
//! The runner ties the crates together: validate the configuration, freeze
//! limits against the grammar, load the schema view, wire the uniqueness
//! filter, coordinator, sinks, and checkpoints, then hand everything to the
//! worker pool. Hosts register frozen grammars and call [`Runner::run`];
//! the CLI surface on top of this is a separate concern.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use squall_config::{RunConfig, SchemaMode, UniquenessMode};
use squall_exec::{Coordinator, EndpointConnector, PgConnector, RetryPolicy};
use squall_filter::UniquenessWindow;
use squall_grammar::{ExpandConfig, Grammar};
use squall_rng::master_seed_from_entropy;
use squall_schema::{schema_from_ddl, SchemaView};

use crate::checkpoint::CheckpointStore;
use crate::error::RunError;
use crate::pool::{CheckpointPlan, FixupHook, Pool, PoolOutcome};
use crate::report::{LogReportSink, ReportSink, Reporter, ReportSnapshot, RunStats};
use crate::sink::{sink_from_config, QuerySink};

/// Result of a completed run.
#[derive(Debug)]
pub struct RunSummary {
    /// Final counters.
    pub snapshot: ReportSnapshot,
    /// Last completed global index per worker.
    pub done: Vec<u64>,
    /// The master seed the run used (useful when it came from entropy).
    pub master_seed: u64,
}

/// Maps a run result to the documented process exit code.
#[must_use]
pub fn exit_code<T>(result: &Result<T, RunError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.exit_code(),
    }
}

/// Builds and runs one generation/execution run.
pub struct Runner {
    config: RunConfig,
    grammars: BTreeMap<String, Arc<Grammar>>,
    fixup: Option<FixupHook>,
    stop: Arc<AtomicBool>,
    query_sink: Option<Box<dyn QuerySink>>,
    report_sink: Option<Box<dyn ReportSink>>,
    connector: Option<Arc<dyn EndpointConnector>>,
}

impl Runner {
    /// Creates a runner for the given configuration.
    #[must_use]
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            grammars: BTreeMap::new(),
            fixup: None,
            stop: Arc::new(AtomicBool::new(false)),
            query_sink: None,
            report_sink: None,
            connector: None,
        }
    }

    /// Registers a frozen grammar under its own name.
    #[must_use]
    pub fn register(mut self, grammar: Grammar) -> Self {
        self.grammars
            .insert(grammar.name().to_owned(), Arc::new(grammar));
        self
    }

    /// Installs the post-expansion fixup hook (`None` drops a query).
    #[must_use]
    pub fn with_fixup<F>(mut self, fixup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.fixup = Some(Arc::new(fixup));
        self
    }

    /// Overrides the query sink chosen by the configuration.
    #[must_use]
    pub fn with_query_sink(mut self, sink: Box<dyn QuerySink>) -> Self {
        self.query_sink = Some(sink);
        self
    }

    /// Overrides the report sink (default: `tracing` log lines).
    #[must_use]
    pub fn with_report_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.report_sink = Some(sink);
        self
    }

    /// Overrides the endpoint connector (tests inject scripted endpoints;
    /// production uses the DSN).
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn EndpointConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Handle for cooperative cancellation: setting it stops the run at
    /// the next batch boundary, with exit code 3.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Runs to completion. See [`RunError::exit_code`] for the mapping of
    /// failures to process exit codes.
    pub fn run(mut self) -> Result<RunSummary, RunError> {
        self.config.validate()?;

        let grammar = self.resolve_grammar()?;
        grammar.check_repeat_cap(self.config.repeat_cap)?;

        let master_seed = self.config.seed.unwrap_or_else(master_seed_from_entropy);
        info!(
            grammar = grammar.name(),
            master_seed,
            workers = self.config.workers,
            "starting run"
        );

        let schema_view = self.load_schema()?;
        let schema_fingerprint = schema_view.fingerprint();
        let schema = Arc::new(RwLock::new(Arc::new(schema_view)));

        let filter = match self.config.uniqueness.mode {
            UniquenessMode::Probabilistic => Some(Arc::new(UniquenessWindow::new(
                self.config.uniqueness.capacity,
                self.config.uniqueness.fpr,
            ))),
            UniquenessMode::Off => None,
        };

        let connector: Option<Arc<dyn EndpointConnector>> = match self.connector.take() {
            Some(connector) => Some(connector),
            None => self
                .config
                .dsn
                .as_ref()
                .map(|dsn| Arc::new(PgConnector::new(dsn)) as Arc<dyn EndpointConnector>),
        };

        let coordinator = match &connector {
            Some(connector) => {
                let mut coordinator = Coordinator::new(
                    connector.as_ref(),
                    RetryPolicy::default(),
                    self.config.continue_on_error,
                )?;
                if self.config.schema.mode == SchemaMode::Introspect {
                    coordinator = coordinator
                        .with_ddl_hook(introspect_hook(&self.config, Arc::clone(&schema)));
                }
                Some(Arc::new(coordinator))
            }
            None => None,
        };

        let (checkpoint, resume_done) = self.plan_checkpoint(master_seed, &schema_fingerprint)?;

        let sink = match self.query_sink.take() {
            Some(sink) => sink,
            None => sink_from_config(&self.config.output)?,
        };
        let report_sink = self
            .report_sink
            .take()
            .unwrap_or_else(|| Box::new(LogReportSink));

        let stats = Arc::new(RunStats::new(self.config.workers));
        let coordinator_for_summary = coordinator.clone();
        let pool = Pool {
            grammar: Arc::clone(&grammar),
            entry: self.config.entry_rule.clone(),
            schema,
            master_seed,
            total: self.config.count,
            workers: self.config.workers,
            batch: self.config.batch,
            duration: self.config.duration_secs.map(Duration::from_secs),
            expand: ExpandConfig {
                max_depth: self.config.max_depth,
                repeat_cap: self.config.repeat_cap,
            },
            filter: filter.clone(),
            retry_cap: self.config.uniqueness.retry_cap,
            fixup: self.fixup.clone(),
            coordinator,
            connector,
            stop: Arc::clone(&self.stop),
            stats: Arc::clone(&stats),
            sink,
            reporter: Some(Reporter::new(report_sink)),
            checkpoint,
            resume_done,
        };

        let PoolOutcome { done } = pool.run()?;

        let snapshot = stats.snapshot(
            filter.as_deref().map(UniquenessWindow::stats),
            filter.as_deref().map(UniquenessWindow::load_factor),
            coordinator_for_summary.map(|c| c.stats().snapshot()),
        );
        Ok(RunSummary {
            snapshot,
            done,
            master_seed,
        })
    }

    fn resolve_grammar(&self) -> Result<Arc<Grammar>, RunError> {
        if self.config.grammar.is_empty() && self.grammars.len() == 1 {
            let grammar = self.grammars.values().next().map(Arc::clone);
            return grammar.ok_or_else(|| RunError::UnknownGrammar(String::new()));
        }
        self.grammars
            .get(&self.config.grammar)
            .map(Arc::clone)
            .ok_or_else(|| RunError::UnknownGrammar(self.config.grammar.clone()))
    }

    fn load_schema(&self) -> Result<SchemaView, RunError> {
        match self.config.schema.mode {
            SchemaMode::None => Ok(SchemaView::empty()),
            SchemaMode::DdlFile => {
                let path = self
                    .config
                    .schema
                    .source
                    .clone()
                    .unwrap_or_default();
                let script =
                    std::fs::read_to_string(&path).map_err(|source| RunError::SchemaSource {
                        path: path.clone(),
                        source,
                    })?;
                Ok(schema_from_ddl(&script)?)
            }
            SchemaMode::Introspect => {
                let dsn = self
                    .config
                    .introspection_dsn()
                    .unwrap_or_default()
                    .to_owned();
                let mut endpoint = PgConnector::new(dsn).connect_pg()?;
                Ok(endpoint.introspect()?)
            }
        }
    }

    fn plan_checkpoint(
        &self,
        master_seed: u64,
        schema_fingerprint: &str,
    ) -> Result<(Option<CheckpointPlan>, Option<Vec<u64>>), RunError> {
        let Some(path) = &self.config.checkpoint.path else {
            return Ok((None, None));
        };
        let store = CheckpointStore::new(path);

        let (started_at, resume_done) = if store.exists() {
            let checkpoint = store.load()?;
            checkpoint.validate_resume(
                master_seed,
                self.config.count,
                self.config.workers as u32,
                schema_fingerprint,
            )?;
            info!(path = %path.display(), "resuming from checkpoint");
            (checkpoint.started_at, Some(checkpoint.done))
        } else {
            (Utc::now(), None)
        };

        Ok((
            Some(CheckpointPlan {
                store,
                every_queries: self.config.checkpoint.every_queries,
                every_secs: self.config.checkpoint.every_secs,
                schema_fingerprint: schema_fingerprint.to_owned(),
                started_at,
            }),
            resume_done,
        ))
    }
}

/// DDL hook for introspection mode: rebuild the schema view after every
/// applied DDL. A failed rebuild degrades to an empty view with a warning
/// rather than aborting the run.
fn introspect_hook(
    config: &RunConfig,
    schema: Arc<RwLock<Arc<SchemaView>>>,
) -> impl Fn() + Send + Sync {
    let dsn = config.introspection_dsn().unwrap_or_default().to_owned();
    move || {
        let rebuilt = PgConnector::new(&dsn)
            .connect_pg()
            .and_then(|mut endpoint| endpoint.introspect());
        let view = match rebuilt {
            Ok(view) => view,
            Err(e) => {
                warn!(error = %e, "schema rebuild failed; continuing with an empty view");
                SchemaView::empty()
            }
        };
        *schema.write().expect("schema lock poisoned") = Arc::new(view);
    }
}

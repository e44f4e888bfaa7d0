//! Scripted engine driver and fixtures for executor tests.
//!
//! Only available with the `testing` feature.

use crate::context::WorkerContext;
use crate::driver::{DriverConnector, DriverError, DriverStatus, EngineDriver, Row};
use crate::registry::{ExecutorRegistry, ExecutorSpec, LanguageMatch};
use crate::table_extractor::{TableExtractor, TableRef};
use async_trait::async_trait;
use catalog::test_utils::seed_engine_and_user;
use catalog::{Catalog, StateReceivers};
use model::engine::{self, ConnectionParams, CreateEngine};
use model::execution::{self, CreateExecution};
use model::user;
use object_store::memory::InMemory;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Rows { columns: Vec<String>, rows: Vec<Row> },
    Fail(DriverError),
}

/// How the scripted engine behaves for one statement text.
#[derive(Clone, Debug, PartialEq)]
pub struct StatementScript {
    /// Number of `Running` answers before the outcome is reported.
    pub polls: usize,
    pub outcome: Outcome,
    /// One line is emitted per `Running` answer, the rest once the statement ends.
    pub log_lines: Vec<String>,
    pub tracking_url: Option<String>,
    /// Fail the submission itself.
    pub reject: Option<DriverError>,
}

impl StatementScript {
    pub fn rows(columns: Vec<&str>, rows: Vec<Row>) -> Self {
        Self {
            polls: 0,
            outcome: Outcome::Rows {
                columns: columns.into_iter().map(str::to_string).collect(),
                rows,
            },
            log_lines: Vec::new(),
            tracking_url: None,
            reject: None,
        }
    }

    /// A statement without a result set.
    pub fn ddl() -> Self {
        Self::rows(Vec::new(), Vec::new())
    }

    pub fn fail(err: DriverError) -> Self {
        Self {
            outcome: Outcome::Fail(err),
            ..Self::ddl()
        }
    }

    pub fn never_finishes() -> Self {
        Self::ddl().with_polls(usize::MAX)
    }

    pub fn rejected(err: DriverError) -> Self {
        Self {
            reject: Some(err),
            ..Self::ddl()
        }
    }

    pub fn with_polls(mut self, polls: usize) -> Self {
        self.polls = polls;
        self
    }

    pub fn with_log_lines<I: IntoIterator<Item = S>, S: Into<String>>(mut self, lines: I) -> Self {
        self.log_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tracking_url(mut self, url: impl Into<String>) -> Self {
        self.tracking_url = Some(url.into());
        self
    }
}

#[derive(Debug, Default)]
struct Recorded {
    submitted: Vec<String>,
    params: Vec<ConnectionParams>,
    cancel_calls: usize,
    status_calls: usize,
    closed: usize,
}

/// Connector whose engine answers from per-statement scripts.
///
/// Unknown statements finish immediately without a result set. All drivers
/// opened from one connector share the same call records.
#[derive(Clone, Debug, Default)]
pub struct ScriptedConnector {
    scripts: Arc<HashMap<String, StatementScript>>,
    recorded: Arc<Mutex<Recorded>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, statement: &str, script: StatementScript) -> Self {
        Arc::make_mut(&mut self.scripts).insert(statement.trim().to_string(), script);
        self
    }

    fn recorded(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn submitted(&self) -> Vec<String> {
        self.recorded().submitted.clone()
    }

    pub fn params(&self) -> Vec<ConnectionParams> {
        self.recorded().params.clone()
    }

    pub fn cancel_calls(&self) -> usize {
        self.recorded().cancel_calls
    }

    pub fn status_calls(&self) -> usize {
        self.recorded().status_calls
    }

    pub fn closed(&self) -> usize {
        self.recorded().closed
    }
}

#[async_trait]
impl DriverConnector for ScriptedConnector {
    async fn connect(
        &self,
        params: &ConnectionParams,
    ) -> Result<Box<dyn EngineDriver>, DriverError> {
        self.recorded().params.push(params.clone());
        Ok(Box::new(ScriptedDriver {
            connector: self.clone(),
            current: None,
        }))
    }
}

struct InFlight {
    script: StatementScript,
    polls_seen: usize,
    next_log_line: usize,
    log: String,
    fetched: usize,
    done: bool,
}

impl InFlight {
    fn emit_log_line(&mut self) {
        if let Some(line) = self.script.log_lines.get(self.next_log_line) {
            self.log.push_str(line);
            self.log.push('\n');
            self.next_log_line += 1;
        }
    }
}

struct ScriptedDriver {
    connector: ScriptedConnector,
    current: Option<InFlight>,
}

impl ScriptedDriver {
    fn in_flight(&mut self) -> Result<&mut InFlight, DriverError> {
        self.current
            .as_mut()
            .ok_or_else(|| DriverError::other("No statement submitted"))
    }
}

#[async_trait]
impl EngineDriver for ScriptedDriver {
    async fn submit(&mut self, statement: &str) -> Result<(), DriverError> {
        self.connector
            .recorded()
            .submitted
            .push(statement.to_string());
        let script = self
            .connector
            .scripts
            .get(statement.trim())
            .cloned()
            .unwrap_or_else(StatementScript::ddl);
        if let Some(err) = script.reject.clone() {
            return Err(err);
        }
        self.current = Some(InFlight {
            script,
            polls_seen: 0,
            next_log_line: 0,
            log: String::new(),
            fetched: 0,
            done: false,
        });
        Ok(())
    }

    async fn status(&mut self) -> Result<DriverStatus, DriverError> {
        self.connector.recorded().status_calls += 1;
        let in_flight = self.in_flight()?;
        if !in_flight.done && in_flight.polls_seen < in_flight.script.polls {
            in_flight.polls_seen += 1;
            in_flight.emit_log_line();
            return Ok(DriverStatus::Running);
        }
        if !in_flight.done {
            in_flight.done = true;
            while in_flight.next_log_line < in_flight.script.log_lines.len() {
                in_flight.emit_log_line();
            }
        }
        Ok(match &in_flight.script.outcome {
            Outcome::Rows { .. } => DriverStatus::Finished,
            Outcome::Fail(err) => DriverStatus::Failed(err.clone()),
        })
    }

    async fn cancel(&mut self) -> Result<(), DriverError> {
        self.connector.recorded().cancel_calls += 1;
        Ok(())
    }

    async fn columns(&mut self) -> Result<Vec<String>, DriverError> {
        Ok(match &self.in_flight()?.script.outcome {
            Outcome::Rows { columns, .. } => columns.clone(),
            Outcome::Fail(_) => Vec::new(),
        })
    }

    async fn fetch(&mut self, batch: usize) -> Result<Vec<Row>, DriverError> {
        let in_flight = self.in_flight()?;
        let Outcome::Rows { rows, .. } = &in_flight.script.outcome else {
            return Ok(Vec::new());
        };
        let end = (in_flight.fetched + batch).min(rows.len());
        let batch = rows[in_flight.fetched..end].to_vec();
        in_flight.fetched = end;
        Ok(batch)
    }

    async fn logs(&mut self) -> Result<String, DriverError> {
        Ok(self.in_flight()?.log.clone())
    }

    fn progress(&self) -> Option<f64> {
        let in_flight = self.current.as_ref()?;
        if in_flight.done {
            return Some(100.0);
        }
        let total = in_flight.script.polls.saturating_add(1) as f64;
        Some(in_flight.polls_seen as f64 / total * 100.0)
    }

    fn tracking_url(&self) -> Option<String> {
        self.current.as_ref()?.script.tracking_url.clone()
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.connector.recorded().closed += 1;
        Ok(())
    }
}

/// Extractor reporting a fixed set of tables for every statement.
#[derive(Clone, Debug, Default)]
pub struct FixedTableExtractor(pub Vec<TableRef>);

impl TableExtractor for FixedTableExtractor {
    fn referenced_tables(&self, _statement: &str, _language: &str) -> Vec<TableRef> {
        self.0.clone()
    }
}

/// Registry serving every language used in tests from `connector`.
pub fn scripted_registry(connector: &ScriptedConnector) -> ExecutorRegistry {
    let connector: Arc<dyn DriverConnector> = Arc::new(connector.clone());
    ExecutorRegistry::new()
        .register(ExecutorSpec::new(
            "hive",
            LanguageMatch::Exact("hive".into()),
            connector.clone(),
        ))
        .register(ExecutorSpec::new(
            "trino",
            LanguageMatch::any_of(["presto", "trino"]),
            connector.clone(),
        ))
        .register(ExecutorSpec::new(
            "sqlalchemy",
            LanguageMatch::any_of(["sqlite", "postgresql", "mysql"]),
            connector,
        ))
}

/// In-memory catalog and blob store with a scripted engine behind every executor.
pub struct TestHarness {
    pub ctx: WorkerContext,
    pub receivers: StateReceivers,
    pub connector: ScriptedConnector,
    pub user: user::Model,
    pub default_engine: engine::Model,
}

impl TestHarness {
    pub async fn new(connector: ScriptedConnector) -> Self {
        let (catalog, receivers) = Catalog::for_test().await;
        let (default_engine, user) = seed_engine_and_user(&catalog).await;
        let ctx = WorkerContext::new(
            catalog,
            Arc::new(InMemory::new()),
            Arc::new(scripted_registry(&connector)),
        );
        Self {
            ctx,
            receivers,
            connector,
            user,
            default_engine,
        }
    }

    /// Create an engine for `language`, served by the executor of the same name.
    pub async fn engine(&self, language: &str) -> engine::Model {
        let executor = match language {
            "presto" | "trino" => "trino",
            "hive" => "hive",
            _ => "sqlalchemy",
        };
        self.create_engine(CreateEngine::new(format!("{language}_engine"), language, executor))
            .await
    }

    pub async fn create_engine(&self, req: CreateEngine) -> engine::Model {
        self.ctx
            .catalog
            .engine
            .create_engine(req)
            .await
            .expect("failed to create engine")
    }

    pub async fn submit(&self, engine: &engine::Model, query: &str) -> execution::Model {
        self.ctx
            .catalog
            .execution
            .create_execution(CreateExecution::new(query, engine.id, self.user.id))
            .await
            .expect("failed to create execution")
    }
}

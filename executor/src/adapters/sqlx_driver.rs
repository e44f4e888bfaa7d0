//! Generic driver over `sqlx`'s `Any` backend for sqlite, postgres and mysql URLs.

use crate::driver::{DriverConnector, DriverError, DriverErrorKind, DriverStatus, EngineDriver, Row};
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use model::engine::ConnectionParams;
use serde_json::Value;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Column, Executor, Row as _, ValueRef};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Connection parameter holding the database URL.
pub const CONNECTION_STRING: &str = "connection_string";

/// Rows read ahead of `fetch`. The database stream waits while the buffer is full.
const ROW_BUFFER: usize = 1024;

type Header = Result<Vec<String>, DriverError>;
type RowItem = Result<Row, DriverError>;

#[derive(Clone, Copy, Debug, Default)]
pub struct SqlxConnector;

#[async_trait]
impl DriverConnector for SqlxConnector {
    async fn connect(
        &self,
        params: &ConnectionParams,
    ) -> Result<Box<dyn EngineDriver>, DriverError> {
        let url = params
            .get(CONNECTION_STRING)
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::other(format!("Missing '{CONNECTION_STRING}' parameter")))?;

        sqlx::any::install_default_drivers();
        // A single long-lived connection keeps in-memory databases alive between statements
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(url)
            .await
            .map_err(to_driver_error)?;

        Ok(Box::new(SqlxDriver {
            pool,
            task: None,
            phase: Phase::Idle,
            columns: Vec::new(),
            rows: None,
            log: String::new(),
        }))
    }
}

enum Phase {
    Idle,
    /// Waiting for the first row or the end of the statement.
    Running(oneshot::Receiver<Header>),
    Finished,
    Failed(DriverError),
}

struct SqlxDriver {
    pool: AnyPool,
    task: Option<JoinHandle<()>>,
    phase: Phase,
    columns: Vec<String>,
    rows: Option<mpsc::Receiver<RowItem>>,
    log: String,
}

impl SqlxDriver {
    /// Abort the statement task, releasing the connection it holds.
    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rows = None;
    }
}

fn to_driver_error(err: sqlx::Error) -> DriverError {
    match err {
        sqlx::Error::Database(db) => {
            let error = DriverError::query(db.message());
            match db.code() {
                Some(code) => error.with_code(code),
                None => error,
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Configuration(_) => DriverError::connection(err.to_string()),
        sqlx::Error::Protocol(_) | sqlx::Error::Decode(_) => {
            DriverError::new(DriverErrorKind::Protocol, err.to_string())
        }
        other => DriverError::other(other.to_string()),
    }
}

fn cell(row: &AnyRow, index: usize) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Err(_) => return Value::Null,
        Ok(_) => {}
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<bool, _>(index) {
        return Value::from(v);
    }
    Value::Null
}

fn to_row(row: &AnyRow) -> Row {
    (0..row.len()).map(|i| cell(row, i)).collect()
}

/// Run `sql`, announce its columns on `header` and stream its rows into `rows`.
///
/// Stops early once the receiving side is gone.
async fn run_statement(
    pool: AnyPool,
    sql: String,
    header: oneshot::Sender<Header>,
    rows: mpsc::Sender<RowItem>,
) {
    let mut stream = sqlx::query(&sql).fetch(&pool);
    let first = match stream.try_next().await {
        Ok(first) => first,
        Err(e) => {
            let _ = header.send(Err(to_driver_error(e)));
            return;
        }
    };

    let Some(first) = first else {
        // The stream holds the only connection
        drop(stream);
        // Tell an empty result set apart from a statement without one
        let columns = match pool.describe(&sql).await {
            Ok(described) => described
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            Err(_) => Vec::new(),
        };
        let _ = header.send(Ok(columns));
        return;
    };

    let columns = first.columns().iter().map(|c| c.name().to_string()).collect();
    if header.send(Ok(columns)).is_err() || rows.send(Ok(to_row(&first))).await.is_err() {
        return;
    }
    let mut streamed = 1usize;
    while let Some(next) = stream.next().await {
        let item = next.map(|row| to_row(&row)).map_err(to_driver_error);
        let failed = item.is_err();
        if rows.send(item).await.is_err() || failed {
            return;
        }
        streamed += 1;
    }
    debug!("Statement streamed {streamed} rows");
}

#[async_trait]
impl EngineDriver for SqlxDriver {
    async fn submit(&mut self, statement: &str) -> Result<(), DriverError> {
        self.stop();
        self.columns.clear();
        self.log.clear();

        let (header_tx, header_rx) = oneshot::channel();
        let (rows_tx, rows_rx) = mpsc::channel(ROW_BUFFER);
        let pool = self.pool.clone();
        let sql = statement.to_string();
        self.task = Some(tokio::spawn(run_statement(pool, sql, header_tx, rows_tx)));
        self.rows = Some(rows_rx);
        self.phase = Phase::Running(header_rx);
        Ok(())
    }

    /// `Finished` as soon as the result set is known. Rows keep streaming behind `fetch`.
    async fn status(&mut self) -> Result<DriverStatus, DriverError> {
        if let Phase::Running(header) = &mut self.phase {
            let header = match header.try_recv() {
                Ok(header) => Some(header),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Closed) => {
                    Some(Err(DriverError::other("Statement ended without a result")))
                }
            };
            match header {
                Some(Ok(columns)) => {
                    self.log
                        .push_str(&format!("Result has {} columns\n", columns.len()));
                    self.columns = columns;
                    self.phase = Phase::Finished;
                }
                Some(Err(e)) => {
                    self.stop();
                    self.phase = Phase::Failed(e);
                }
                None => {}
            }
        }

        match &self.phase {
            Phase::Idle => Err(DriverError::other("No statement submitted")),
            Phase::Running(_) => Ok(DriverStatus::Running),
            Phase::Finished => Ok(DriverStatus::Finished),
            Phase::Failed(e) => Ok(DriverStatus::Failed(e.clone())),
        }
    }

    async fn cancel(&mut self) -> Result<(), DriverError> {
        self.stop();
        if let Phase::Running(_) = self.phase {
            self.phase = Phase::Failed(DriverError::query("Statement was cancelled"));
        }
        Ok(())
    }

    async fn columns(&mut self) -> Result<Vec<String>, DriverError> {
        Ok(self.columns.clone())
    }

    async fn fetch(&mut self, batch: usize) -> Result<Vec<Row>, DriverError> {
        if !matches!(self.phase, Phase::Finished) {
            return Ok(Vec::new());
        }
        let Some(rows) = self.rows.as_mut() else {
            return Ok(Vec::new());
        };
        let mut fetched = Vec::new();
        let mut outcome = Ok(());
        let mut drained = false;
        while fetched.len() < batch {
            match rows.recv().await {
                Some(Ok(row)) => fetched.push(row),
                Some(Err(e)) => {
                    outcome = Err(e);
                    break;
                }
                None => {
                    drained = true;
                    break;
                }
            }
        }
        if drained || outcome.is_err() {
            self.stop();
        }
        outcome.map(|()| fetched)
    }

    async fn logs(&mut self) -> Result<String, DriverError> {
        Ok(self.log.clone())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.stop();
        self.pool.close().await;
        Ok(())
    }
}

use crate::dialect::Dialect;
use crate::driver::{DriverError, DriverStatus, EngineDriver, Row};
use async_trait::async_trait;
use model::execution::execution_error::{ErrorKind, ErrorPosition};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// A classified fault, ready to be persisted as an execution error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedError {
    pub kind: ErrorKind,
    /// Raw message as reported.
    pub message: String,
    /// Human-oriented part of the message, if one could be isolated.
    pub extracted: Option<String>,
    pub position: Option<ErrorPosition>,
}

impl ParsedError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: message.into(),
            extracted: None,
            position: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            ..Self::internal(message)
        }
    }

    /// Shift a statement-relative position into the coordinates of the whole query.
    ///
    /// `prefix` is the query text before the statement.
    pub fn relative_to(mut self, prefix: &str) -> Self {
        if let Some(position) = self.position.as_mut() {
            let newlines = prefix.matches('\n').count() as u32;
            if position.line == 1 {
                let line_start = prefix.rfind('\n').map_or(0, |i| i + 1);
                let offset = prefix[line_start..].chars().count() as u32;
                position.column = position.column.map(|c| c + offset);
            }
            position.line += newlines;
        }
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollResult {
    StillRunning,
    Finished,
    Faulted(ParsedError),
}

/// Engine session executing one statement at a time.
#[async_trait]
pub trait Cursor: Send + Sync {
    /// Submit `statement`. Returns once the engine accepted it.
    async fn run(&mut self, statement: &str) -> Result<(), ParsedError>;

    /// Check on the current statement. Safe to call repeatedly.
    async fn poll(&mut self) -> PollResult;

    async fn cancel(&mut self) -> Result<(), ParsedError>;

    async fn get_columns(&mut self) -> Result<Vec<String>, ParsedError>;

    /// Next result row, or `None` once the result is drained.
    async fn next_row(&mut self) -> Result<Option<Row>, ParsedError>;

    /// Log text produced since the previous call.
    async fn get_logs(&mut self) -> Result<String, ParsedError>;

    fn percent_complete(&self) -> Option<f64>;

    fn tracking_url(&self) -> Option<String>;

    fn parse_error(&self, err: &DriverError) -> ParsedError;

    async fn close(&mut self);
}

/// Cursor over any [`EngineDriver`], interpreting errors with a [`Dialect`].
pub struct DriverCursor {
    driver: Box<dyn EngineDriver>,
    dialect: Dialect,
    buffer: VecDeque<Row>,
    exhausted: bool,
    log_offset: usize,
    batch_size: usize,
}

impl DriverCursor {
    pub fn new(driver: Box<dyn EngineDriver>, dialect: Dialect, batch_size: usize) -> Self {
        Self {
            driver,
            dialect,
            buffer: VecDeque::new(),
            exhausted: false,
            log_offset: 0,
            batch_size: batch_size.max(1),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }
}

#[async_trait]
impl Cursor for DriverCursor {
    async fn run(&mut self, statement: &str) -> Result<(), ParsedError> {
        self.buffer.clear();
        self.exhausted = false;
        self.log_offset = 0;
        self.driver
            .submit(statement)
            .await
            .map_err(|e| self.parse_error(&e))
    }

    async fn poll(&mut self) -> PollResult {
        let status = self.driver.status().await;
        match status {
            Ok(DriverStatus::Running) => PollResult::StillRunning,
            Ok(DriverStatus::Finished) => PollResult::Finished,
            Ok(DriverStatus::Failed(e)) | Err(e) => PollResult::Faulted(self.parse_error(&e)),
        }
    }

    async fn cancel(&mut self) -> Result<(), ParsedError> {
        self.driver.cancel().await.map_err(|e| self.parse_error(&e))
    }

    async fn get_columns(&mut self) -> Result<Vec<String>, ParsedError> {
        self.driver.columns().await.map_err(|e| self.parse_error(&e))
    }

    async fn next_row(&mut self) -> Result<Option<Row>, ParsedError> {
        if self.buffer.is_empty() && !self.exhausted {
            let batch = self
                .driver
                .fetch(self.batch_size)
                .await
                .map_err(|e| self.parse_error(&e))?;
            debug!("Fetched batch of {} rows", batch.len());
            if batch.is_empty() {
                self.exhausted = true;
            }
            self.buffer.extend(batch);
        }
        Ok(self.buffer.pop_front())
    }

    async fn get_logs(&mut self) -> Result<String, ParsedError> {
        let logs = self.driver.logs().await.map_err(|e| self.parse_error(&e))?;
        let Some(fresh) = logs.get(self.log_offset..) else {
            // The driver restarted its log; treat everything as new
            self.log_offset = logs.len();
            return Ok(logs);
        };
        let fresh = fresh.to_string();
        self.log_offset = logs.len();
        Ok(fresh)
    }

    fn percent_complete(&self) -> Option<f64> {
        self.driver.progress().map(|p| p.clamp(0.0, 100.0))
    }

    fn tracking_url(&self) -> Option<String> {
        self.driver.tracking_url()
    }

    fn parse_error(&self, err: &DriverError) -> ParsedError {
        self.dialect.classify(err)
    }

    async fn close(&mut self) {
        if let Err(e) = self.driver.close().await {
            warn!("Failed to close engine session: {e}");
        }
    }
}

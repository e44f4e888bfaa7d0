//! Wire-level capability of one engine driver.
//!
//! A driver executes one statement at a time. Everything above it (error
//! classification, log deduplication, row batching) lives in the cursor.

use async_trait::async_trait;
use model::engine::ConnectionParams;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// One result row, one JSON value per column.
pub type Row = Vec<Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The engine could not be reached or the session broke.
    Connection,
    /// The engine rejected or failed the statement.
    Query,
    /// Unexpected response from the engine.
    Protocol,
    Other,
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    /// Native error code reported by the engine, if any.
    pub code: Option<String>,
    pub message: String,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Connection, message)
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Query, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Other, message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DriverStatus {
    Running,
    Finished,
    Failed(DriverError),
}

#[async_trait]
pub trait EngineDriver: Send + Sync {
    /// Submit `statement` without waiting for it to finish.
    async fn submit(&mut self, statement: &str) -> Result<(), DriverError>;

    async fn status(&mut self) -> Result<DriverStatus, DriverError>;

    async fn cancel(&mut self) -> Result<(), DriverError>;

    /// Result column names. Empty for statements without a result set.
    async fn columns(&mut self) -> Result<Vec<String>, DriverError>;

    /// Up to `batch` further rows. An empty batch means the result is drained.
    async fn fetch(&mut self, batch: usize) -> Result<Vec<Row>, DriverError>;

    /// The complete log of the current statement so far.
    async fn logs(&mut self) -> Result<String, DriverError>;

    /// Best-effort completion percentage of the current statement.
    fn progress(&self) -> Option<f64> {
        None
    }

    fn tracking_url(&self) -> Option<String> {
        None
    }

    async fn close(&mut self) -> Result<(), DriverError>;
}

#[async_trait]
pub trait DriverConnector: Send + Sync + fmt::Debug {
    async fn connect(
        &self,
        params: &ConnectionParams,
    ) -> Result<Box<dyn EngineDriver>, DriverError>;
}

/// Render a cell the way it is stored in result CSV files.
pub fn cell_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cells_render_without_json_quoting() {
        assert_eq!(cell_to_string(&json!(null)), "");
        assert_eq!(cell_to_string(&json!("text")), "text");
        assert_eq!(cell_to_string(&json!(42)), "42");
        assert_eq!(cell_to_string(&json!(1.5)), "1.5");
        assert_eq!(cell_to_string(&json!(true)), "true");
    }
}

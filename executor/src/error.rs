use catalog::CatalogError;
use model::engine::EngineId;
use model::execution::ExecutionId;
use model::execution::execution_error::ErrorKind;
use thiserror::Error;

/// Bookkeeping failure while driving an execution.
///
/// Engine faults never surface here; they terminate the execution through the
/// error path and are persisted as an execution error instead.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("No open cursor for execution {0}")]
    NoCursor(ExecutionId),
}

/// Reasons an execution cannot be turned into a running executor.
#[derive(Error, Debug)]
pub enum FactoryError {
    #[error("Execution {id} cannot be started: {reason}")]
    InvalidExecution { id: ExecutionId, reason: String },

    #[error("Engine {0} is archived")]
    ArchivedEngine(EngineId),

    #[error("No executor '{executor}' registered for language '{language}'")]
    UnknownExecutor { language: String, executor: String },

    #[error("Access to table {schema}.{table} is not allowed")]
    AclViolation { schema: String, table: String },

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

impl FactoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FactoryError::ArchivedEngine(_) | FactoryError::AclViolation { .. } => {
                ErrorKind::Validation
            }
            FactoryError::InvalidExecution { .. }
            | FactoryError::UnknownExecutor { .. }
            | FactoryError::Catalog(_) => ErrorKind::Internal,
        }
    }
}

use model::engine::EngineId;
use model::execution::ExecutionId;
use model::execution::execution_status::ExecutionStatus;
use model::execution::statement::StatementId;
use model::metastore::MetastoreId;
use model::user::UserId;
use sea_orm::{DbErr, TransactionError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Execution {0} not found")]
    ExecutionNotFound(ExecutionId),

    #[error("Statement {0} not found")]
    StatementNotFound(StatementId),

    #[error("Engine {0} not found")]
    EngineNotFound(EngineId),

    #[error("Metastore {0} not found")]
    MetastoreNotFound(MetastoreId),

    #[error("User {0} not found")]
    UserNotFound(UserId),

    #[error("Execution {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: ExecutionId,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
}

impl From<TransactionError<CatalogError>> for CatalogError {
    fn from(err: TransactionError<CatalogError>) -> Self {
        match err {
            TransactionError::Connection(db_err) => CatalogError::Database(db_err),
            TransactionError::Transaction(err) => err,
        }
    }
}

use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, DatabaseConnection, DbErr, RuntimeErr, sqlx};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::info;

const SQLITE_BUSY_CODE: &str = "5";
const SQLITE_LOCKED_CODE: &str = "6";
const SQLITE_BUSY_RECOVERY: &str = "261";
const SQLITE_BUSY_SNAPSHOT: &str = "517";
const SQLITE_LOCKED_SHARED_CACHE: &str = "262";

const IN_MEMORY_DB: &str = "sqlite::memory:";

#[derive(Clone, Debug)]
pub enum StateBackend {
    Memory,
    Sqlite { endpoint: String },
    Postgres { endpoint: String },
}

impl StateBackend {
    /// Pick a backend from a database URL.
    pub fn from_url(url: &str) -> Result<Self, StateError> {
        if url == IN_MEMORY_DB {
            Ok(StateBackend::Memory)
        } else if url.starts_with("sqlite:") {
            Ok(StateBackend::Sqlite {
                endpoint: url.to_owned(),
            })
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(StateBackend::Postgres {
                endpoint: url.to_owned(),
            })
        } else {
            Err(StateError::UnsupportedUrl(url.to_owned()))
        }
    }
}

#[derive(Clone)]
pub struct State {
    pub conn: DatabaseConnection,
    pub endpoint: String,
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Storage backend for '{0}' currently not supported")]
    UnsupportedUrl(String),
}

impl State {
    pub async fn with(backend: StateBackend) -> Result<Self, StateError> {
        const MAX_DURATION: Duration = Duration::new(u64::MAX / 4, 0);

        let (endpoint, opts) = match backend {
            // A single connection keeps every caller on the same in-memory database
            StateBackend::Memory => (
                IN_MEMORY_DB.to_owned(),
                ConnectOptions::new(IN_MEMORY_DB)
                    .min_connections(1)
                    .max_connections(1)
                    .acquire_timeout(MAX_DURATION)
                    .connect_timeout(MAX_DURATION)
                    .to_owned(),
            ),
            StateBackend::Sqlite { endpoint } => {
                let opts = ConnectOptions::new(endpoint.clone())
                    .max_connections(1)
                    .sqlx_logging(false)
                    .to_owned();
                (endpoint, opts)
            }
            StateBackend::Postgres { endpoint } => {
                let opts = ConnectOptions::new(endpoint.clone())
                    .max_connections(16)
                    .sqlx_logging(false)
                    .to_owned();
                (endpoint, opts)
            }
        };

        info!("Connecting to {endpoint}");
        let conn = sea_orm::Database::connect(opts).await?;
        Ok(Self { conn, endpoint })
    }

    #[cfg(any(test, feature = "testing"))]
    pub async fn for_test() -> Self {
        let this = Self::with(StateBackend::Memory).await.unwrap();
        this.migrate().await.unwrap();
        this
    }

    pub async fn migrate(&self) -> Result<(), StateError> {
        Migrator::up(&self.conn, None).await?;
        Ok(())
    }

    pub fn should_retry(err: &DbErr) -> bool {
        let sqlx_err = match err {
            DbErr::Conn(RuntimeErr::SqlxError(e))
            | DbErr::Exec(RuntimeErr::SqlxError(e))
            | DbErr::Query(RuntimeErr::SqlxError(e)) => e,
            DbErr::ConnectionAcquire(_) => return true,
            _ => return false,
        };

        match sqlx_err {
            sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| {
                code == SQLITE_BUSY_CODE
                    || code == SQLITE_LOCKED_CODE
                    || code == SQLITE_BUSY_SNAPSHOT
                    || code == SQLITE_BUSY_RECOVERY
                    || code == SQLITE_LOCKED_SHARED_CACHE
            }),
            sqlx::Error::Io(_) => true,
            sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Protocol(_) => true,
            _ => false,
        }
    }

    fn retry_strategy() -> impl Iterator<Item = Duration> {
        const DB_BASE_RETRY_DURATION: u64 = 50;
        const DB_MAX_RETRIES: usize = 5;

        ExponentialBackoff::from_millis(DB_BASE_RETRY_DURATION)
            .map(jitter)
            .take(DB_MAX_RETRIES)
    }

    /// Run `action` and retry it while the database reports transient contention.
    ///
    /// `action` is a factory because a future cannot be polled again after it failed.
    pub async fn with_retry<T, F, Fut>(&self, action: F) -> Result<T, DbErr>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DbErr>>,
    {
        RetryIf::spawn(Self::retry_strategy(), action, Self::should_retry).await
    }
}

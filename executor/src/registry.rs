use crate::adapters::SqlxConnector;
use crate::cursor::{Cursor, DriverCursor};
use crate::dialect::Dialect;
use crate::driver::{DriverConnector, DriverError};
use model::engine::ConnectionParams;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Languages an executor accepts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LanguageMatch {
    Exact(String),
    AnyOf(Vec<String>),
}

impl LanguageMatch {
    pub fn any_of<I: IntoIterator<Item = S>, S: Into<String>>(languages: I) -> Self {
        LanguageMatch::AnyOf(languages.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, language: &str) -> bool {
        match self {
            LanguageMatch::Exact(l) => l == language,
            LanguageMatch::AnyOf(ls) => ls.iter().any(|l| l == language),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExecutorSpec {
    pub name: String,
    pub languages: LanguageMatch,
    connector: Arc<dyn DriverConnector>,
}

impl ExecutorSpec {
    pub fn new(
        name: impl Into<String>,
        languages: LanguageMatch,
        connector: Arc<dyn DriverConnector>,
    ) -> Self {
        Self {
            name: name.into(),
            languages,
            connector,
        }
    }

    /// Connect to the engine and wrap the session into a cursor for `language`.
    pub async fn open_cursor(
        &self,
        language: &str,
        params: &ConnectionParams,
        batch_size: usize,
    ) -> Result<Box<dyn Cursor>, DriverError> {
        let driver = self.connector.connect(params).await?;
        debug!("Connected executor '{}' for {language}", self.name);
        Ok(Box::new(DriverCursor::new(
            driver,
            Dialect::from_language(language),
            batch_size,
        )))
    }
}

/// Executors known to the process, keyed by executor name.
#[derive(Clone, Debug, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Vec<ExecutorSpec>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in executors: `sqlalchemy` backed by sqlx for sqlite, postgresql and mysql.
    pub fn with_defaults() -> Self {
        Self::new().register(ExecutorSpec::new(
            "sqlalchemy",
            LanguageMatch::any_of(["sqlite", "postgresql", "mysql"]),
            Arc::new(SqlxConnector),
        ))
    }

    pub fn register(mut self, spec: ExecutorSpec) -> Self {
        self.executors
            .entry(spec.name.clone())
            .or_default()
            .push(spec);
        self
    }

    pub fn lookup(&self, language: &str, name: &str) -> Option<&ExecutorSpec> {
        self.executors
            .get(name)?
            .iter()
            .find(|spec| spec.languages.matches(language))
    }
}

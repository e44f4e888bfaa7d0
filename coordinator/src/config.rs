use catalog::database::{StateBackend, StateError};
use executor::ExecutorSettings;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use store::{ReaderOptions, UploaderOptions};
use thiserror::Error;

pub const DATABASE_URL_ENV: &str = "COORDINATOR_DATABASE_URL";
pub const STORE_URL_ENV: &str = "COORDINATOR_STORE_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid database url: {0}")]
    Database(#[from] StateError),
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// `memory://` or `file:///some/dir`.
    pub url: String,
    pub result_prefix: String,
    pub read_chunk_size: usize,
    pub max_read_size: Option<usize>,
    pub min_part_size: usize,
    pub max_parts: usize,
    /// Upper bound on rows returned by a single result read.
    pub read_row_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let reader = ReaderOptions::default();
        let uploader = UploaderOptions::default();
        Self {
            url: "memory://".to_string(),
            result_prefix: ExecutorSettings::default().result_prefix,
            read_chunk_size: reader.chunk_size,
            max_read_size: reader.max_read_size,
            min_part_size: uploader.min_part_size,
            max_parts: uploader.max_parts,
            read_row_limit: 1000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    pub fast_poll_interval_ms: u64,
    pub slow_poll_interval_ms: u64,
    pub fast_poll_window_secs: u64,
    pub timeout_secs: Option<u64>,
    pub result_row_limit: usize,
    pub fetch_batch_size: usize,
    /// Interval at which the service looks for submitted executions without a notification.
    pub reconcile_interval_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let settings = ExecutorSettings::default();
        Self {
            fast_poll_interval_ms: settings.fast_poll_interval.as_millis() as u64,
            slow_poll_interval_ms: settings.slow_poll_interval.as_millis() as u64,
            fast_poll_window_secs: settings.fast_poll_window.as_secs(),
            timeout_secs: None,
            result_row_limit: settings.result_row_limit,
            fetch_batch_size: settings.fetch_batch_size,
            reconcile_interval_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub database: DatabaseConfig,
    pub store: StoreConfig,
    pub executor: ExecutorConfig,
    pub request_channel_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            store: StoreConfig::default(),
            executor: ExecutorConfig::default(),
            request_channel_capacity: 16,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read `path` and apply the environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_toml(&text)?.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(DATABASE_URL_ENV) {
            self.database.url = url;
        }
        if let Some(url) = lookup(STORE_URL_ENV) {
            self.store.url = url;
        }
        self
    }

    pub fn state_backend(&self) -> Result<StateBackend, ConfigError> {
        Ok(StateBackend::from_url(&self.database.url)?)
    }

    pub fn reader_options(&self) -> ReaderOptions {
        let options = ReaderOptions::default().with_chunk_size(self.store.read_chunk_size);
        match self.store.max_read_size {
            Some(max) => options.with_max_read_size(max),
            None => options,
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        let executor = &self.executor;
        ExecutorSettings {
            result_prefix: self.store.result_prefix.clone(),
            uploader: UploaderOptions::default()
                .with_min_part_size(self.store.min_part_size)
                .with_max_parts(self.store.max_parts),
            fast_poll_interval: Duration::from_millis(executor.fast_poll_interval_ms),
            slow_poll_interval: Duration::from_millis(executor.slow_poll_interval_ms),
            fast_poll_window: Duration::from_secs(executor.fast_poll_window_secs),
            result_row_limit: executor.result_row_limit,
            fetch_batch_size: executor.fetch_batch_size,
            timeout: executor.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.executor.reconcile_interval_ms)
    }
}

use crate::events::EventBus;
use crate::registry::ExecutorRegistry;
use crate::splitter::{DefaultSplitter, StatementSplitter};
use crate::table_extractor::{NoTableExtractor, TableExtractor};
use catalog::Catalog;
use object_store::ObjectStore;
use std::sync::Arc;
use std::time::Duration;
use store::UploaderOptions;

#[derive(Clone, Debug)]
pub struct ExecutorSettings {
    /// Key prefix under which result and log blobs are written.
    pub result_prefix: String,
    pub uploader: UploaderOptions,
    pub fast_poll_interval: Duration,
    pub slow_poll_interval: Duration,
    /// Age of an execution after which it is polled at the slow interval.
    pub fast_poll_window: Duration,
    /// Data rows stored per statement result.
    pub result_row_limit: usize,
    pub fetch_batch_size: usize,
    /// Wall-clock ceiling of a whole execution.
    pub timeout: Option<Duration>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            result_prefix: "executions".to_string(),
            uploader: UploaderOptions::default(),
            fast_poll_interval: Duration::from_secs(1),
            slow_poll_interval: Duration::from_secs(10),
            fast_poll_window: Duration::from_secs(15 * 60),
            result_row_limit: 100_000,
            fetch_batch_size: 1000,
            timeout: None,
        }
    }
}

impl ExecutorSettings {
    /// Poll interval for an execution that has been running for `elapsed`.
    pub fn poll_interval(&self, elapsed: Duration) -> Duration {
        if elapsed < self.fast_poll_window {
            self.fast_poll_interval
        } else {
            self.slow_poll_interval
        }
    }
}

/// Everything an executor needs, passed explicitly to each worker task.
#[derive(Clone)]
pub struct WorkerContext {
    pub catalog: Catalog,
    pub store: Arc<dyn ObjectStore>,
    pub registry: Arc<ExecutorRegistry>,
    pub events: EventBus,
    pub splitter: Arc<dyn StatementSplitter>,
    pub table_extractor: Arc<dyn TableExtractor>,
    pub settings: ExecutorSettings,
}

impl WorkerContext {
    pub fn new(
        catalog: Catalog,
        store: Arc<dyn ObjectStore>,
        registry: Arc<ExecutorRegistry>,
    ) -> Self {
        Self {
            catalog,
            store,
            registry,
            events: EventBus::default(),
            splitter: Arc::new(DefaultSplitter),
            table_extractor: Arc::new(NoTableExtractor),
            settings: ExecutorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_splitter(mut self, splitter: Arc<dyn StatementSplitter>) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_table_extractor(mut self, extractor: Arc<dyn TableExtractor>) -> Self {
        self.table_extractor = extractor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polls_slow_down_after_the_fast_window() {
        let settings = ExecutorSettings::default();
        assert_eq!(settings.poll_interval(Duration::ZERO), Duration::from_secs(1));
        assert_eq!(
            settings.poll_interval(Duration::from_secs(15 * 60 - 1)),
            Duration::from_secs(1)
        );
        assert_eq!(
            settings.poll_interval(Duration::from_secs(15 * 60)),
            Duration::from_secs(10)
        );
    }
}

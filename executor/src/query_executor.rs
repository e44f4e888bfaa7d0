use crate::context::ExecutorSettings;
use crate::cursor::{Cursor, ParsedError, PollResult};
use crate::dialect::Dialect;
use crate::driver::cell_to_string;
use crate::error::ExecutorError;
use crate::logger::ExecutionLogger;
use crate::progress::ExecutionProgress;
use crate::registry::ExecutorSpec;
use model::engine::ConnectionParams;
use model::execution::execution_status::ExecutionStatus;
use model::execution::statement::StatementRange;
use model::execution::{ExecutionId, ExecutionType};
use object_store::ObjectStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use store::csv_rows::encode_record;
use store::{Uploader, keys};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Drives one execution through its statements, one poll at a time.
///
/// ```text
/// Delivered ──start──▶ Running ──last statement done──▶ Done
///     │                   ├──fault / timeout──────────▶ Error
///     └──────cancel───────┴──cancel───────────────────▶ Cancel
/// ```
///
/// Every operation takes `&mut self`, so a single task owns the executor and
/// statement `n + 1` is only submitted after statement `n` was finalized.
pub struct QueryExecutor {
    execution_id: ExecutionId,
    execution_type: ExecutionType,
    query: String,
    language: String,
    params: ConnectionParams,
    ranges: Vec<StatementRange>,
    spec: ExecutorSpec,
    store: Arc<dyn ObjectStore>,
    settings: ExecutorSettings,
    logger: ExecutionLogger,
    status: ExecutionStatus,
    cursor: Option<Box<dyn Cursor>>,
    current: usize,
    cancel_sent: bool,
    created: Instant,
}

pub(crate) struct ExecutorParts {
    pub execution_id: ExecutionId,
    pub execution_type: ExecutionType,
    pub query: String,
    pub language: String,
    pub params: ConnectionParams,
    pub ranges: Vec<StatementRange>,
    pub spec: ExecutorSpec,
    pub store: Arc<dyn ObjectStore>,
    pub settings: ExecutorSettings,
    pub logger: ExecutionLogger,
}

impl QueryExecutor {
    pub(crate) fn new(parts: ExecutorParts) -> Self {
        Self {
            execution_id: parts.execution_id,
            execution_type: parts.execution_type,
            query: parts.query,
            language: parts.language,
            params: parts.params,
            ranges: parts.ranges,
            spec: parts.spec,
            store: parts.store,
            settings: parts.settings,
            logger: parts.logger,
            status: ExecutionStatus::Delivered,
            cursor: None,
            current: 0,
            cancel_sent: false,
            created: Instant::now(),
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn statement_ranges(&self) -> &[StatementRange] {
        &self.ranges
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ExecutionProgress> {
        self.logger.subscribe_progress()
    }

    pub fn sleep_interval(&self) -> Duration {
        self.settings.poll_interval(self.created.elapsed())
    }

    pub async fn sleep(&self) {
        tokio::time::sleep(self.sleep_interval()).await;
    }

    /// Open the engine session and submit the first statement.
    pub async fn start(&mut self) -> Result<(), ExecutorError> {
        let begun = self.begin().await;
        self.recover(begun).await
    }

    async fn begin(&mut self) -> Result<(), ExecutorError> {
        if self.status != ExecutionStatus::Delivered {
            return Ok(());
        }
        let cursor = self
            .spec
            .open_cursor(&self.language, &self.params, self.settings.fetch_batch_size)
            .await;
        match cursor {
            Ok(cursor) => self.cursor = Some(cursor),
            Err(e) => {
                let parsed = Dialect::from_language(&self.language).classify(&e);
                return self.fail(parsed).await;
            }
        }

        self.logger
            .on_query_start(
                self.ranges.len(),
                json!({
                    "total": self.ranges.len(),
                    "execution_type": self.execution_type.to_string(),
                }),
            )
            .await?;
        self.status = ExecutionStatus::Running;
        self.start_statement(0).await
    }

    async fn start_statement(&mut self, index: usize) -> Result<(), ExecutorError> {
        self.current = index;
        let range = self.ranges[index];
        self.logger.on_statement_start(index, range).await?;
        debug!(
            "Execution {} submitting statement {}/{}",
            self.execution_id,
            index + 1,
            self.ranges.len()
        );

        let cursor = self
            .cursor
            .as_mut()
            .ok_or(ExecutorError::NoCursor(self.execution_id))?;
        let submitted = cursor.run(range.slice(&self.query)).await;
        match submitted {
            Ok(()) => Ok(()),
            Err(parsed) => self.fail(parsed).await,
        }
    }

    /// Advance the execution by one step. Returns the status afterwards.
    ///
    /// A catalog failure while stepping ends the execution with an internal
    /// error. Only a failure to record that error is returned.
    pub async fn poll(&mut self) -> Result<ExecutionStatus, ExecutorError> {
        let stepped = self.step().await;
        self.recover(stepped).await?;
        Ok(self.status)
    }

    async fn step(&mut self) -> Result<(), ExecutorError> {
        if self.status == ExecutionStatus::Delivered {
            self.begin().await?;
        }
        if self.status != ExecutionStatus::Running {
            return Ok(());
        }

        let cursor = self
            .cursor
            .as_mut()
            .ok_or(ExecutorError::NoCursor(self.execution_id))?;
        let polled = cursor.poll().await;
        match polled {
            PollResult::StillRunning => self.report_progress().await,
            PollResult::Finished => self.finish_statement().await,
            PollResult::Faulted(parsed) => self.fail(parsed).await,
        }
    }

    async fn recover(&mut self, result: Result<(), ExecutorError>) -> Result<(), ExecutorError> {
        let Err(e) = result else {
            return Ok(());
        };
        if self.status.is_terminal() {
            return Err(e);
        }
        warn!("Execution {} lost its bookkeeping: {e}", self.execution_id);
        self.cancel_cursor().await;
        self.fail(ParsedError::internal(e.to_string())).await
    }

    async fn report_progress(&mut self) -> Result<(), ExecutorError> {
        let cursor = self
            .cursor
            .as_mut()
            .ok_or(ExecutorError::NoCursor(self.execution_id))?;
        let logs = match cursor.get_logs().await {
            Ok(logs) => logs,
            Err(parsed) => return self.fail(parsed).await,
        };
        let percent = cursor.percent_complete();
        let tracking_url = cursor.tracking_url();
        self.logger
            .on_statement_update(&logs, percent, tracking_url)
            .await
    }

    async fn finish_statement(&mut self) -> Result<(), ExecutorError> {
        self.report_progress().await?;
        if self.status != ExecutionStatus::Running {
            return Ok(());
        }
        self.logger.on_statement_upload().await?;

        let statement_id = self
            .logger
            .statement_id()
            .ok_or(ExecutorError::NoCursor(self.execution_id))?;
        let key = keys::result_key(&self.settings.result_prefix, self.execution_id, statement_id);
        let cursor = self
            .cursor
            .as_mut()
            .ok_or(ExecutorError::NoCursor(self.execution_id))?;
        let upload = upload_result(cursor, self.store.clone(), &key, &self.settings).await;
        let (result_key, row_count) = match upload {
            Ok(result) => result,
            Err(parsed) => return self.fail(parsed).await,
        };
        self.logger.on_statement_end(result_key, row_count).await?;

        let next = self.current + 1;
        if next < self.ranges.len() {
            return self.start_statement(next).await;
        }
        self.close_cursor().await;
        self.logger.on_query_end().await?;
        self.status = ExecutionStatus::Done;
        Ok(())
    }

    /// Stop the execution. Does nothing once it is terminal.
    pub async fn cancel(&mut self) -> Result<(), ExecutorError> {
        if self.status.is_terminal() {
            return Ok(());
        }
        self.cancel_cursor().await;
        self.close_cursor().await;
        self.logger.on_cancel().await?;
        self.status = ExecutionStatus::Cancel;
        Ok(())
    }

    /// Terminate an execution that ran past its wall-clock ceiling.
    pub async fn fail_with_timeout(&mut self) -> Result<(), ExecutorError> {
        if self.status.is_terminal() {
            return Ok(());
        }
        self.cancel_cursor().await;
        let elapsed = self.created.elapsed();
        self.fail(ParsedError::timeout(format!(
            "Execution exceeded its time limit after {}s",
            elapsed.as_secs()
        )))
        .await
    }

    async fn cancel_cursor(&mut self) {
        if self.cancel_sent {
            return;
        }
        if let Some(cursor) = self.cursor.as_mut() {
            self.cancel_sent = true;
            if let Err(e) = cursor.cancel().await {
                warn!("Failed to cancel execution {} on the engine: {}", self.execution_id, e.message);
            }
        }
    }

    async fn close_cursor(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close().await;
        }
    }

    async fn fail(&mut self, parsed: ParsedError) -> Result<(), ExecutorError> {
        if self.status.is_terminal() {
            return Ok(());
        }
        let parsed = match (self.logger.statement_id(), self.ranges.get(self.current)) {
            (Some(_), Some(range)) => parsed.relative_to(&self.query[..range.start]),
            _ => parsed,
        };
        self.close_cursor().await;
        self.logger.on_exception(&parsed).await?;
        self.status = ExecutionStatus::Error;
        info!("Execution {} ended with {} error", self.execution_id, parsed.kind);
        Ok(())
    }
}

enum Write {
    Stored,
    Capped,
    Failed,
}

/// Stream the current result into `key`. Returns the stored key and data row count.
///
/// Statements without columns store nothing. Blob store failures are logged and
/// leave the key empty; engine failures are returned.
async fn upload_result(
    cursor: &mut Box<dyn Cursor>,
    store: Arc<dyn ObjectStore>,
    key: &str,
    settings: &ExecutorSettings,
) -> Result<(Option<String>, i64), ParsedError> {
    let columns = cursor.get_columns().await?;
    if columns.is_empty() {
        return Ok((None, 0));
    }

    let mut uploader = match Uploader::open(store, key, settings.uploader).await {
        Ok(uploader) => uploader,
        Err(e) => {
            warn!("Failed to start result upload {key}: {e}");
            return Ok((None, 0));
        }
    };
    match write_record(&mut uploader, &columns).await {
        Write::Stored => {}
        Write::Capped => return complete(uploader, key, 0).await,
        Write::Failed => return Ok((None, 0)),
    }

    let mut rows = 0;
    while rows < settings.result_row_limit {
        let Some(row) = cursor.next_row().await? else {
            break;
        };
        let fields: Vec<String> = row.iter().map(cell_to_string).collect();
        match write_record(&mut uploader, &fields).await {
            Write::Stored => rows += 1,
            Write::Capped => break,
            Write::Failed => return Ok((None, rows as i64)),
        }
    }
    complete(uploader, key, rows).await
}

async fn complete(
    uploader: Uploader,
    key: &str,
    rows: usize,
) -> Result<(Option<String>, i64), ParsedError> {
    match uploader.complete().await {
        Ok(()) => Ok((Some(key.to_string()), rows as i64)),
        Err(e) => {
            warn!("Failed to complete result upload {key}: {e}");
            Ok((None, rows as i64))
        }
    }
}

async fn write_record(uploader: &mut Uploader, fields: &[String]) -> Write {
    let record = match encode_record(fields) {
        Ok(record) => record,
        Err(e) => {
            warn!("Failed to encode result row: {e}");
            return Write::Failed;
        }
    };
    match uploader.write(&record).await {
        Ok(true) => Write::Stored,
        Ok(false) => {
            info!("Result upload reached its part limit");
            Write::Capped
        }
        Err(e) => {
            warn!("Failed to upload result part: {e}");
            Write::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WorkerContext;
    use crate::driver::DriverError;
    use crate::events::{EventKind, LifecycleEvent};
    use crate::factory::create_executor_from_execution;
    use crate::testing::{ScriptedConnector, StatementScript, TestHarness};
    use async_trait::async_trait;
    use catalog::test_utils::execute_raw;
    use futures_util::stream::BoxStream;
    use model::engine;
    use model::execution::execution_error::{ErrorKind, ErrorPosition};
    use model::execution::statement::StatementStatus;
    use object_store::memory::InMemory;
    use object_store::path::Path;
    use object_store::{
        GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, PutMultipartOpts,
        PutOptions, PutPayload, PutResult,
    };
    use serde_json::json;
    use std::fmt;
    use tokio::sync::broadcast;

    /// In-memory store that refuses every multipart upload.
    #[derive(Debug, Default)]
    struct NoUploads {
        inner: InMemory,
    }

    impl fmt::Display for NoUploads {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "NoUploads")
        }
    }

    #[async_trait]
    impl ObjectStore for NoUploads {
        async fn put_opts(
            &self,
            location: &Path,
            payload: PutPayload,
            opts: PutOptions,
        ) -> object_store::Result<PutResult> {
            self.inner.put_opts(location, payload, opts).await
        }

        async fn put_multipart_opts(
            &self,
            _location: &Path,
            _opts: PutMultipartOpts,
        ) -> object_store::Result<Box<dyn MultipartUpload>> {
            Err(object_store::Error::Generic {
                store: "NoUploads",
                source: "bucket is read-only".into(),
            })
        }

        async fn get_opts(
            &self,
            location: &Path,
            options: GetOptions,
        ) -> object_store::Result<GetResult> {
            self.inner.get_opts(location, options).await
        }

        async fn delete(&self, location: &Path) -> object_store::Result<()> {
            self.inner.delete(location).await
        }

        fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
            self.inner.list(prefix)
        }

        async fn list_with_delimiter(
            &self,
            prefix: Option<&Path>,
        ) -> object_store::Result<ListResult> {
            self.inner.list_with_delimiter(prefix).await
        }

        async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.inner.copy(from, to).await
        }

        async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.inner.copy_if_not_exists(from, to).await
        }
    }

    async fn executor_for(ctx: &WorkerContext, engine: &engine::Model, query: &str) -> QueryExecutor {
        let execution = ctx
            .catalog
            .execution
            .create_execution(model::execution::CreateExecution::new(query, engine.id, 1))
            .await
            .unwrap();
        create_executor_from_execution(ctx, execution.id, "task", ExecutionType::Adhoc)
            .await
            .unwrap()
    }

    async fn run_to_end(executor: &mut QueryExecutor) -> ExecutionStatus {
        for _ in 0..100 {
            let status = executor.poll().await.unwrap();
            if status.is_terminal() {
                return status;
            }
        }
        panic!("execution did not finish");
    }

    async fn blob(ctx: &WorkerContext, key: &str) -> String {
        let bytes = ctx
            .store
            .get(&Path::from(key))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn drain(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn kinds(events: &[LifecycleEvent]) -> Vec<EventKind> {
        events
            .iter()
            .map(|e| e.kind)
            .filter(|k| *k != EventKind::StatementUpdate)
            .collect()
    }

    #[tokio::test]
    async fn hive_runs_two_statements_in_order() {
        let connector = ScriptedConnector::new()
            .with_script(
                "SELECT 1",
                StatementScript::rows(vec!["_c0"], vec![vec![json!(1)]]).with_polls(2),
            )
            .with_script(
                "SELECT 2",
                StatementScript::rows(vec!["_c0"], vec![vec![json!(2)]]).with_polls(1),
            );
        let harness = TestHarness::new(connector).await;
        let hive = harness.engine("hive").await;
        let mut events = harness.ctx.events.subscribe();
        let mut executor = executor_for(&harness.ctx, &hive, "SELECT 1; SELECT 2;").await;

        assert_eq!(run_to_end(&mut executor).await, ExecutionStatus::Done);
        let id = executor.execution_id();
        let catalog = &harness.ctx.catalog.execution;
        let execution = catalog.get_execution(id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Done);
        assert!(execution.completed_at.is_some());

        let statements = catalog.get_statements(id).await.unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements.iter().map(|s| s.range()).collect::<Vec<_>>(),
            vec![StatementRange::new(0, 8), StatementRange::new(10, 18)]
        );
        for (statement, expected) in statements.iter().zip(["_c0\n1\n", "_c0\n2\n"]) {
            assert_eq!(statement.status, StatementStatus::Done);
            assert_eq!(statement.result_row_count, 1);
            let key = statement.result_key.as_deref().unwrap();
            assert_eq!(key, keys::result_key("executions", id, statement.id));
            assert_eq!(blob(&harness.ctx, key).await, expected);
        }
        assert!(statements[0].completed_at <= Some(statements[1].created_at));
        assert_eq!(harness.connector.submitted(), vec!["SELECT 1", "SELECT 2"]);
        assert!(catalog.get_error(id).await.unwrap().is_none());

        let events = drain(&mut events);
        assert_eq!(
            kinds(&events),
            vec![
                EventKind::QueryStart,
                EventKind::StatementStart,
                EventKind::StatementEnd,
                EventKind::StatementStart,
                EventKind::StatementEnd,
                EventKind::QueryEnd,
            ]
        );
        assert_eq!(events[0].payload["total"], 2);
        assert_eq!(executor.subscribe_progress().borrow().percent_complete, 100.0);
    }

    #[tokio::test]
    async fn syntax_error_reports_query_position() {
        let query = "SELECT *\nFROM t\nWHER x = 1";
        let connector = ScriptedConnector::new().with_script(
            query,
            StatementScript::fail(DriverError::query(
                "Error while compiling statement: FAILED: ParseException line 3:5 mismatched input 'WHER'",
            )),
        );
        let harness = TestHarness::new(connector).await;
        let hive = harness.engine("hive").await;
        let mut events = harness.ctx.events.subscribe();
        let mut executor = executor_for(&harness.ctx, &hive, query).await;

        assert_eq!(run_to_end(&mut executor).await, ExecutionStatus::Error);
        let id = executor.execution_id();
        let catalog = &harness.ctx.catalog.execution;
        let error = catalog.get_error(id).await.unwrap().unwrap();
        assert_eq!(error.kind, ErrorKind::Engine);
        assert_eq!(error.position(), Some(ErrorPosition { line: 3, column: Some(5) }));
        assert_eq!(error.extracted_message.as_deref(), Some("mismatched input 'WHER'"));

        let statements = catalog.get_statements(id).await.unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].status, StatementStatus::Error);
        assert_eq!(statements[0].result_key, None);

        let events = drain(&mut events);
        let last = events.last().unwrap();
        assert_eq!(last.kind, EventKind::QueryException);
        assert_eq!(last.payload["line"], 3);
        assert_eq!(last.payload["column"], 5);
    }

    #[tokio::test]
    async fn positions_of_later_statements_are_query_relative() {
        let connector = ScriptedConnector::new().with_script(
            "SELECT * FORM t",
            StatementScript::fail(DriverError::query("line 1:10: mismatched input 'FORM'")),
        );
        let harness = TestHarness::new(connector).await;
        let presto = harness.engine("presto").await;

        let mut same_line = executor_for(&harness.ctx, &presto, "SELECT 1; SELECT * FORM t").await;
        run_to_end(&mut same_line).await;
        let error = harness
            .ctx
            .catalog
            .execution
            .get_error(same_line.execution_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(error.position(), Some(ErrorPosition { line: 1, column: Some(20) }));

        let mut next_line = executor_for(&harness.ctx, &presto, "SELECT 1;\n\nSELECT * FORM t").await;
        run_to_end(&mut next_line).await;
        let error = harness
            .ctx
            .catalog
            .execution
            .get_error(next_line.execution_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(error.position(), Some(ErrorPosition { line: 3, column: Some(10) }));
    }

    #[tokio::test]
    async fn failure_at_a_middle_statement_stops_the_execution() {
        let connector = ScriptedConnector::new()
            .with_script("SELECT 1", StatementScript::rows(vec!["a"], vec![vec![json!(1)]]))
            .with_script(
                "SELECT boom",
                StatementScript::fail(DriverError::query("no such column: boom")),
            );
        let harness = TestHarness::new(connector).await;
        let mut executor = executor_for(
            &harness.ctx,
            &harness.default_engine,
            "SELECT 1; SELECT boom; SELECT 3",
        )
        .await;

        assert_eq!(run_to_end(&mut executor).await, ExecutionStatus::Error);
        let statements = harness
            .ctx
            .catalog
            .execution
            .get_statements(executor.execution_id())
            .await
            .unwrap();
        assert_eq!(
            statements.iter().map(|s| s.status).collect::<Vec<_>>(),
            vec![StatementStatus::Done, StatementStatus::Error]
        );
        assert_eq!(harness.connector.submitted(), vec!["SELECT 1", "SELECT boom"]);
        let error = harness
            .ctx
            .catalog
            .execution
            .get_error(executor.execution_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(error.kind, ErrorKind::Engine);
        assert_eq!(error.message, "no such column: boom");
    }

    #[tokio::test]
    async fn repeated_polls_do_not_duplicate_work() {
        let connector = ScriptedConnector::new().with_script(
            "SELECT 1",
            StatementScript::rows(vec!["a"], vec![vec![json!(1)]]).with_polls(5),
        );
        let harness = TestHarness::new(connector).await;
        let mut events = harness.ctx.events.subscribe();
        let mut executor = executor_for(&harness.ctx, &harness.default_engine, "SELECT 1").await;

        assert_eq!(run_to_end(&mut executor).await, ExecutionStatus::Done);
        let status_calls = harness.connector.status_calls();
        for _ in 0..3 {
            assert_eq!(executor.poll().await.unwrap(), ExecutionStatus::Done);
        }
        assert_eq!(harness.connector.status_calls(), status_calls);

        let id = executor.execution_id();
        let statements = harness.ctx.catalog.execution.get_statements(id).await.unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].result_row_count, 1);
        let starts = drain(&mut events)
            .into_iter()
            .filter(|e| e.kind == EventKind::StatementStart)
            .count();
        assert_eq!(starts, 1);
        assert_eq!(blob(&harness.ctx, statements[0].result_key.as_deref().unwrap()).await, "a\n1\n");
    }

    #[tokio::test]
    async fn cancel_mid_poll_cancels_the_engine_once() {
        let connector =
            ScriptedConnector::new().with_script("SELECT sleep", StatementScript::never_finishes());
        let harness = TestHarness::new(connector).await;
        let mut events = harness.ctx.events.subscribe();
        let mut executor =
            executor_for(&harness.ctx, &harness.default_engine, "SELECT sleep").await;

        for _ in 0..3 {
            assert_eq!(executor.poll().await.unwrap(), ExecutionStatus::Running);
        }
        executor.cancel().await.unwrap();
        assert_eq!(executor.status(), ExecutionStatus::Cancel);
        executor.cancel().await.unwrap();
        assert_eq!(executor.poll().await.unwrap(), ExecutionStatus::Cancel);
        assert_eq!(harness.connector.cancel_calls(), 1);
        assert_eq!(harness.connector.closed(), 1);

        let id = executor.execution_id();
        let catalog = &harness.ctx.catalog.execution;
        assert_eq!(catalog.get_execution(id).await.unwrap().status, ExecutionStatus::Cancel);
        let statements = catalog.get_statements(id).await.unwrap();
        assert_eq!(statements[0].status, StatementStatus::Cancel);
        assert!(catalog.get_error(id).await.unwrap().is_none());

        let cancels = drain(&mut events)
            .into_iter()
            .filter(|e| e.kind == EventKind::QueryCancel)
            .count();
        assert_eq!(cancels, 1);
    }

    #[tokio::test]
    async fn cancel_before_start_and_after_done() {
        let harness = TestHarness::new(ScriptedConnector::new()).await;
        let mut pending = executor_for(&harness.ctx, &harness.default_engine, "SELECT 1").await;
        pending.cancel().await.unwrap();
        assert_eq!(pending.status(), ExecutionStatus::Cancel);
        assert_eq!(pending.poll().await.unwrap(), ExecutionStatus::Cancel);
        assert!(harness.connector.params().is_empty());
        assert!(
            harness
                .ctx
                .catalog
                .execution
                .get_statements(pending.execution_id())
                .await
                .unwrap()
                .is_empty()
        );

        let mut finished = executor_for(&harness.ctx, &harness.default_engine, "SELECT 1").await;
        assert_eq!(run_to_end(&mut finished).await, ExecutionStatus::Done);
        finished.cancel().await.unwrap();
        assert_eq!(finished.status(), ExecutionStatus::Done);
        assert_eq!(harness.connector.cancel_calls(), 0);
        assert_eq!(
            harness
                .ctx
                .catalog
                .execution
                .get_execution(finished.execution_id())
                .await
                .unwrap()
                .status,
            ExecutionStatus::Done
        );
    }

    #[tokio::test]
    async fn timeout_is_recorded_as_timeout_error() {
        let connector =
            ScriptedConnector::new().with_script("SELECT sleep", StatementScript::never_finishes());
        let harness = TestHarness::new(connector).await;
        let mut executor =
            executor_for(&harness.ctx, &harness.default_engine, "SELECT sleep").await;
        executor.poll().await.unwrap();

        executor.fail_with_timeout().await.unwrap();
        assert_eq!(executor.status(), ExecutionStatus::Error);
        executor.cancel().await.unwrap();
        assert_eq!(harness.connector.cancel_calls(), 1);

        let error = harness
            .ctx
            .catalog
            .execution
            .get_error(executor.execution_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(error.kind, ErrorKind::Timeout);
        assert_eq!(error.position(), None);
    }

    #[tokio::test]
    async fn statements_without_columns_store_no_result() {
        let harness = TestHarness::new(ScriptedConnector::new()).await;
        let mut executor = executor_for(
            &harness.ctx,
            &harness.default_engine,
            "CREATE TABLE t (a INT); DROP TABLE t",
        )
        .await;
        assert_eq!(run_to_end(&mut executor).await, ExecutionStatus::Done);

        let statements = harness
            .ctx
            .catalog
            .execution
            .get_statements(executor.execution_id())
            .await
            .unwrap();
        assert_eq!(statements.len(), 2);
        for statement in statements {
            assert_eq!(statement.status, StatementStatus::Done);
            assert_eq!(statement.result_key, None);
            assert_eq!(statement.result_row_count, 0);
        }
    }

    #[tokio::test]
    async fn results_stop_at_row_and_part_limits() {
        let rows = (0..5).map(|i| vec![json!(i)]).collect();
        let connector =
            ScriptedConnector::new().with_script("SELECT n", StatementScript::rows(vec!["n"], rows));
        let harness = TestHarness::new(connector).await;

        let mut settings = harness.ctx.settings.clone();
        settings.result_row_limit = 2;
        let limited = harness.ctx.clone().with_settings(settings);
        let mut executor = executor_for(&limited, &harness.default_engine, "SELECT n").await;
        run_to_end(&mut executor).await;
        let statement = &limited
            .catalog
            .execution
            .get_statements(executor.execution_id())
            .await
            .unwrap()[0];
        assert_eq!(statement.result_row_count, 2);
        assert_eq!(blob(&limited, statement.result_key.as_deref().unwrap()).await, "n\n0\n1\n");

        let mut settings = harness.ctx.settings.clone();
        settings.uploader = settings.uploader.with_min_part_size(1).with_max_parts(2);
        let capped = harness.ctx.clone().with_settings(settings);
        let mut executor = executor_for(&capped, &harness.default_engine, "SELECT n").await;
        run_to_end(&mut executor).await;
        let statement = &capped
            .catalog
            .execution
            .get_statements(executor.execution_id())
            .await
            .unwrap()[0];
        assert_eq!(statement.result_row_count, 1);
        assert_eq!(blob(&capped, statement.result_key.as_deref().unwrap()).await, "n\n0\n");
    }

    #[tokio::test]
    async fn logs_and_tracking_url_are_kept_per_statement() {
        let connector = ScriptedConnector::new().with_script(
            "SELECT 1",
            StatementScript::rows(vec!["a"], vec![vec![json!("x,y")]])
                .with_polls(1)
                .with_log_lines(["map 50%", "map 100%"])
                .with_tracking_url("http://tracker/job_1"),
        );
        let harness = TestHarness::new(connector).await;
        let mut executor = executor_for(&harness.ctx, &harness.default_engine, "SELECT 1").await;
        assert_eq!(run_to_end(&mut executor).await, ExecutionStatus::Done);

        let statement = &harness
            .ctx
            .catalog
            .execution
            .get_statements(executor.execution_id())
            .await
            .unwrap()[0];
        assert!(statement.has_log);
        assert_eq!(
            statement.meta_info.tracking_url.as_deref(),
            Some("http://tracker/job_1")
        );
        let log_key = statement.log_key.as_deref().unwrap();
        assert_eq!(blob(&harness.ctx, log_key).await, "map 50%\nmap 100%\n");
        assert!(
            harness
                .ctx
                .catalog
                .execution
                .get_log_chunks(statement.id)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            blob(&harness.ctx, statement.result_key.as_deref().unwrap()).await,
            "a\n\"x,y\"\n"
        );
    }

    #[tokio::test]
    async fn rejected_submission_fails_the_statement() {
        let connector = ScriptedConnector::new().with_script(
            "SELECT 1",
            StatementScript::rejected(DriverError::connection("connection refused")),
        );
        let harness = TestHarness::new(connector).await;
        let mut executor = executor_for(&harness.ctx, &harness.default_engine, "SELECT 1").await;
        assert_eq!(executor.poll().await.unwrap(), ExecutionStatus::Error);

        let id = executor.execution_id();
        let catalog = &harness.ctx.catalog.execution;
        let error = catalog.get_error(id).await.unwrap().unwrap();
        assert_eq!(error.kind, ErrorKind::Internal);
        assert_eq!(error.message, "connection refused");
        assert_eq!(
            catalog.get_statements(id).await.unwrap()[0].status,
            StatementStatus::Error
        );
    }

    #[tokio::test]
    async fn failed_uploads_keep_the_statement_done() {
        let connector = ScriptedConnector::new().with_script(
            "SELECT 1",
            StatementScript::rows(vec!["a"], vec![vec![json!(1)]])
                .with_polls(1)
                .with_log_lines(["stage 1"]),
        );
        let harness = TestHarness::new(connector).await;
        let mut ctx = harness.ctx.clone();
        ctx.store = Arc::new(NoUploads::default());
        let mut executor = executor_for(&ctx, &harness.default_engine, "SELECT 1").await;
        assert_eq!(run_to_end(&mut executor).await, ExecutionStatus::Done);

        let id = executor.execution_id();
        let catalog = &harness.ctx.catalog.execution;
        let statement = &catalog.get_statements(id).await.unwrap()[0];
        assert_eq!(statement.status, StatementStatus::Done);
        assert_eq!(statement.result_key, None);
        assert_eq!(statement.log_key, None);
        assert!(statement.has_log);
        // Unconsolidated logs stay readable from the catalog
        let chunks = catalog.get_log_chunks(statement.id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].log, "stage 1\n");
        assert!(catalog.get_error(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lost_log_storage_does_not_fail_the_execution() {
        let connector = ScriptedConnector::new().with_script(
            "SELECT 1",
            StatementScript::rows(vec!["a"], vec![vec![json!(1)]])
                .with_polls(3)
                .with_log_lines(["stage 1", "stage 2", "stage 3"]),
        );
        let harness = TestHarness::new(connector).await;
        let mut executor = executor_for(&harness.ctx, &harness.default_engine, "SELECT 1").await;
        assert_eq!(executor.poll().await.unwrap(), ExecutionStatus::Running);

        execute_raw(&harness.ctx.catalog, "DROP TABLE statement_log_chunk").await;
        assert_eq!(run_to_end(&mut executor).await, ExecutionStatus::Done);

        let id = executor.execution_id();
        let catalog = &harness.ctx.catalog.execution;
        let statement = &catalog.get_statements(id).await.unwrap()[0];
        assert_eq!(statement.status, StatementStatus::Done);
        assert_eq!(statement.log_key, None);
        assert!(statement.result_key.is_some());
        assert!(catalog.get_error(id).await.unwrap().is_none());
        assert_eq!(harness.connector.closed(), 1);
    }

    #[tokio::test]
    async fn catalog_failure_mid_statement_ends_with_internal_error() {
        let connector = ScriptedConnector::new().with_script(
            "SELECT 1",
            StatementScript::rows(vec!["a"], vec![vec![json!(1)]]).with_polls(1),
        );
        let harness = TestHarness::new(connector).await;
        execute_raw(
            &harness.ctx.catalog,
            "CREATE TRIGGER no_uploads BEFORE UPDATE ON statement_execution \
             WHEN NEW.status = 'Uploading' \
             BEGIN SELECT RAISE(ABORT, 'uploads are disabled'); END",
        )
        .await;
        let mut executor = executor_for(&harness.ctx, &harness.default_engine, "SELECT 1").await;

        assert_eq!(run_to_end(&mut executor).await, ExecutionStatus::Error);
        let id = executor.execution_id();
        let catalog = &harness.ctx.catalog.execution;
        assert_eq!(
            catalog.get_execution(id).await.unwrap().status,
            ExecutionStatus::Error
        );
        let statement = &catalog.get_statements(id).await.unwrap()[0];
        assert_eq!(statement.status, StatementStatus::Error);
        let error = catalog.get_error(id).await.unwrap().unwrap();
        assert_eq!(error.kind, ErrorKind::Internal);
        assert!(error.message.contains("uploads are disabled"), "{}", error.message);
        assert_eq!(harness.connector.cancel_calls(), 1);
        assert_eq!(harness.connector.closed(), 1);

        // Terminal now, later polls change nothing
        assert_eq!(executor.poll().await.unwrap(), ExecutionStatus::Error);
        assert_eq!(harness.connector.closed(), 1);
    }
}

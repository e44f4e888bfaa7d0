use crate::config::CoordinatorConfig;
use crate::coordinator::{
    CancelExecutionRequest, CoordinatorRequest, ReadLogs, ReadResult, ResultRows,
    SubmitExecution, SubmitExecutionRequest,
};
use crate::request::Request;
use anyhow::Result;
use catalog::Catalog;
use executor::{EventBus, EventKind, LifecycleEvent, WorkerContext};
use model::execution::execution_status::ExecutionStatus;
use model::execution::{self, CreateExecution, ExecutionId};
use object_store::ObjectStore;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use store::{Reader, ReaderOptions};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

macro_rules! dispatch {
    ($self:ident, $req:expr, $field:ident . $method:ident $(, |$p:ident| $arg:expr)?) => {{
        debug!("Received: {:?}", $req);
        let Request { payload, reply_to } = $req;
        $(let $p = payload; let payload = $arg;)?
        let _ = reply_to.send(
            $self
                .catalog
                .$field
                .$method(payload)
                .await
                .map_err(Into::into),
        );
    }};
}

#[derive(Error, Debug)]
#[error("Execution {id} terminated with status {status}")]
pub struct EarlyTermination {
    pub id: ExecutionId,
    pub status: ExecutionStatus,
    pub model: execution::Model,
}

pub(super) struct RequestHandler {
    receiver: flume::Receiver<CoordinatorRequest>,
    catalog: Catalog,
    store: Arc<dyn ObjectStore>,
    events: EventBus,
    cancel_tx: flume::Sender<ExecutionId>,
    reader_options: ReaderOptions,
    read_row_limit: usize,
    pending_submits: HashMap<ExecutionId, SubmitExecutionRequest>,
    pending_cancels: HashMap<ExecutionId, Vec<CancelExecutionRequest>>,
}

impl RequestHandler {
    pub(super) fn new(
        receiver: flume::Receiver<CoordinatorRequest>,
        ctx: WorkerContext,
        cancel_tx: flume::Sender<ExecutionId>,
        config: &CoordinatorConfig,
    ) -> RequestHandler {
        Self {
            receiver,
            catalog: ctx.catalog,
            store: ctx.store,
            events: ctx.events,
            cancel_tx,
            reader_options: config.reader_options(),
            read_row_limit: config.store.read_row_limit,
            pending_submits: HashMap::new(),
            pending_cancels: HashMap::new(),
        }
    }

    #[instrument(skip(self, state_rx))]
    pub(super) async fn run(mut self, mut state_rx: mpsc::UnboundedReceiver<execution::Model>) {
        loop {
            tokio::select! {
                recv_result = self.receiver.recv_async() => match recv_result {
                    Ok(req) => self.handle_recv(req).await,
                    Err(_) => {
                        info!("All clients have been dropped");
                        return;
                    }
                },
                Some(model) = state_rx.recv() => self.resolve_pending(model),
            }
        }
    }

    fn resolve_pending(&mut self, model: execution::Model) {
        if !model.status.is_terminal() {
            return;
        }

        if let Some(cancels) = self.pending_cancels.remove(&model.id) {
            for req in cancels {
                req.respond(Ok(model.clone()));
            }
        }

        if let Some(req) = self.pending_submits.remove(&model.id) {
            if model.status == ExecutionStatus::Done {
                req.respond(Ok(model));
            } else {
                req.respond(Err(EarlyTermination {
                    id: model.id,
                    status: model.status,
                    model,
                }
                .into()));
            }
        }
    }

    async fn submit(&mut self, req: SubmitExecutionRequest) {
        debug!("Received: {:?}", req);
        let SubmitExecution {
            query,
            engine_id,
            uid,
            wait,
        } = req.payload.clone();
        let created = self
            .catalog
            .execution
            .create_execution(CreateExecution::new(query, engine_id, uid))
            .await;
        let model = match created {
            Ok(model) => model,
            Err(e) => return req.respond(Err(e.into())),
        };

        self.events.publish(LifecycleEvent::new(
            EventKind::QueryReceived,
            model.id,
            json!({ "engine_id": engine_id, "uid": uid }),
        ));

        if wait {
            let prev = self.pending_submits.insert(model.id, req);
            assert!(prev.is_none(), "Execution id {} should be unique", model.id);
        } else {
            req.respond(Ok(model));
        }
    }

    async fn cancel(&mut self, req: CancelExecutionRequest) {
        debug!("Received: {:?}", req);
        let id = req.payload.id;
        let current = match self.catalog.execution.get_execution(id).await {
            Ok(model) => model,
            Err(e) => return req.respond(Err(e.into())),
        };
        if current.status.is_terminal() {
            return req.respond(Ok(current));
        }

        if self.cancel_tx.send_async(id).await.is_err() {
            warn!("Execution service is gone, cannot cancel {id}");
            return req.respond(Err(anyhow::anyhow!("Execution service is not running")));
        }
        self.pending_cancels.entry(id).or_default().push(req);
    }

    async fn read_result(&self, req: ReadResult) -> Result<ResultRows> {
        let statement = self.catalog.execution.get_statement(req.statement_id).await?;
        let Some(key) = statement.result_key else {
            return Ok(ResultRows::default());
        };
        let limit = req
            .max_rows
            .map_or(self.read_row_limit, |max| max.min(self.read_row_limit));

        let mut reader = Reader::open(self.store.clone(), &key, self.reader_options).await?;
        // Header plus up to `limit` data rows
        let mut records = reader.read_csv(Some(limit + 1)).await?;
        if records.is_empty() {
            return Ok(ResultRows::default());
        }
        let columns = records.remove(0);
        let truncated =
            reader.is_truncated() || statement.result_row_count > records.len() as i64;
        Ok(ResultRows {
            columns,
            rows: records,
            truncated,
        })
    }

    async fn read_logs(&self, req: ReadLogs) -> Result<String> {
        let statement = self.catalog.execution.get_statement(req.statement_id).await?;
        if let Some(key) = statement.log_key {
            let mut reader = Reader::open(self.store.clone(), &key, self.reader_options).await?;
            let mut log = String::new();
            while let Some(line) = reader.read_line().await? {
                log.push_str(&line);
                log.push('\n');
            }
            return Ok(log);
        }

        let chunks = self
            .catalog
            .execution
            .get_log_chunks(req.statement_id)
            .await?;
        Ok(chunks.into_iter().map(|chunk| chunk.log).collect())
    }

    #[instrument(skip(self))]
    async fn handle_recv(&mut self, req: CoordinatorRequest) {
        match req {
            CoordinatorRequest::SubmitExecution(r) => self.submit(r).await,
            CoordinatorRequest::CancelExecution(r) => self.cancel(r).await,
            CoordinatorRequest::GetExecution(r) => {
                dispatch!(self, r, execution.get_executions)
            }
            CoordinatorRequest::GetStatements(r) => {
                dispatch!(self, r, execution.get_statements, |p| p.execution_id)
            }
            CoordinatorRequest::GetExecutionError(r) => {
                dispatch!(self, r, execution.get_error, |p| p.execution_id)
            }
            CoordinatorRequest::ReadResult(r) => {
                debug!("Received: {:?}", r);
                let result = self.read_result(r.payload.clone()).await;
                r.respond(result);
            }
            CoordinatorRequest::ReadLogs(r) => {
                debug!("Received: {:?}", r);
                let result = self.read_logs(r.payload.clone()).await;
                r.respond(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::GetStatements;
    use executor::testing::{ScriptedConnector, TestHarness};
    use model::execution::CancelExecution;
    use model::execution::execution_error::{CreateExecutionError, ErrorKind};
    use model::execution::statement::{CreateStatement, FinishStatement, StatementRange, StatementStatus};
    use object_store::PutPayload;
    use object_store::path::Path;

    struct TestHandle {
        sender: flume::Sender<CoordinatorRequest>,
        cancel_rx: flume::Receiver<ExecutionId>,
        harness_ctx: WorkerContext,
        engine_id: i64,
        uid: i64,
    }

    impl TestHandle {
        async fn new(config: CoordinatorConfig) -> Self {
            let harness = TestHarness::new(ScriptedConnector::new()).await;
            let TestHarness {
                ctx,
                receivers,
                user,
                default_engine,
                ..
            } = harness;
            let (sender, receiver) = flume::bounded(16);
            let (cancel_tx, cancel_rx) = flume::unbounded();
            let handler = RequestHandler::new(receiver, ctx.clone(), cancel_tx, &config);
            tokio::spawn(handler.run(receivers.execution));
            Self {
                sender,
                cancel_rx,
                harness_ctx: ctx,
                engine_id: default_engine.id,
                uid: user.id,
            }
        }

        async fn send<P, R>(&self, payload: P) -> tokio::sync::oneshot::Receiver<R>
        where
            P: std::fmt::Debug,
            Request<P, R>: Into<CoordinatorRequest>,
        {
            let (rx, request) = Request::new(payload);
            self.sender
                .send_async(request.into())
                .await
                .expect("Handler should be running");
            rx
        }

        fn catalog(&self) -> &Catalog {
            &self.harness_ctx.catalog
        }
    }

    #[tokio::test]
    async fn submit_without_wait_returns_initialized() {
        let handle = TestHandle::new(CoordinatorConfig::default()).await;
        let mut events = handle.harness_ctx.events.subscribe();

        let rx = handle
            .send(SubmitExecution::new("SELECT 1", handle.engine_id, handle.uid))
            .await;
        let model = rx.await.unwrap().unwrap();
        assert_eq!(model.status, ExecutionStatus::Initialized);
        assert_eq!(model.query, "SELECT 1");

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::QueryReceived);
        assert_eq!(event.execution_id, model.id);
    }

    #[tokio::test]
    async fn waiting_submit_resolves_on_done() {
        let handle = TestHandle::new(CoordinatorConfig::default()).await;
        let mut rx = handle
            .send(
                SubmitExecution::new("SELECT 1", handle.engine_id, handle.uid)
                    .wait_for_completion(),
            )
            .await;

        let id = loop {
            let executions = handle
                .catalog()
                .execution
                .get_initialized()
                .await
                .unwrap();
            if let Some(model) = executions.first() {
                break model.id;
            }
            tokio::task::yield_now().await;
        };
        let execution = &handle.catalog().execution;
        execution.deliver(id, "task").await.unwrap();
        execution
            .update_status(id, ExecutionStatus::Running)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err(), "Should not have resolved yet");

        execution
            .update_status(id, ExecutionStatus::Done)
            .await
            .unwrap();
        let model = rx.await.unwrap().unwrap();
        assert_eq!(model.status, ExecutionStatus::Done);
    }

    #[tokio::test]
    async fn waiting_submit_reports_early_termination() {
        let handle = TestHandle::new(CoordinatorConfig::default()).await;
        let rx = handle
            .send(
                SubmitExecution::new("SELECT 1", handle.engine_id, handle.uid)
                    .wait_for_completion(),
            )
            .await;

        let id = loop {
            let executions = handle
                .catalog()
                .execution
                .get_initialized()
                .await
                .unwrap();
            if let Some(model) = executions.first() {
                break model.id;
            }
            tokio::task::yield_now().await;
        };
        handle
            .catalog()
            .execution
            .finish_with_error(CreateExecutionError {
                execution_id: id,
                kind: ErrorKind::Validation,
                message: "denied".to_string(),
                extracted_message: None,
                position: None,
            })
            .await
            .unwrap();

        let err = rx.await.unwrap().unwrap_err();
        let early = err.downcast_ref::<EarlyTermination>().unwrap();
        assert_eq!(early.status, ExecutionStatus::Error);
    }

    #[tokio::test]
    async fn cancel_forwards_to_service_and_waits() {
        let handle = TestHandle::new(CoordinatorConfig::default()).await;
        let model = handle
            .send(SubmitExecution::new("SELECT 1", handle.engine_id, handle.uid))
            .await
            .await
            .unwrap()
            .unwrap();

        let mut rx = handle.send(CancelExecution { id: model.id }).await;
        assert_eq!(handle.cancel_rx.recv_async().await.unwrap(), model.id);
        assert!(rx.try_recv().is_err(), "Should wait for the cancellation");

        handle
            .catalog()
            .execution
            .cancel_initialized(model.id)
            .await
            .unwrap();
        let cancelled = rx.await.unwrap().unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancel);
    }

    #[tokio::test]
    async fn cancel_of_terminal_execution_answers_immediately() {
        let handle = TestHandle::new(CoordinatorConfig::default()).await;
        let model = handle
            .send(SubmitExecution::new("SELECT 1", handle.engine_id, handle.uid))
            .await
            .await
            .unwrap()
            .unwrap();
        handle
            .catalog()
            .execution
            .cancel_initialized(model.id)
            .await
            .unwrap();

        let result = handle
            .send(CancelExecution { id: model.id })
            .await
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Cancel);
        assert!(handle.cancel_rx.is_empty());

        let missing = handle.send(CancelExecution { id: 999 }).await.await.unwrap();
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn reads_capped_results_and_logs() {
        let mut config = CoordinatorConfig::default();
        config.store.read_row_limit = 2;
        let handle = TestHandle::new(config).await;
        let model = handle
            .send(SubmitExecution::new("SELECT n", handle.engine_id, handle.uid))
            .await
            .await
            .unwrap()
            .unwrap();

        let execution = &handle.catalog().execution;
        let statement = execution
            .create_statement(CreateStatement {
                execution_id: model.id,
                range: StatementRange::new(0, 8),
            })
            .await
            .unwrap();
        execution
            .append_log_chunks(statement.id, "line one\nline two\n")
            .await
            .unwrap();
        let live = handle
            .send(ReadLogs {
                statement_id: statement.id,
            })
            .await
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live, "line one\nline two\n");

        handle
            .harness_ctx
            .store
            .put(&Path::from("results/n.csv"), PutPayload::from("n\n1\n2\n3\n"))
            .await
            .unwrap();
        execution
            .finish_statement(
                statement.id,
                FinishStatement {
                    status: StatementStatus::Done,
                    result_key: Some("results/n.csv".to_string()),
                    log_key: None,
                    result_row_count: 3,
                    has_log: true,
                },
            )
            .await
            .unwrap();

        let rows = handle
            .send(ReadResult {
                statement_id: statement.id,
                max_rows: None,
            })
            .await
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rows.columns, vec!["n"]);
        assert_eq!(rows.rows, vec![vec!["1"], vec!["2"]]);
        assert!(rows.truncated);

        let one = handle
            .send(ReadResult {
                statement_id: statement.id,
                max_rows: Some(1),
            })
            .await
            .await
            .unwrap()
            .unwrap();
        assert_eq!(one.rows, vec![vec!["1"]]);

        let statements = handle
            .send(GetStatements {
                execution_id: model.id,
            })
            .await
            .await
            .unwrap()
            .unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].result_row_count, 3);
    }
}

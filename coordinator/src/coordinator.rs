use crate::config::CoordinatorConfig;
use crate::execution_service::ExecutionService;
use crate::into_request;
use crate::request::Request;
use crate::request_handler::RequestHandler;
use anyhow::{Context, Result};
use catalog::database::State;
use catalog::{Catalog, StateReceivers};
use executor::{ExecutorRegistry, WorkerContext};
use model::engine::EngineId;
use model::execution::execution_error;
use model::execution::statement::{self, StatementId};
use model::execution::{self, CancelExecution, ExecutionId, GetExecution};
use model::user::UserId;
use std::sync::Arc;
use store::build_object_store;
use tracing::{Instrument, error, info, info_span};

/// Submit a query for execution.
///
/// With `wait` set the response is held back until the execution is terminal.
#[derive(Clone, Debug)]
pub struct SubmitExecution {
    pub query: String,
    pub engine_id: EngineId,
    pub uid: UserId,
    pub wait: bool,
}

impl SubmitExecution {
    pub fn new(query: impl Into<String>, engine_id: EngineId, uid: UserId) -> Self {
        Self {
            query: query.into(),
            engine_id,
            uid,
            wait: false,
        }
    }

    pub fn wait_for_completion(mut self) -> Self {
        self.wait = true;
        self
    }
}

#[derive(Clone, Debug)]
pub struct GetStatements {
    pub execution_id: ExecutionId,
}

#[derive(Clone, Debug)]
pub struct GetExecutionError {
    pub execution_id: ExecutionId,
}

/// Read the stored result of a statement, at most `max_rows` data rows.
#[derive(Clone, Debug)]
pub struct ReadResult {
    pub statement_id: StatementId,
    pub max_rows: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct ReadLogs {
    pub statement_id: StatementId,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResultRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// More rows exist than were returned.
    pub truncated: bool,
}

pub type SubmitExecutionRequest = Request<SubmitExecution, Result<execution::Model>>;
pub type CancelExecutionRequest = Request<CancelExecution, Result<execution::Model>>;
pub type GetExecutionRequest = Request<GetExecution, Result<Vec<execution::Model>>>;
pub type GetStatementsRequest = Request<GetStatements, Result<Vec<statement::Model>>>;
pub type GetExecutionErrorRequest =
    Request<GetExecutionError, Result<Option<execution_error::Model>>>;
pub type ReadResultRequest = Request<ReadResult, Result<ResultRows>>;
pub type ReadLogsRequest = Request<ReadLogs, Result<String>>;

#[derive(Debug)]
pub enum CoordinatorRequest {
    SubmitExecution(SubmitExecutionRequest),
    CancelExecution(CancelExecutionRequest),
    GetExecution(GetExecutionRequest),
    GetStatements(GetStatementsRequest),
    GetExecutionError(GetExecutionErrorRequest),
    ReadResult(ReadResultRequest),
    ReadLogs(ReadLogsRequest),
}

into_request!(SubmitExecution, SubmitExecutionRequest, CoordinatorRequest);
into_request!(CancelExecution, CancelExecutionRequest, CoordinatorRequest);
into_request!(GetExecution, GetExecutionRequest, CoordinatorRequest);
into_request!(GetStatements, GetStatementsRequest, CoordinatorRequest);
into_request!(
    GetExecutionError,
    GetExecutionErrorRequest,
    CoordinatorRequest
);
into_request!(ReadResult, ReadResultRequest, CoordinatorRequest);
into_request!(ReadLogs, ReadLogsRequest, CoordinatorRequest);

async fn build_context(config: &CoordinatorConfig) -> Result<(WorkerContext, StateReceivers)> {
    let store = build_object_store(&config.store.url).context("Failed to open blob store")?;
    let state = State::with(config.state_backend()?)
        .await
        .context("Failed to connect to the catalog database")?;
    state
        .migrate()
        .await
        .context("Failed to migrate the catalog database")?;
    let (catalog, receivers) = Catalog::from(state);

    let ctx = WorkerContext::new(catalog, store, Arc::new(ExecutorRegistry::with_defaults()))
        .with_settings(config.executor_settings());
    Ok((ctx, receivers))
}

/// Run the coordinator on a dedicated runtime thread.
///
/// Returns once the catalog and blob store are reachable, or with the error
/// that prevented startup.
pub fn start(config: CoordinatorConfig) -> Result<flume::Sender<CoordinatorRequest>> {
    info!("Starting");
    let (handle, receiver) = flume::bounded(config.request_channel_capacity);
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_multi_thread()
            .enable_time()
            .enable_io()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                let err = anyhow::Error::new(e).context("Failed to create runtime");
                let _ = ready_tx.send(Err(err));
                return;
            }
        };

        rt.block_on(async move {
            let (ctx, receivers) = match build_context(&config).await {
                Ok(built) => built,
                Err(e) => {
                    error!("Startup failed: {e:#}");
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            run(ctx, receivers, receiver, &config).await;
        });

        rt.shutdown_background();
    });

    ready_rx
        .recv()
        .context("Coordinator thread exited during startup")??;
    Ok(handle)
}

/// Run the coordinator on the current runtime against an existing context.
pub fn start_with(
    ctx: WorkerContext,
    receivers: StateReceivers,
    config: &CoordinatorConfig,
) -> flume::Sender<CoordinatorRequest> {
    info!("Starting");
    let (handle, receiver) = flume::bounded(config.request_channel_capacity);
    let config = config.clone();
    tokio::spawn(async move { run(ctx, receivers, receiver, &config).await });
    handle
}

async fn run(
    ctx: WorkerContext,
    receivers: StateReceivers,
    receiver: flume::Receiver<CoordinatorRequest>,
    config: &CoordinatorConfig,
) {
    let (cancel_tx, cancel_rx) = flume::unbounded();

    let service = ExecutionService::new(ctx.clone(), cancel_rx, config.reconcile_interval());
    tokio::spawn(async move {
        service
            .run()
            .instrument(info_span!("execution_service"))
            .await
    });

    RequestHandler::new(receiver, ctx, cancel_tx, config)
        .run(receivers.execution)
        .instrument(info_span!("request_listener"))
        .await
}

use executor::{
    EventKind, ExecutorError, FactoryError, LifecycleEvent, QueryExecutor, WorkerContext,
    create_executor_from_execution,
};
use model::execution::execution_error::{CreateExecutionError, ErrorKind};
use model::execution::{ExecutionId, ExecutionType};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Drive one execution from `Initialized` to a terminal status.
///
/// A message on `cancel_rx` cancels the execution at the next step. The
/// configured timeout is measured from the moment the worker picks it up.
pub async fn run_execution(
    ctx: WorkerContext,
    id: ExecutionId,
    cancel_rx: flume::Receiver<()>,
) {
    let task_handle = uuid::Uuid::new_v4().to_string();
    let created =
        create_executor_from_execution(&ctx, id, task_handle, ExecutionType::Adhoc).await;
    let mut executor = match created {
        Ok(executor) => executor,
        Err(FactoryError::InvalidExecution { reason, .. }) => {
            debug!("Skipping execution {id}: {reason}");
            return;
        }
        Err(e) => return reject(&ctx, id, e).await,
    };

    let deadline = ctx.settings.timeout.map(|timeout| Instant::now() + timeout);
    if let Err(e) = drive(&mut executor, &cancel_rx, deadline).await {
        error!("Execution {id} failed outside the engine: {e}");
        record_internal_failure(&ctx, id, &e).await;
    }
}

async fn drive(
    executor: &mut QueryExecutor,
    cancel_rx: &flume::Receiver<()>,
    deadline: Option<Instant>,
) -> Result<(), ExecutorError> {
    loop {
        if cancel_rx.try_recv().is_ok() {
            return executor.cancel().await;
        }
        let status = executor.poll().await?;
        if status.is_terminal() {
            info!("Execution finished with status {status}");
            return Ok(());
        }

        let timed_out = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            Ok(()) = cancel_rx.recv_async() => return executor.cancel().await,
            _ = timed_out => return executor.fail_with_timeout().await,
            _ = executor.sleep() => {}
        }
    }
}

/// Persist a pre-flight rejection as the execution's error.
async fn reject(ctx: &WorkerContext, id: ExecutionId, err: FactoryError) {
    info!("Rejected execution {id}: {err}");
    let kind = err.kind();
    let message = err.to_string();
    let finished = ctx
        .catalog
        .execution
        .finish_with_error(CreateExecutionError {
            execution_id: id,
            kind,
            message: message.clone(),
            extracted_message: None,
            position: None,
        })
        .await;
    match finished {
        Ok(_) => ctx.events.publish(LifecycleEvent::new(
            EventKind::QueryException,
            id,
            json!({ "kind": kind.to_string(), "message": message }),
        )),
        Err(e) => warn!("Failed to record rejection of execution {id}: {e}"),
    }
}

async fn record_internal_failure(ctx: &WorkerContext, id: ExecutionId, err: &ExecutorError) {
    let finished = ctx
        .catalog
        .execution
        .finish_with_error(CreateExecutionError {
            execution_id: id,
            kind: ErrorKind::Internal,
            message: err.to_string(),
            extracted_message: None,
            position: None,
        })
        .await;
    if let Err(e) = finished {
        warn!("Failed to record failure of execution {id}: {e}");
    }
}

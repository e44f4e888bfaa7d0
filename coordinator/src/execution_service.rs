use crate::worker::run_execution;
use catalog::NotifiableCatalog;
use executor::WorkerContext;
use model::execution::ExecutionId;
use model::execution::execution_status::ExecutionStatus;
use model::execution::statement::{StatementStatus, UpdateStatement};
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Hands every `Initialized` execution to a worker task and routes cancellations.
pub struct ExecutionService {
    ctx: WorkerContext,
    cancel_rx: flume::Receiver<ExecutionId>,
    reconcile_interval: Duration,
    tasks: HashMap<ExecutionId, (flume::Sender<()>, JoinHandle<()>)>,
}

impl ExecutionService {
    pub fn new(
        ctx: WorkerContext,
        cancel_rx: flume::Receiver<ExecutionId>,
        reconcile_interval: Duration,
    ) -> Self {
        ExecutionService {
            ctx,
            cancel_rx,
            reconcile_interval,
            tasks: HashMap::default(),
        }
    }

    pub async fn run(mut self) {
        let mut submitted = self.ctx.catalog.execution.subscribe_intent();
        info!("Starting");
        self.reconcile().await;

        loop {
            tokio::select! {
                changed = tokio::time::timeout(self.reconcile_interval, submitted.changed()) => {
                    if let Ok(Err(_)) = changed {
                        info!("Execution catalog is gone, stopping");
                        return;
                    }
                    self.reconcile().await;
                }
                cancel = self.cancel_rx.recv_async() => match cancel {
                    Ok(id) => self.cancel(id).await,
                    Err(_) => {
                        info!("Request handler is gone, stopping");
                        return;
                    }
                },
            }
        }
    }

    async fn reconcile(&mut self) {
        let pending = match self.ctx.catalog.execution.get_initialized().await {
            Ok(pending) => pending,
            Err(e) => {
                error!("Failed to fetch submitted executions: {e}");
                return;
            }
        };

        self.tasks.retain(|_, (_, handle)| !handle.is_finished());

        for execution in pending {
            if self.tasks.contains_key(&execution.id) {
                debug!("Execution {} already has a worker", execution.id);
                continue;
            }
            self.spawn_worker(execution.id);
        }
    }

    fn spawn_worker(&mut self, id: ExecutionId) {
        let (cancel_tx, cancel_rx) = flume::bounded(1);
        let handle = tokio::spawn(
            run_execution(self.ctx.clone(), id, cancel_rx).instrument(info_span!("execution", id)),
        );
        self.tasks.insert(id, (cancel_tx, handle));
    }

    async fn cancel(&mut self, id: ExecutionId) {
        let live_worker = self
            .tasks
            .get(&id)
            .filter(|(_, handle)| !handle.is_finished());
        if let Some((cancel_tx, _)) = live_worker {
            // A full channel means a cancellation is already on its way
            let _ = cancel_tx.try_send(());
            debug!("Forwarded cancellation of execution {id} to its worker");
            return;
        }

        let execution = &self.ctx.catalog.execution;
        match execution.cancel_initialized(id).await {
            Ok(Some(_)) => info!("Revoked execution {id} before it started"),
            Ok(None) => {
                // Left over from an earlier process without a live worker
                warn!("Execution {id} has no worker, marking it cancelled");
                self.cancel_orphan(id).await;
            }
            Err(e) => error!("Failed to cancel execution {id}: {e}"),
        }
    }

    /// Close the open statements first, the status change answers the caller.
    async fn cancel_orphan(&self, id: ExecutionId) {
        let execution = &self.ctx.catalog.execution;
        match execution.get_statements(id).await {
            Ok(statements) => {
                for statement in statements.iter().filter(|s| !s.status.is_terminal()) {
                    let cancel = UpdateStatement {
                        status: Some(StatementStatus::Cancel),
                        ..Default::default()
                    };
                    if let Err(e) = execution.update_statement(statement.id, cancel).await {
                        warn!("Failed to cancel statement {}: {e}", statement.id);
                    }
                }
            }
            Err(e) => warn!("Failed to load statements of execution {id}: {e}"),
        }
        if let Err(e) = execution.update_status(id, ExecutionStatus::Cancel).await {
            warn!("Failed to cancel execution {id}: {e}");
        }
    }
}

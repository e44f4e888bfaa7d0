//! Lifecycle events of executions, fanned out to any number of subscribers.

use model::execution::ExecutionId;
use model::execution::statement::StatementId;
use serde::Serialize;
use serde_json::Value;
use strum::Display;
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    QueryReceived,
    QueryStart,
    StatementStart,
    StatementUpdate,
    StatementEnd,
    QueryEnd,
    QueryCancel,
    QueryException,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub execution_id: ExecutionId,
    pub statement_id: Option<StatementId>,
    /// Fields relevant to the event. For `statement_update` exactly the changed ones.
    pub payload: Value,
}

impl LifecycleEvent {
    pub fn new(kind: EventKind, execution_id: ExecutionId, payload: Value) -> Self {
        Self {
            kind,
            execution_id,
            statement_id: None,
            payload,
        }
    }

    pub fn for_statement(mut self, statement_id: StatementId) -> Self {
        self.statement_id = Some(statement_id);
        self
    }
}

#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: LifecycleEvent) {
        trace!("{} for execution {}", event.kind, event.execution_id);
        // Having no subscriber is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

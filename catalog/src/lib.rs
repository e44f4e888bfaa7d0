pub mod database;
pub mod engine_catalog;
pub mod error;
pub mod execution_catalog;
pub mod notification;

#[cfg(any(test, feature = "testing"))]
pub mod test_utils;

pub use error::CatalogError;
pub use notification::NotifiableCatalog;

use database::State;
use engine_catalog::EngineCatalog;
use execution_catalog::ExecutionCatalog;
use model::execution;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receivers for entity state change notifications (catalog → request listener).
///
/// Each receiver delivers every state change as a discrete event via mpsc,
/// ensuring no notifications are lost.
pub struct StateReceivers {
    pub execution: mpsc::UnboundedReceiver<execution::Model>,
}

/// Facade providing access to all catalog types.
///
/// Both catalogs share the same underlying database connection.
#[derive(Clone)]
pub struct Catalog {
    pub engine: Arc<EngineCatalog>,
    pub execution: Arc<ExecutionCatalog>,
}

impl Catalog {
    pub fn from(db: State) -> (Self, StateReceivers) {
        let (execution_state_tx, execution_state_rx) = mpsc::unbounded_channel();

        let catalog = Self {
            engine: EngineCatalog::from(db.clone()),
            execution: ExecutionCatalog::new(db, execution_state_tx),
        };

        let receivers = StateReceivers {
            execution: execution_state_rx,
        };

        (catalog, receivers)
    }

    #[cfg(any(test, feature = "testing"))]
    pub async fn for_test() -> (Self, StateReceivers) {
        Self::from(State::for_test().await)
    }
}

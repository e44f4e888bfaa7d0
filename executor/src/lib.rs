//! Execution of multi-statement queries against heterogeneous SQL engines.
//!
//! [`create_executor_from_execution`] validates a submitted execution and builds a
//! [`QueryExecutor`]. The owning task then alternates [`QueryExecutor::poll`] and
//! [`QueryExecutor::sleep`] until the execution is terminal. Engines are reached
//! through a [`Cursor`], which wraps an [`EngineDriver`] and interprets its errors
//! with the [`Dialect`] of the engine's language.

pub mod adapters;
pub mod context;
pub mod cursor;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod events;
pub mod factory;
pub mod logger;
pub mod progress;
pub mod query_executor;
pub mod registry;
pub mod splitter;
pub mod table_extractor;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use context::{ExecutorSettings, WorkerContext};
pub use cursor::{Cursor, DriverCursor, ParsedError, PollResult};
pub use dialect::Dialect;
pub use driver::{DriverConnector, DriverError, DriverErrorKind, EngineDriver};
pub use error::{ExecutorError, FactoryError};
pub use events::{EventBus, EventKind, LifecycleEvent};
pub use factory::create_executor_from_execution;
pub use query_executor::QueryExecutor;
pub use registry::{ExecutorRegistry, ExecutorSpec, LanguageMatch};

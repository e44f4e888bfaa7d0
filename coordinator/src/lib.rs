//! Request surface and task driver for query executions.
//!
//! Clients talk to the coordinator through the sender returned by
//! [`coordinator::start`]. Submitted executions are picked up by the
//! [`execution_service::ExecutionService`], which runs one worker task per
//! execution until it reaches a terminal status.

pub mod config;
pub mod coordinator;
pub mod execution_service;
pub mod request;
mod request_handler;
pub mod worker;

pub use config::CoordinatorConfig;
pub use coordinator::{CoordinatorRequest, start, start_with};
pub use request_handler::EarlyTermination;

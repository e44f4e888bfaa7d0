//! Concrete engine drivers shipped with the crate.

mod sqlx_driver;

pub use sqlx_driver::SqlxConnector;

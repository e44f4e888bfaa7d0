//! Bounded, sequential access to result and log blobs.
//!
//! A [`Reader`] streams an object in ranged chunks and reassembles lines and CSV
//! records across chunk boundaries. An [`Uploader`] writes an object as a
//! multipart upload, flushing one part whenever its buffer outgrows the minimum
//! part size.

pub mod csv_rows;
pub mod error;
pub mod factory;
pub mod keys;
pub mod reader;
pub mod uploader;

pub use error::StoreError;
pub use factory::build_object_store;
pub use reader::{CsvRecords, Reader, ReaderOptions};
pub use uploader::{Uploader, UploaderOptions};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object '{0}' not found")]
    NotFound(String),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid store configuration: {0}")]
    Config(String),
}

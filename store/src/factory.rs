use crate::error::StoreError;
use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Build the blob backend for `url`.
///
/// `memory://` keeps blobs in process; `file:///abs/dir` stores them below a local directory.
pub fn build_object_store(url: &str) -> Result<Arc<dyn ObjectStore>, StoreError> {
    if url == "memory://" || url == "memory:" {
        info!("Using in-memory blob store");
        return Ok(Arc::new(InMemory::new()));
    }

    let Some(dir) = url.strip_prefix("file://") else {
        return Err(StoreError::Config(format!(
            "Blob store url '{url}' currently not supported"
        )));
    };
    if dir.is_empty() {
        return Err(StoreError::Config(
            "Local blob store requires a directory".to_string(),
        ));
    }

    let path = PathBuf::from(dir);
    if !path.exists() {
        std::fs::create_dir_all(&path).map_err(|e| {
            StoreError::Config(format!(
                "Failed to create blob directory '{}': {e}",
                path.display()
            ))
        })?;
    }
    let absolute = path.canonicalize().map_err(|e| {
        StoreError::Config(format!(
            "Failed to resolve blob directory '{}': {e}",
            path.display()
        ))
    })?;

    info!("Using local blob store at {}", absolute.display());
    Ok(Arc::new(LocalFileSystem::new_with_prefix(absolute)?))
}

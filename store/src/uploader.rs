use crate::error::StoreError;
use object_store::path::Path;
use object_store::{MultipartUpload, ObjectStore, PutPayload};
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_MIN_PART_SIZE: usize = 5 * 1024 * 1024;
const DEFAULT_MAX_PARTS: usize = 10_000;

#[derive(Clone, Copy, Debug)]
pub struct UploaderOptions {
    /// A part is flushed once the buffer grows beyond this many bytes.
    pub min_part_size: usize,
    /// Writes are refused after this many parts were flushed.
    pub max_parts: usize,
}

impl Default for UploaderOptions {
    fn default() -> Self {
        Self {
            min_part_size: DEFAULT_MIN_PART_SIZE,
            max_parts: DEFAULT_MAX_PARTS,
        }
    }
}

impl UploaderOptions {
    pub fn with_min_part_size(mut self, min_part_size: usize) -> Self {
        self.min_part_size = min_part_size;
        self
    }

    pub fn with_max_parts(mut self, max_parts: usize) -> Self {
        self.max_parts = max_parts.max(1);
        self
    }
}

/// Multipart writer for one object.
///
/// Dropping an uploader without calling [`Uploader::complete`] aborts the upload.
pub struct Uploader {
    location: Path,
    upload: Option<Box<dyn MultipartUpload>>,
    buffer: Vec<u8>,
    parts: usize,
    options: UploaderOptions,
}

impl Uploader {
    pub async fn open(
        store: Arc<dyn ObjectStore>,
        key: &str,
        options: UploaderOptions,
    ) -> Result<Self, StoreError> {
        let location = Path::from(key);
        let upload = store.put_multipart(&location).await?;
        Ok(Self {
            location,
            upload: Some(upload),
            buffer: Vec::new(),
            parts: 0,
            options,
        })
    }

    pub fn parts(&self) -> usize {
        self.parts
    }

    pub fn is_capped(&self) -> bool {
        self.parts >= self.options.max_parts
    }

    async fn flush_part(&mut self) -> Result<(), StoreError> {
        let Some(upload) = self.upload.as_mut() else {
            return Ok(());
        };
        let payload = PutPayload::from(std::mem::take(&mut self.buffer));
        upload.put_part(payload).await?;
        self.parts += 1;
        debug!("Flushed part {} of {}", self.parts, self.location);
        Ok(())
    }

    /// Buffer `data`, flushing one part when the buffer exceeds the minimum part size.
    ///
    /// Returns `false` once the part limit was reached. A refused write stores nothing
    /// and the caller must stop writing.
    pub async fn write(&mut self, data: &[u8]) -> Result<bool, StoreError> {
        if self.is_capped() {
            return Ok(false);
        }
        if data.is_empty() {
            return Ok(true);
        }

        self.buffer.extend_from_slice(data);
        if self.buffer.len() > self.options.min_part_size {
            self.flush_part().await?;
        }
        Ok(true)
    }

    /// Flush the remaining buffer as the final part and finalize the object.
    pub async fn complete(mut self) -> Result<(), StoreError> {
        // A multipart upload needs at least one part, even for an empty object
        if !self.buffer.is_empty() || self.parts == 0 {
            self.flush_part().await?;
        }
        if let Some(mut upload) = self.upload.take() {
            upload.complete().await?;
        }
        debug!("Completed {} with {} parts", self.location, self.parts);
        Ok(())
    }
}

impl Drop for Uploader {
    fn drop(&mut self) {
        let Some(mut upload) = self.upload.take() else {
            return;
        };
        let location = self.location.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = upload.abort().await {
                        warn!("Failed to abort upload of {location}: {e}");
                    }
                });
            }
            Err(_) => warn!("Dropped upload of {location} outside a runtime"),
        }
    }
}

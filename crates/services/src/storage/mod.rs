//! Pluggable blob storage.
//!
//! Thumbnails and other artifacts are addressed by UTF-8 POSIX-style
//! relative paths; each backend prepends its own base. I/O failures surface
//! as `StorageError` and are never retried here.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

mod cloud;
mod local;

pub use cloud::CloudStorage;
pub use local::LocalStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Cloud(#[from] object_store::Error),
    #[error("Storage configuration error: {0}")]
    Config(String),
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Save bytes at `path`, creating parents as needed. Returns the stored
    /// path.
    async fn save(&self, data: &[u8], path: &str) -> Result<String, StorageError>;

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Delete is idempotent: removing a missing file succeeds and returns
    /// `false`.
    async fn delete(&self, path: &str) -> Result<bool, StorageError>;

    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Public URL for the file: `/storage/<path>` for local backends (served
    /// elsewhere), the canonical object URL for buckets. Never contains
    /// credentials.
    fn public_url(&self, path: &str) -> String;
}

/// Content type by extension, used by cloud backends on upload.
pub(crate) fn content_type_for_path(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "webp" => "image/webp",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

/// Build the backend selected by `STORAGE_TYPE` (`local`, `gcs` or `s3`).
pub fn storage_from_env() -> Result<Arc<dyn StorageBackend>, StorageError> {
    let storage_type = std::env::var("STORAGE_TYPE")
        .unwrap_or_else(|_| "local".into())
        .to_lowercase();

    match storage_type.as_str() {
        "local" => {
            let base = std::env::var("STORAGE_PATH").unwrap_or_else(|_| "./storage".into());
            tracing::info!("Using local storage backend at {}", base);
            Ok(Arc::new(LocalStorage::new(base)?))
        }
        "gcs" => {
            let bucket = std::env::var("GCS_BUCKET_NAME")
                .map_err(|_| StorageError::Config("GCS_BUCKET_NAME is required".into()))?;
            tracing::info!("Using GCS storage backend (bucket: {})", bucket);
            Ok(Arc::new(CloudStorage::gcs(&bucket)?))
        }
        "s3" => {
            let bucket = std::env::var("S3_BUCKET_NAME")
                .map_err(|_| StorageError::Config("S3_BUCKET_NAME is required".into()))?;
            tracing::info!("Using S3 storage backend (bucket: {})", bucket);
            Ok(Arc::new(CloudStorage::s3(&bucket)?))
        }
        other => Err(StorageError::Config(format!(
            "Unknown STORAGE_TYPE: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_map_covers_thumbnails_and_video() {
        assert_eq!(content_type_for_path("thumbnails/a_small.webp"), "image/webp");
        assert_eq!(content_type_for_path("clips/raw.MP4"), "video/mp4");
        assert_eq!(content_type_for_path("clips/raw.mov"), "video/quicktime");
        assert_eq!(content_type_for_path("unknown.bin"), "application/octet-stream");
    }
}

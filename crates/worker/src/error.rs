use services::{media::MediaError, queue::QueueError, storage::StorageError};
use thiserror::Error;

use crate::platform::PlatformError;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

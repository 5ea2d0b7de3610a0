use thiserror::Error;

use crate::dataset::DatasetError;
use crate::media::MediaError;
use crate::remote::RemoteError;

/// Errors that abort a dataset sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Fetching records failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// An attachment could not be cached.
    #[error(transparent)]
    Media(#[from] MediaError),

    /// Dataset files could not be read or written.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

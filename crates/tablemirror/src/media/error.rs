use std::path::PathBuf;

use thiserror::Error;

use crate::http::HttpError;

/// Errors raised by the attachment cache.
#[derive(Debug, Error)]
pub enum MediaError {
    /// Unrecognized entry in a cached media type list.
    #[error("Invalid media type '{0}' (expected image, pdf or file)")]
    InvalidMediaType(String),

    /// The media link prefix cannot be matched in rendered cells.
    #[error("Invalid media link prefix: {0}")]
    InvalidLinkPrefix(#[from] regex::Error),

    /// Download returned a non-success status.
    #[error("Attachment download failed ({status}) for {url}")]
    Download { status: u16, url: String },

    /// Download failed below HTTP.
    #[error("Attachment download failed for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: HttpError,
    },

    /// The download client could not be created.
    #[error("Failed to build download client: {0}")]
    Client(#[source] HttpError),

    /// Local filesystem failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A download task panicked or was cancelled.
    #[error("Download task failed: {0}")]
    Task(String),
}

impl MediaError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Server errors and transport failures are worth another attempt.
    #[inline]
    pub fn is_transient(&self) -> bool {
        match self {
            MediaError::Download { status, .. } => (500..600).contains(status),
            MediaError::Transport { .. } => true,
            _ => false,
        }
    }
}

/// Get a short error message suitable for display.
pub fn short_error_message(err: &MediaError) -> String {
    match err {
        MediaError::Download { status, .. } => format!("HTTP {}", status),
        MediaError::Transport { .. } => "Network error".to_string(),
        MediaError::Io { .. } => "I/O error".to_string(),
        other => other.to_string(),
    }
}

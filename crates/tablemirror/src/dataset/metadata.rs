//! Per-dataset run metadata.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::atomic::write_atomic;
use super::error::{DatasetError, Result};
use crate::sync::SyncMode;

/// What the last run wrote, and where the next delta sync starts.
///
/// Every field has a default so files written by older runs still load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncMetadata {
    pub generated_at_utc: String,
    pub dataset: String,
    pub record_count: usize,
    pub media_cached: bool,
    pub media_files_in_use: usize,
    /// Prefix of local links in the written cells.
    pub media_link_prefix: Option<String>,
    /// Cached attachment classes, e.g. `image,pdf`.
    pub media_types: Option<String>,
    pub max_file_size_bytes: Option<u64>,
    /// Some attachments were left out because the download budget ran out.
    pub media_incomplete: bool,
    pub base_id: String,
    pub table_id: String,
    pub view_id: String,
    pub sync_mode: Option<SyncMode>,
    pub changed_record_count: usize,
    pub published_field: Option<String>,
    pub last_modified_field: Option<String>,
    pub sync_cursor: Option<String>,
}

impl SyncMetadata {
    /// Stored cursor, if non-empty.
    pub fn cursor(&self) -> Option<&str> {
        self.sync_cursor.as_deref().filter(|c| !c.trim().is_empty())
    }
}

/// Load metadata from a previous run.
///
/// A missing file yields `None`. So does an unreadable one: it is logged and
/// the dataset is rebuilt.
pub async fn read_metadata(path: &Path) -> Result<Option<SyncMetadata>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(DatasetError::io(path, e)),
    };

    match serde_json::from_slice::<SyncMetadata>(&bytes) {
        Ok(metadata) => Ok(Some(metadata)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable metadata");
            Ok(None)
        }
    }
}

/// Atomically write pretty-printed metadata.
pub async fn write_metadata(path: &Path, metadata: &SyncMetadata) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(metadata).map_err(|source| DatasetError::Metadata {
        path: path.to_path_buf(),
        source,
    })?;
    bytes.push(b'\n');
    write_atomic(path, &bytes).await
}

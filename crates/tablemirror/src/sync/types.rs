//! Shared sync types and constants.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::media::PruneReport;

/// Synthetic column holding the remote record identifier (the merge key).
pub const RECORD_ID_COLUMN: &str = "_record_id";

/// Page size requested from the remote API (its maximum).
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Total attempts for a single attachment download.
pub const DEFAULT_DOWNLOAD_ATTEMPTS: usize = 3;

/// Retries for a rate-limited record page.
pub const MAX_PAGE_RETRIES: usize = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 500;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Column names that usually carry a "last modified" timestamp, in priority order.
pub const DEFAULT_LAST_MODIFIED_CANDIDATES: &[&str] = &[
    "Last Modified",
    "Last Modified Time",
    "Last Modified At",
    "Updated",
    "Updated At",
    "Modified",
];

/// Column names that usually carry a "published" flag, in priority order.
pub const DEFAULT_PUBLISHED_CANDIDATES: &[&str] = &["Published", "Is Published", "Publish", "Public"];

/// How a dataset was brought up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Complete rebuild from an unfiltered (or publish-filtered) fetch.
    Full,
    /// Merge of records changed since the stored cursor.
    Delta,
}

impl SyncMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Delta => "delta",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested sync strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncModeOverride {
    /// Use delta sync whenever its preconditions hold.
    #[default]
    Auto,
    /// Always rebuild.
    Full,
}

impl FromStr for SyncModeOverride {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "delta" => Ok(Self::Auto),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown sync mode '{other}' (expected auto or full)")),
        }
    }
}

/// Immutable description of one mirrored table+view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSpec {
    /// Human-readable dataset name (used in logs and metadata).
    pub name: String,
    /// Where the CSV is written.
    pub output_path: PathBuf,
    /// Where the metadata JSON is written.
    pub metadata_path: PathBuf,
    /// Remote table identifier.
    pub table_id: String,
    /// Remote view identifier.
    pub view_id: String,
    /// Columns that always come first, in this order.
    pub preferred_columns: Vec<String>,
    /// Candidate names for the "last modified" column.
    pub last_modified_candidates: Vec<String>,
    /// Candidate names for the "published" column.
    pub published_candidates: Vec<String>,
}

impl DatasetSpec {
    /// Create a dataset spec with the default role-field candidates.
    pub fn new(
        name: impl Into<String>,
        table_id: impl Into<String>,
        view_id: impl Into<String>,
        output_path: impl Into<PathBuf>,
        metadata_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            output_path: output_path.into(),
            metadata_path: metadata_path.into(),
            table_id: table_id.into(),
            view_id: view_id.into(),
            preferred_columns: Vec::new(),
            last_modified_candidates: to_strings(DEFAULT_LAST_MODIFIED_CANDIDATES),
            published_candidates: to_strings(DEFAULT_PUBLISHED_CANDIDATES),
        }
    }

    /// Set the preferred column ordering.
    #[must_use]
    pub fn with_preferred_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preferred_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the "last modified" candidates.
    #[must_use]
    pub fn with_last_modified_candidates<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.last_modified_candidates = candidates.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the "published" candidates.
    #[must_use]
    pub fn with_published_candidates<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.published_candidates = candidates.into_iter().map(Into::into).collect();
        self
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_string()).collect()
}

/// Run-wide sync options.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Remote base identifier, recorded in metadata.
    pub base_id: String,
    /// Strategy override.
    pub mode: SyncModeOverride,
    /// Delete cached media not referenced by any dataset after the run.
    pub prune_media: bool,
}

/// Outcome of syncing one dataset.
#[derive(Debug, Clone)]
pub struct DatasetSyncResult {
    /// Dataset name.
    pub dataset: String,
    /// Strategy that produced the output.
    pub mode: SyncMode,
    /// Why delta sync was not used, when it was not.
    pub fallback_reason: Option<String>,
    /// Rows written.
    pub record_count: usize,
    /// Rows inserted, updated, or deleted.
    pub changed_count: usize,
    /// Distinct media files referenced by the written rows.
    pub media_in_use: usize,
    /// Cursor stored in the metadata.
    pub cursor: String,
}

/// Outcome of a whole run.
#[derive(Debug, Default)]
#[must_use = "RunReport records skipped datasets and prune results"]
pub struct RunReport {
    /// Per-dataset results, in processing order.
    pub datasets: Vec<DatasetSyncResult>,
    /// Prune result, when pruning ran.
    pub prune: Option<PruneReport>,
    /// True if a shutdown request stopped the run early.
    pub interrupted: bool,
}

impl RunReport {
    /// Total rows written across datasets.
    pub fn total_records(&self) -> usize {
        self.datasets.iter().map(|d| d.record_count).sum()
    }
}

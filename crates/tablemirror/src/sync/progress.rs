//! Progress reporting types for sync operations.
//!
//! The library emits these events; the CLI decides whether to render them as
//! progress bars or structured log lines.

use super::types::SyncMode;

/// Why an attachment was left out of the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSkipReason {
    /// Extension is on the deny-list.
    Blocked,
    /// Declared or measured size exceeds the configured maximum.
    Oversized,
    /// Global download budget is used up.
    BudgetExhausted,
    /// Attachment class is not in the cached type selection.
    NotSelected,
}

impl MediaSkipReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MediaSkipReason::Blocked => "blocked extension",
            MediaSkipReason::Oversized => "exceeds size limit",
            MediaSkipReason::BudgetExhausted => "download budget exhausted",
            MediaSkipReason::NotSelected => "type not selected for caching",
        }
    }
}

/// Progress events emitted during a run.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// Run is starting.
    RunStarted {
        /// Number of configured datasets.
        datasets: usize,
    },

    /// Starting work on a dataset.
    DatasetStarted {
        /// Dataset name.
        dataset: String,
    },

    /// Delta sync is not possible; a full sync follows.
    DeltaFallback {
        /// Dataset name.
        dataset: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Starting to fetch records.
    FetchingRecords {
        /// Dataset name.
        dataset: String,
        /// Whether a server-side filter is applied.
        filtered: bool,
    },

    /// Fetched a page of records.
    FetchedPage {
        /// Dataset name.
        dataset: String,
        /// Page number (1-indexed).
        page: u32,
        /// Records on this page.
        count: usize,
        /// Running total so far.
        total_so_far: usize,
    },

    /// All pages fetched.
    FetchComplete {
        /// Dataset name.
        dataset: String,
        /// Total records fetched.
        total: usize,
    },

    /// The remote rejected a filter because it names an unknown field.
    FilterRejected {
        /// Dataset name.
        dataset: String,
        /// Filter that was rejected.
        filter: String,
    },

    /// Rate limited while fetching records, backing off.
    RateLimitBackoff {
        /// Dataset name.
        dataset: String,
        /// Time to wait before retry (ms).
        retry_after_ms: u64,
        /// Current attempt number.
        attempt: u32,
    },

    /// An attachment was downloaded into the cache.
    MediaDownloaded {
        /// Local file name.
        file: String,
        /// Bytes written.
        bytes: u64,
    },

    /// An attachment was omitted from the output.
    MediaSkipped {
        /// Sanitized file name.
        file: String,
        /// Why.
        reason: MediaSkipReason,
    },

    /// A download failed transiently and will be retried.
    DownloadRetry {
        /// Source URL.
        url: String,
        /// Time to wait before retry (ms).
        retry_after_ms: u64,
        /// Current attempt number.
        attempt: u32,
    },

    /// Dataset files were written.
    DatasetWritten {
        /// Dataset name.
        dataset: String,
        /// Strategy used.
        mode: SyncMode,
        /// Rows written.
        records: usize,
        /// Rows changed.
        changed: usize,
    },

    /// Stale media pruning finished.
    PruneComplete {
        /// Files removed.
        removed: usize,
    },

    /// Warning message (non-fatal).
    Warning {
        /// Warning message.
        message: String,
    },
}

/// Callback for progress updates during sync operations.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}

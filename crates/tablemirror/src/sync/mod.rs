//! Dataset synchronization.
//!
//! # Module Structure
//!
//! - [`types`] - Core types: `DatasetSpec`, `SyncOptions`, results, constants
//! - [`progress`] - Progress reporting: `SyncProgress`, `ProgressCallback`, `emit()`
//! - [`cursor`] - Sync cursor parsing and advancement
//! - [`engine`] - Per-dataset delta/full sync: `sync_dataset()`
//! - [`context`] - Whole-run orchestration: `SyncContext`
//!
//! # Example
//!
//! ```ignore
//! use tablemirror::sync::{DatasetSpec, SyncContext, SyncOptions};
//!
//! let datasets = vec![DatasetSpec::new("events", "tbl", "viw", "data/events.csv", "data/meta.json")];
//! let report = SyncContext::builder()
//!     .source(Arc::new(client))
//!     .media(media)
//!     .options(SyncOptions { base_id: "app".into(), ..SyncOptions::default() })
//!     .build()?
//!     .run(&datasets)
//!     .await?;
//! println!("Wrote {} rows", report.total_records());
//! ```

mod context;
pub mod cursor;
pub mod engine;
mod error;
mod progress;
mod types;

// Re-export types
pub use types::{
    DatasetSpec, DatasetSyncResult, RunReport, SyncMode, SyncModeOverride, SyncOptions,
};

// Re-export constants
pub use types::{
    DEFAULT_DOWNLOAD_ATTEMPTS, DEFAULT_LAST_MODIFIED_CANDIDATES, DEFAULT_PAGE_SIZE,
    DEFAULT_PUBLISHED_CANDIDATES, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS, MAX_PAGE_RETRIES,
    RECORD_ID_COLUMN,
};

// Re-export progress types
pub use progress::{MediaSkipReason, ProgressCallback, SyncProgress, emit};

pub use context::{SyncContext, SyncContextBuilder, SyncContextError};
pub use engine::{DeltaBlocked, sync_dataset};
pub use error::{Result, SyncError};

//! tablemirror - incremental mirroring of remote tables into local CSV files.
//!
//! Each configured dataset (a remote table + view) is written to a CSV file
//! plus a metadata JSON file. Later runs fetch only records modified since the
//! stored cursor and merge them in, falling back to a full rebuild whenever
//! that would be unsafe. Attachments are cached in a shared media directory
//! that is pruned once all datasets are written.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tablemirror::media::{MediaCache, MediaOptions, SharedMediaState};
//! use tablemirror::remote::{AIRTABLE_API_URL, AirtableClient, ApiRateLimiter, rate_limits};
//! use tablemirror::sync::{DatasetSpec, SyncContext, SyncOptions};
//!
//! let client = AirtableClient::new(
//!     AIRTABLE_API_URL,
//!     "appXXXX",
//!     &token,
//!     Some(ApiRateLimiter::new(rate_limits::AIRTABLE_DEFAULT_RPS)),
//! )?;
//! let media = MediaCache::new(MediaOptions::default(), Arc::new(SharedMediaState::new(None)))?;
//!
//! let report = SyncContext::builder()
//!     .source(Arc::new(client))
//!     .media(media)
//!     .options(SyncOptions { base_id: "appXXXX".into(), prune_media: true, ..Default::default() })
//!     .build()?
//!     .run(&[DatasetSpec::new("events", "tbl", "viw", "data/events.csv", "data/meta.json")])
//!     .await?;
//! ```

pub mod dataset;
pub mod fields;
pub mod http;
pub mod media;
pub mod remote;
pub mod retry;
pub mod sync;

pub use dataset::{DatasetError, SyncMetadata, Table};
pub use media::{MediaCache, MediaError, MediaOptions, PruneReport, SharedMediaState};
pub use remote::{AirtableClient, ApiRateLimiter, Record, RecordSource, RemoteError, rate_limits};
pub use sync::{
    DatasetSpec, DatasetSyncResult, RunReport, SyncContext, SyncError, SyncMode, SyncModeOverride,
    SyncOptions, SyncProgress,
};

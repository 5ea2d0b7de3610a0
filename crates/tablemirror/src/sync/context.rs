//! Sync context builder for whole runs.
//!
//! A run syncs every configured dataset in order, then prunes the media
//! directory once.
//!
//! # Example
//!
//! ```ignore
//! use tablemirror::sync::{SyncContext, SyncOptions};
//!
//! let ctx = SyncContext::builder()
//!     .source(Arc::new(client))
//!     .media(media_cache)
//!     .options(SyncOptions::default())
//!     .progress(callback)
//!     .build()?;
//!
//! let report = ctx.run(&datasets).await?;
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use super::engine::sync_dataset;
use super::error::SyncError;
use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::{DatasetSpec, DatasetSyncResult, RunReport, SyncOptions};
use crate::media::{MediaCache, MediaError, prune_stale_media};
use crate::remote::RecordSource;

/// Error type for sync context operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncContextError {
    /// Missing required field in builder.
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    /// A dataset failed; datasets before it were written.
    #[error("Dataset '{dataset}' failed: {source}")]
    Dataset {
        dataset: String,
        #[source]
        source: SyncError,
    },

    /// The final prune failed.
    #[error("Media prune failed: {0}")]
    Prune(#[from] MediaError),
}

/// Result type for sync context operations.
pub type Result<T> = std::result::Result<T, SyncContextError>;

/// Builder for creating a `SyncContext`.
#[derive(Default)]
pub struct SyncContextBuilder {
    source: Option<Arc<dyn RecordSource>>,
    media: Option<MediaCache>,
    options: Option<SyncOptions>,
    progress: Option<Arc<ProgressCallback>>,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl SyncContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the record source.
    pub fn source(mut self, source: Arc<dyn RecordSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the attachment cache.
    pub fn media(mut self, media: MediaCache) -> Self {
        self.media = Some(media);
        self
    }

    /// Set sync options.
    pub fn options(mut self, options: SyncOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Set the progress callback.
    pub fn progress(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Set the shutdown flag for graceful shutdown.
    pub fn shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Build the sync context.
    ///
    /// # Errors
    ///
    /// Returns `SyncContextError::MissingField` if the source or media cache
    /// is not set.
    pub fn build(self) -> Result<SyncContext> {
        let source = self
            .source
            .ok_or(SyncContextError::MissingField { field: "source" })?;
        let media = self
            .media
            .ok_or(SyncContextError::MissingField { field: "media" })?;

        Ok(SyncContext {
            source,
            media,
            options: self.options.unwrap_or_default(),
            progress: self.progress,
            shutdown_flag: self.shutdown_flag,
        })
    }
}

/// Context for a sync run.
pub struct SyncContext {
    source: Arc<dyn RecordSource>,
    media: MediaCache,
    options: SyncOptions,
    progress: Option<Arc<ProgressCallback>>,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl SyncContext {
    /// Create a new builder.
    pub fn builder() -> SyncContextBuilder {
        SyncContextBuilder::new()
    }

    /// Get a reference to the options.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Get a reference to the attachment cache.
    pub fn media(&self) -> &MediaCache {
        &self.media
    }

    /// Check whether a graceful shutdown was requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn on_progress(&self) -> Option<&ProgressCallback> {
        self.progress.as_deref()
    }

    /// Sync a single dataset.
    pub async fn sync_dataset(
        &self,
        dataset: &DatasetSpec,
    ) -> std::result::Result<DatasetSyncResult, SyncError> {
        sync_dataset(
            self.source.as_ref(),
            &self.media,
            dataset,
            &self.options,
            self.on_progress(),
        )
        .await
    }

    /// Sync every dataset in order, then prune unreferenced media.
    ///
    /// The first failing dataset aborts the run. A shutdown request lets the
    /// current dataset finish and skips the rest. The prune runs only when
    /// every dataset was synced.
    pub async fn run(&self, datasets: &[DatasetSpec]) -> Result<RunReport> {
        emit(
            self.on_progress(),
            SyncProgress::RunStarted {
                datasets: datasets.len(),
            },
        );

        let mut report = RunReport::default();

        for dataset in datasets {
            if self.is_shutdown_requested() {
                tracing::warn!(
                    skipped = datasets.len() - report.datasets.len(),
                    "Shutdown requested, skipping remaining datasets"
                );
                report.interrupted = true;
                break;
            }

            let result = self
                .sync_dataset(dataset)
                .await
                .map_err(|source| SyncContextError::Dataset {
                    dataset: dataset.name.clone(),
                    source,
                })?;
            report.datasets.push(result);
        }

        if self.is_shutdown_requested() {
            report.interrupted = true;
        }

        if !self.options.prune_media {
            return Ok(report);
        }
        if !self.media.is_enabled() {
            tracing::debug!("Media caching disabled, nothing to prune");
            return Ok(report);
        }
        if report.interrupted {
            tracing::warn!("Run interrupted, skipping media prune");
            return Ok(report);
        }

        let in_use = self.media.shared().in_use();
        let pruned = prune_stale_media(&self.media.options().media_dir, &in_use).await?;
        if pruned.removed > 0 {
            tracing::info!(removed = pruned.removed, "Pruned stale media files");
        }
        emit(
            self.on_progress(),
            SyncProgress::PruneComplete {
                removed: pruned.removed,
            },
        );
        report.prune = Some(pruned);

        Ok(report)
    }
}

use tablemirror::sync::SyncProgress;

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::RunStarted { datasets } => {
                tracing::info!(datasets, "Starting refresh");
            }

            SyncProgress::DatasetStarted { dataset } => {
                tracing::info!(dataset = %dataset, "Syncing dataset");
            }

            SyncProgress::DeltaFallback { dataset, reason } => {
                tracing::info!(dataset = %dataset, reason = %reason, "Full sync");
            }

            SyncProgress::FetchingRecords { dataset, filtered } => {
                tracing::debug!(dataset = %dataset, filtered, "Fetching records");
            }

            SyncProgress::FetchedPage {
                dataset,
                page,
                count,
                total_so_far,
            } => {
                tracing::debug!(dataset = %dataset, page, count, total_so_far, "Fetched page");
            }

            SyncProgress::FetchComplete { dataset, total } => {
                tracing::info!(dataset = %dataset, total, "Fetch complete");
            }

            SyncProgress::FilterRejected { dataset, filter } => {
                tracing::warn!(dataset = %dataset, filter = %filter, "Filter rejected by remote");
            }

            SyncProgress::RateLimitBackoff {
                dataset,
                retry_after_ms,
                attempt,
            } => {
                tracing::warn!(
                    dataset = %dataset,
                    retry_after_ms,
                    attempt,
                    "Rate limited, backing off"
                );
            }

            SyncProgress::MediaDownloaded { file, bytes } => {
                tracing::debug!(file = %file, bytes, "Downloaded attachment");
            }

            SyncProgress::MediaSkipped { file, reason } => {
                tracing::debug!(file = %file, reason = reason.as_str(), "Skipped attachment");
            }

            SyncProgress::DownloadRetry {
                url,
                retry_after_ms,
                attempt,
            } => {
                tracing::warn!(url = %url, retry_after_ms, attempt, "Download failed, retrying");
            }

            SyncProgress::DatasetWritten {
                dataset,
                mode,
                records,
                changed,
            } => {
                tracing::info!(dataset = %dataset, mode = %mode, records, changed, "Dataset written");
            }

            SyncProgress::PruneComplete { removed } => {
                tracing::info!(removed, "Media prune complete");
            }

            SyncProgress::Warning { message } => {
                tracing::warn!(message = %message, "Warning");
            }

            _ => {}
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}

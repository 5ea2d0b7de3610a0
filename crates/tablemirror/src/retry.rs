//! Shared retry utilities for remote operations.
//!
//! Record pages are retried when the API rate-limits us; attachment downloads
//! are retried on server errors and transport failures.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use crate::sync::{
    DEFAULT_DOWNLOAD_ATTEMPTS, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS, MAX_PAGE_RETRIES,
    ProgressCallback, SyncProgress, emit,
};

/// Configuration for retry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Minimum delay between retries.
    pub min_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Maximum number of retries after the first attempt.
    pub max_retries: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            max_retries: MAX_PAGE_RETRIES,
            with_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            with_jitter: true,
        }
    }

    /// Retry policy for attachment downloads: three attempts in total.
    #[must_use]
    pub fn downloads() -> Self {
        Self {
            max_retries: DEFAULT_DOWNLOAD_ATTEMPTS - 1,
            ..Self::default()
        }
    }

    /// Set whether to use jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Total number of attempts including the first one.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Build an exponential backoff strategy from this configuration.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder
    }
}

/// Execute an operation, retrying errors accepted by `is_retryable`.
///
/// Each retry is logged at debug level and reported through `on_progress` with
/// the event built by `make_event(retry_after_ms, attempt)`.
///
/// # Example
///
/// ```ignore
/// let response = with_retry(
///     || async { download(url).await },
///     &RetryConfig::downloads(),
///     MediaError::is_transient,
///     |e| e.to_string(),
///     url,
///     on_progress,
///     |retry_after_ms, attempt| SyncProgress::DownloadRetry { .. },
/// ).await?;
/// ```
pub async fn with_retry<T, E, F, Fut, IsRetryable, ShortMsg, MakeEvent>(
    mut operation: F,
    config: &RetryConfig,
    is_retryable: IsRetryable,
    short_message: ShortMsg,
    target: &str,
    on_progress: Option<&ProgressCallback>,
    make_event: MakeEvent,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
    IsRetryable: Fn(&E) -> bool,
    ShortMsg: Fn(&E) -> String,
    MakeEvent: Fn(u64, u32) -> SyncProgress,
{
    // Track attempt number for progress reporting
    let attempt = AtomicU32::new(0);

    let retry_op = || {
        attempt.fetch_add(1, Ordering::SeqCst);
        operation()
    };

    retry_op
        .retry(config.clone().into_backoff())
        .notify(|err, dur| {
            let current_attempt = attempt.load(Ordering::SeqCst);
            emit(
                on_progress,
                make_event(dur.as_millis() as u64, current_attempt),
            );
            tracing::debug!(
                "Retrying {} in {:?} (attempt {}): {}",
                target,
                dur,
                current_attempt,
                short_message(err)
            );
        })
        .when(|e| is_retryable(e))
        .await
}

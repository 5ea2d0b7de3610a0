//! The on-disk attachment cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;

use super::classify::{MediaTypeSelection, classify, is_blocked};
use super::error::{MediaError, short_error_message};
use super::filename::{local_filename, sanitize_filename};
use super::refs::MediaLinkPattern;
use super::shared::SharedMediaState;
use crate::http::reqwest_transport::ReqwestTransport;
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::remote::Attachment;
use crate::retry::{RetryConfig, with_retry};
use crate::sync::{MediaSkipReason, ProgressCallback, SyncProgress, emit};

/// Link prefix written in front of cached file names.
pub const DEFAULT_MEDIA_LINK_PREFIX: &str = "data/media";

/// Default media directory.
pub const DEFAULT_MEDIA_DIR: &str = "data/media";

/// Default number of attachments fetched at once.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;

/// Request timeout for a single attachment download.
const DOWNLOAD_TIMEOUT: StdDuration = StdDuration::from_secs(180);

/// Attachment cache settings.
#[derive(Debug, Clone)]
pub struct MediaOptions {
    /// Directory holding cached files.
    pub media_dir: PathBuf,
    /// Prefix of local links written into cells.
    pub link_prefix: String,
    /// Cache attachments locally; otherwise cells link to the remote URL.
    pub enabled: bool,
    /// Attachment classes that are cached.
    pub selection: MediaTypeSelection,
    /// Largest file that is downloaded, in bytes.
    pub max_file_size: Option<u64>,
    /// Attachments of one field fetched at once.
    pub max_concurrent_downloads: usize,
    /// Retry policy for downloads.
    pub retry: RetryConfig,
}

impl Default for MediaOptions {
    fn default() -> Self {
        Self {
            media_dir: PathBuf::from(DEFAULT_MEDIA_DIR),
            link_prefix: DEFAULT_MEDIA_LINK_PREFIX.to_string(),
            enabled: true,
            selection: MediaTypeSelection::all(),
            max_file_size: None,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            retry: RetryConfig::downloads(),
        }
    }
}

/// An attachment rendered for a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAttachment {
    /// `<sanitizedFilename> (<link>)`.
    pub token: String,
    /// Cached file backing the link, when the link is local.
    pub local_filename: Option<String>,
}

/// Downloads, dedups and links attachments.
///
/// Cloning is cheap; clones share the per-file locks and the download
/// semaphore.
#[derive(Clone)]
pub struct MediaCache {
    transport: Arc<dyn HttpTransport>,
    options: Arc<MediaOptions>,
    shared: Arc<SharedMediaState>,
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
    semaphore: Arc<Semaphore>,
    link_pattern: MediaLinkPattern,
    progress: Option<Arc<ProgressCallback>>,
}

impl MediaCache {
    /// Create a cache that downloads with reqwest.
    pub fn new(options: MediaOptions, shared: Arc<SharedMediaState>) -> Result<Self, MediaError> {
        let transport =
            ReqwestTransport::with_timeout(DOWNLOAD_TIMEOUT).map_err(MediaError::Client)?;
        Self::new_with_transport(options, shared, Arc::new(transport))
    }

    pub fn new_with_transport(
        options: MediaOptions,
        shared: Arc<SharedMediaState>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, MediaError> {
        let link_pattern = MediaLinkPattern::new(&options.link_prefix)?;
        let permits = options.max_concurrent_downloads.max(1);

        Ok(Self {
            transport,
            options: Arc::new(options),
            shared,
            locks: Arc::new(Mutex::new(HashMap::new())),
            semaphore: Arc::new(Semaphore::new(permits)),
            link_pattern,
            progress: None,
        })
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn options(&self) -> &MediaOptions {
        &self.options
    }

    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    pub fn shared(&self) -> &Arc<SharedMediaState> {
        &self.shared
    }

    /// Link prefix as written into cells, without a trailing slash.
    pub fn link_prefix(&self) -> &str {
        self.options.link_prefix.trim_end_matches('/')
    }

    pub fn link_pattern(&self) -> &MediaLinkPattern {
        &self.link_pattern
    }

    /// Whether a cached file is present in the media directory.
    pub async fn is_cached(&self, file: &str) -> bool {
        matches!(
            tokio::fs::try_exists(self.options.media_dir.join(file)).await,
            Ok(true)
        )
    }

    fn on_progress(&self) -> Option<&ProgressCallback> {
        self.progress.as_deref()
    }

    fn skip(&self, file: &str, reason: MediaSkipReason) {
        emit(
            self.on_progress(),
            SyncProgress::MediaSkipped {
                file: file.to_string(),
                reason,
            },
        );
    }

    fn file_lock(&self, file: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(file.to_string()).or_default())
    }

    /// Drop the map entry for `file` once no other task holds its lock.
    fn release_file_lock(&self, file: &str, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one in `lock`.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(file);
        }
    }

    /// Render one attachment.
    ///
    /// Returns `None` when the attachment is omitted from the output: empty
    /// URL, blocked extension, class not selected, too large, or budget spent.
    pub async fn resolve(
        &self,
        attachment: &Attachment,
    ) -> Result<Option<ResolvedAttachment>, MediaError> {
        let url = attachment.url.trim();
        if url.is_empty() {
            return Ok(None);
        }

        let sanitized = sanitize_filename(attachment.filename.trim(), url);
        if is_blocked(attachment, &sanitized) {
            tracing::debug!(file = %sanitized, "Skipping attachment with blocked extension");
            self.skip(&sanitized, MediaSkipReason::Blocked);
            return Ok(None);
        }

        if !self.options.enabled {
            return Ok(Some(ResolvedAttachment {
                token: format!("{} ({})", sanitized, url),
                local_filename: None,
            }));
        }

        let kind = classify(attachment);
        if !self.options.selection.contains(kind) {
            tracing::debug!(file = %sanitized, kind = %kind, "Attachment type not selected for caching");
            self.skip(&sanitized, MediaSkipReason::NotSelected);
            return Ok(None);
        }

        let local = local_filename(attachment, &sanitized);
        let lock = self.file_lock(&local);
        let resolved = {
            let _guard = lock.lock().await;
            self.resolve_local(attachment, url, &sanitized, local.clone()).await
        };
        self.release_file_lock(&local, lock);
        resolved
    }

    /// Make sure `local` is cached, under its file lock.
    async fn resolve_local(
        &self,
        attachment: &Attachment,
        url: &str,
        sanitized: &str,
        local: String,
    ) -> Result<Option<ResolvedAttachment>, MediaError> {
        let path = self.options.media_dir.join(&local);
        if !self.is_cached(&local).await {
            if let (Some(max), Some(declared)) = (self.options.max_file_size, attachment.size)
                && declared > max
            {
                tracing::warn!(
                    file = %local,
                    size = declared,
                    max,
                    "Skipping attachment larger than the size limit"
                );
                self.skip(sanitized, MediaSkipReason::Oversized);
                return Ok(None);
            }

            let budget = self.shared.budget();
            if let Some(budget) = budget
                && !budget.try_reserve()
            {
                tracing::debug!(file = %local, "Download budget exhausted");
                self.shared.record_deferred();
                self.skip(sanitized, MediaSkipReason::BudgetExhausted);
                return Ok(None);
            }

            match self.download(url, &path, &local).await {
                Ok(Some(bytes)) => {
                    tracing::debug!(file = %local, bytes, "Cached attachment");
                    emit(
                        self.on_progress(),
                        SyncProgress::MediaDownloaded {
                            file: local.clone(),
                            bytes,
                        },
                    );
                }
                Ok(None) => {
                    if let Some(budget) = budget {
                        budget.refund();
                    }
                    self.skip(sanitized, MediaSkipReason::Oversized);
                    return Ok(None);
                }
                Err(e) => {
                    if let Some(budget) = budget {
                        budget.refund();
                    }
                    return Err(e);
                }
            }
        }

        Ok(Some(ResolvedAttachment {
            token: format!(
                "{} ({}/{})",
                sanitized,
                self.link_prefix(),
                local
            ),
            local_filename: Some(local),
        }))
    }

    /// Render a list of attachments concurrently, keeping their order.
    ///
    /// The first error wins; omitted attachments are dropped.
    pub async fn resolve_all(
        &self,
        attachments: Vec<Attachment>,
    ) -> Result<Vec<ResolvedAttachment>, MediaError> {
        if attachments.len() <= 1 {
            let mut resolved = Vec::with_capacity(attachments.len());
            for attachment in &attachments {
                if let Some(r) = self.resolve(attachment).await? {
                    resolved.push(r);
                }
            }
            return Ok(resolved);
        }

        let total = attachments.len();
        let mut join_set: JoinSet<(usize, Result<Option<ResolvedAttachment>, MediaError>)> =
            JoinSet::new();
        for (idx, attachment) in attachments.into_iter().enumerate() {
            let cache = self.clone();
            join_set.spawn(async move { (idx, cache.resolve(&attachment).await) });
        }

        let mut slots: Vec<Option<ResolvedAttachment>> = vec![None; total];
        let mut first_error: Option<MediaError> = None;

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, Ok(resolved))) => slots[idx] = resolved,
                Ok((_, Err(e))) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(MediaError::Task(e.to_string()));
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        Ok(slots.into_iter().flatten().collect())
    }

    /// Download `url` into `path`.
    ///
    /// Returns the size written, or `None` if the body exceeds the size limit.
    async fn download(
        &self,
        url: &str,
        path: &Path,
        local: &str,
    ) -> Result<Option<u64>, MediaError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| MediaError::Task(e.to_string()))?;

        let media_dir = &self.options.media_dir;
        tokio::fs::create_dir_all(media_dir)
            .await
            .map_err(|e| MediaError::io(media_dir, e))?;

        let response = with_retry(
            || self.fetch(url),
            &self.options.retry,
            MediaError::is_transient,
            short_error_message,
            url,
            self.on_progress(),
            |retry_after_ms, attempt| SyncProgress::DownloadRetry {
                url: url.to_string(),
                retry_after_ms,
                attempt,
            },
        )
        .await?;

        let body_len = response.body.len() as u64;
        if let Some(max) = self.options.max_file_size {
            let declared = response.content_length().unwrap_or(body_len);
            if declared > max || body_len > max {
                tracing::warn!(
                    file = %local,
                    size = declared.max(body_len),
                    max,
                    "Discarding download larger than the size limit"
                );
                return Ok(None);
            }
        }

        let temp = media_dir.join(format!(".{}.part", local));
        if let Err(e) = write_then_rename(&temp, path, &response.body).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }

        Ok(Some(body_len))
    }

    async fn fetch(&self, url: &str) -> Result<HttpResponse, MediaError> {
        let request = HttpRequest::get(url).header("Accept", "*/*");
        let response =
            self.transport
                .send(request)
                .await
                .map_err(|source| MediaError::Transport {
                    url: url.to_string(),
                    source,
                })?;

        if !response.is_success() {
            return Err(MediaError::Download {
                status: response.status,
                url: url.to_string(),
            });
        }

        Ok(response)
    }
}

async fn write_then_rename(temp: &Path, path: &Path, body: &[u8]) -> Result<(), MediaError> {
    tokio::fs::write(temp, body)
        .await
        .map_err(|e| MediaError::io(temp, e))?;
    tokio::fs::rename(temp, path)
        .await
        .map_err(|e| MediaError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockTransport;
    use crate::media::AttachmentKind;

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(StdDuration::from_millis(1), StdDuration::from_millis(2), 2)
            .with_jitter(false)
    }

    fn options(dir: &Path) -> MediaOptions {
        MediaOptions {
            media_dir: dir.to_path_buf(),
            retry: fast_retry(),
            ..MediaOptions::default()
        }
    }

    fn cache(
        options: MediaOptions,
        max_downloads: Option<usize>,
        transport: &MockTransport,
    ) -> MediaCache {
        MediaCache::new_with_transport(
            options,
            Arc::new(SharedMediaState::new(max_downloads)),
            Arc::new(transport.clone()),
        )
        .unwrap()
    }

    fn png(id: &str) -> Attachment {
        Attachment {
            id: id.to_string(),
            url: format!("https://dl.example.com/{id}/photo.png"),
            filename: "photo.png".to_string(),
            mime_type: Some("image/png".to_string()),
            ..Attachment::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_cache_links_remote_url() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let cache = cache(
            MediaOptions {
                enabled: false,
                ..options(dir.path())
            },
            None,
            &transport,
        );

        let resolved = cache.resolve(&png("att1")).await.unwrap().unwrap();
        assert_eq!(
            resolved.token,
            "photo.png (https://dl.example.com/att1/photo.png)"
        );
        assert!(resolved.local_filename.is_none());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unselected_type_is_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let cache = cache(
            MediaOptions {
                selection: MediaTypeSelection::parse("pdf").unwrap(),
                ..options(dir.path())
            },
            None,
            &transport,
        );

        assert!(cache.resolve(&png("att1")).await.unwrap().is_none());
        assert!(transport.requests().is_empty());
        assert!(
            !MediaTypeSelection::parse("pdf")
                .unwrap()
                .contains(AttachmentKind::Image)
        );
    }

    #[tokio::test]
    async fn test_blocked_and_empty_url_are_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let cache = cache(options(dir.path()), None, &transport);

        let tiff = Attachment {
            id: "att1".to_string(),
            url: "https://dl.example.com/scan.tiff".to_string(),
            filename: "scan.tiff".to_string(),
            ..Attachment::default()
        };
        assert!(cache.resolve(&tiff).await.unwrap().is_none());

        let empty = Attachment {
            filename: "a.png".to_string(),
            ..Attachment::default()
        };
        assert!(cache.resolve(&empty).await.unwrap().is_none());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_download_is_cached_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let att = png("att1");
        transport.push(&att.url, 200, b"PNGDATA".to_vec());
        let cache = cache(options(dir.path()), None, &transport);

        let first = cache.resolve(&att).await.unwrap().unwrap();
        let second = cache.resolve(&att).await.unwrap().unwrap();

        assert_eq!(first.token, "photo.png (data/media/att1_photo.png)");
        assert_eq!(first, second);
        assert_eq!(transport.request_count(&att.url), 1);
        assert_eq!(
            std::fs::read(dir.path().join("att1_photo.png")).unwrap(),
            b"PNGDATA"
        );
        assert!(!dir.path().join(".att1_photo.png.part").exists());
    }

    #[tokio::test]
    async fn test_budget_limits_new_downloads_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("att0_photo.png"), b"old").unwrap();

        let transport = MockTransport::new();
        let (a, b) = (png("att1"), png("att2"));
        transport.push(&a.url, 200, b"a".to_vec());
        transport.push(&b.url, 200, b"b".to_vec());
        let cache = cache(options(dir.path()), Some(1), &transport);

        assert!(cache.resolve(&png("att0")).await.unwrap().is_some());
        assert!(cache.resolve(&a).await.unwrap().is_some());
        assert!(cache.resolve(&b).await.unwrap().is_none());
        assert_eq!(transport.request_count(&b.url), 0);
        assert_eq!(cache.shared().deferred_count(), 1);
    }

    #[tokio::test]
    async fn test_declared_size_over_limit_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let cache = cache(
            MediaOptions {
                max_file_size: Some(10),
                ..options(dir.path())
            },
            None,
            &transport,
        );

        let att = Attachment {
            size: Some(11),
            ..png("att1")
        };
        assert!(cache.resolve(&att).await.unwrap().is_none());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_actual_size_over_limit_discards_file_and_refunds_budget() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let att = png("att1");
        transport.push(&att.url, 200, vec![0u8; 32]);
        let cache = cache(
            MediaOptions {
                max_file_size: Some(16),
                ..options(dir.path())
            },
            Some(1),
            &transport,
        );

        assert!(cache.resolve(&att).await.unwrap().is_none());
        assert!(!dir.path().join("att1_photo.png").exists());
        assert_eq!(cache.shared().budget().unwrap().remaining(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let att = png("att1");
        transport.push(&att.url, 503, "busy");
        transport.push_transport_error(&att.url, "connection reset");
        transport.push(&att.url, 200, b"ok".to_vec());
        let cache = cache(options(dir.path()), None, &transport);

        assert!(cache.resolve(&att).await.unwrap().is_some());
        assert_eq!(transport.request_count(&att.url), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_fatal_and_leave_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let att = png("att1");
        transport.push(&att.url, 404, "gone");
        let cache = cache(options(dir.path()), Some(1), &transport);

        let err = cache.resolve(&att).await.expect_err("404 is fatal");
        assert!(matches!(err, MediaError::Download { status: 404, .. }));
        assert_eq!(transport.request_count(&att.url), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(cache.shared().budget().unwrap().remaining(), 1);
    }

    #[tokio::test]
    async fn test_resolve_all_keeps_order_and_downloads_once() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let (a, b) = (png("att1"), png("att2"));
        transport.push(&a.url, 200, b"a".to_vec());
        transport.push(&b.url, 200, b"b".to_vec());
        let cache = cache(options(dir.path()), None, &transport);

        let resolved = cache
            .resolve_all(vec![b.clone(), a.clone(), b.clone()])
            .await
            .unwrap();

        let names: Vec<_> = resolved
            .iter()
            .map(|r| r.local_filename.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["att2_photo.png", "att1_photo.png", "att2_photo.png"]);
        assert_eq!(transport.request_count(&b.url), 1);
        assert_eq!(transport.request_count(&a.url), 1);
        assert!(cache.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_locks_are_released_after_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let att = png("att1");
        transport.push(&att.url, 404, "gone");
        let cache = cache(options(dir.path()), None, &transport);

        assert!(cache.resolve(&att).await.is_err());
        assert!(cache.locks.lock().unwrap().is_empty());

        let held = cache.file_lock("att2_photo.png");
        let other = cache.file_lock("att2_photo.png");
        cache.release_file_lock("att2_photo.png", other);
        assert_eq!(cache.locks.lock().unwrap().len(), 1);

        cache.release_file_lock("att2_photo.png", held);
        assert!(cache.locks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_new_builds_reqwest_client() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MediaCache::new(options(dir.path()), Arc::new(SharedMediaState::new(None)));
        assert!(cache.is_ok());
    }
}

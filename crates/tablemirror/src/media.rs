//! Attachment cache.
//!
//! Attachments are stored flat in one media directory as
//! `<attachmentId>_<sanitizedFilename>`, which is also the dedup key. Every
//! dataset of a run reports the files its rows link to into a shared
//! [`SharedMediaState`]; the final prune deletes everything else.
//!
//! # Example
//!
//! ```ignore
//! use tablemirror::media::{MediaCache, MediaOptions, SharedMediaState};
//!
//! let shared = Arc::new(SharedMediaState::new(Some(500)));
//! let cache = MediaCache::new(MediaOptions::default(), Arc::clone(&shared))?;
//! if let Some(resolved) = cache.resolve(&attachment).await? {
//!     println!("{}", resolved.token);
//! }
//! ```

mod cache;
mod classify;
mod error;
mod filename;
mod prune;
mod refs;
mod shared;

pub use cache::{
    DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_MEDIA_DIR, DEFAULT_MEDIA_LINK_PREFIX, MediaCache,
    MediaOptions, ResolvedAttachment,
};
pub use classify::{AttachmentKind, MediaTypeSelection, classify, is_blocked};
pub use error::{MediaError, short_error_message};
pub use filename::{local_filename, sanitize_filename, short_hash};
pub use prune::{PruneReport, prune_stale_media};
pub use refs::{MediaLinkPattern, MediaRefs};
pub use shared::{DownloadBudget, SharedMediaState};

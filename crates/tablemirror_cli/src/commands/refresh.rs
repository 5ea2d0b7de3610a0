//! The refresh command: mirror every configured dataset once.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use console::{Term, style};
use tablemirror::media::{MediaCache, SharedMediaState};
use tablemirror::remote::{AirtableClient, ApiRateLimiter};
use tablemirror::sync::{RunReport, SyncContext, SyncMode, SyncOptions};

use crate::config::{Config, RunSettings};
use crate::progress::ProgressReporter;

/// Options for a refresh run. Unset flags fall back to the config file.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct RefreshArgs {
    /// Config file to use instead of ./tablemirror.toml and the XDG config
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// CSV output of the default dataset
    #[arg(long)]
    pub output_csv: Option<PathBuf>,

    /// Metadata JSON of the default dataset
    #[arg(long)]
    pub metadata_path: Option<PathBuf>,

    /// Directory where attachment files are cached
    #[arg(long)]
    pub media_dir: Option<PathBuf>,

    /// Path prefix written into cells for cached files
    #[arg(long)]
    pub media_link_prefix: Option<String>,

    /// Keep remote attachment URLs instead of downloading files
    #[arg(long)]
    pub no_cache_media: bool,

    /// Delete cached media files no dataset references any more
    #[arg(long)]
    pub prune_media: bool,

    /// Attachment types to cache: comma-separated image, pdf, file (empty = all)
    #[arg(long)]
    pub cache_media_types: Option<String>,

    /// Maximum number of new downloads in this run
    #[arg(long)]
    pub max_downloads: Option<usize>,

    /// Attachments of one field downloaded at once
    #[arg(long)]
    pub max_concurrent_downloads: Option<usize>,

    /// Skip attachments larger than this many bytes
    #[arg(long)]
    pub max_file_size_bytes: Option<u64>,

    /// Sync strategy: auto (delta when possible) or full
    #[arg(long)]
    pub sync_mode: Option<String>,

    /// Shorthand for --sync-mode full
    #[arg(long)]
    pub full: bool,

    /// Remote base id
    #[arg(long)]
    pub base_id: Option<String>,

    /// Table of the default dataset
    #[arg(long)]
    pub table_id: Option<String>,

    /// View of the default dataset
    #[arg(long)]
    pub view_id: Option<String>,

    /// API root URL
    #[arg(long)]
    pub api_url: Option<String>,

    /// Proactive request pacing (requests per second)
    #[arg(long)]
    pub requests_per_second: Option<u32>,

    /// Disable proactive rate limiting (may cause API throttling)
    #[arg(short = 'R', long)]
    pub no_rate_limit: bool,
}

/// Handle the refresh command.
pub async fn handle_refresh(
    args: RefreshArgs,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let is_tty = Term::stdout().is_term();

    // Configuration errors surface before any network activity.
    let settings = Config::load(args.config.as_deref())?.resolve(&args)?;
    log_settings(&settings);

    if settings.requests_per_second.is_none() {
        warn_no_rate_limit(is_tty);
    }

    let reporter = Arc::new(ProgressReporter::new());
    let callback = reporter.as_callback();

    let client = AirtableClient::new(
        &settings.api_url,
        &settings.base_id,
        &settings.token,
        settings.requests_per_second.map(ApiRateLimiter::new),
    )?;
    let shared = Arc::new(SharedMediaState::new(settings.max_downloads));
    let media = MediaCache::new(settings.media, shared)?.with_progress(Arc::clone(&callback));

    let ctx = SyncContext::builder()
        .source(Arc::new(client))
        .media(media)
        .options(SyncOptions {
            base_id: settings.base_id,
            mode: settings.mode,
            prune_media: settings.prune_media,
        })
        .progress(callback)
        .shutdown_flag(shutdown_flag)
        .build()?;

    let result = ctx.run(&settings.datasets).await;
    reporter.finish();

    let report = result?;
    display_report(&report, is_tty);
    Ok(())
}

fn log_settings(settings: &RunSettings) {
    tracing::debug!(
        base_id = %settings.base_id,
        datasets = settings.datasets.len(),
        mode = ?settings.mode,
        cache_media = settings.media.enabled,
        media_types = %settings.media.selection,
        max_downloads = ?settings.max_downloads,
        prune_media = settings.prune_media,
        "Resolved settings"
    );
}

/// Print a warning when rate limiting is disabled (TTY only).
fn warn_no_rate_limit(is_tty: bool) {
    if is_tty {
        eprintln!("Warning: Rate limiting disabled - you may experience API throttling\n");
    }
}

fn display_report(report: &RunReport, is_tty: bool) {
    if !is_tty {
        for result in &report.datasets {
            tracing::info!(
                dataset = %result.dataset,
                mode = %result.mode,
                records = result.record_count,
                changed = result.changed_count,
                media = result.media_in_use,
                cursor = %result.cursor,
                "Dataset refreshed"
            );
        }
        if let Some(prune) = &report.prune {
            tracing::info!(removed = prune.removed, "Media pruned");
        }
        if report.interrupted {
            tracing::warn!("Run interrupted, remaining datasets skipped");
        }
        return;
    }

    println!();
    for result in &report.datasets {
        let mode = match result.mode {
            SyncMode::Delta => style("delta").green(),
            SyncMode::Full => style("full").yellow(),
        };
        println!(
            "{} {} ({}): {} rows, {} changed, {} media files",
            style("✓").green(),
            style(&result.dataset).bold(),
            mode,
            result.record_count,
            result.changed_count,
            result.media_in_use,
        );
        if let Some(reason) = &result.fallback_reason {
            println!("    full sync because {}", style(reason).dim());
        }
    }
    if let Some(prune) = &report.prune {
        println!("Removed {} stale media files", prune.removed);
    }
    if report.interrupted {
        eprintln!(
            "{}",
            style("Interrupted: remaining datasets and media prune skipped").yellow()
        );
    }
}

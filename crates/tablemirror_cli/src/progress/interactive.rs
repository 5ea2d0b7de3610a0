use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tablemirror::sync::{SyncMode, SyncProgress};

const TICK: Duration = Duration::from_millis(100);

/// State for tracking one dataset.
struct DatasetState {
    bar: ProgressBar,
    done: bool,
}

/// Consolidated progress state to avoid multiple mutex locks.
#[derive(Default)]
struct ProgressState {
    /// Dataset bars by name.
    datasets: HashMap<String, DatasetState>,
    /// Dataset currently being synced.
    current: Option<String>,
    /// Single bar for attachment downloads.
    media_bar: Option<ProgressBar>,
    downloaded: usize,
    skipped: usize,
    bytes: u64,
}

impl ProgressState {
    fn current_bar(&self) -> Option<&ProgressBar> {
        self.current
            .as_ref()
            .and_then(|name| self.datasets.get(name))
            .filter(|d| !d.done)
            .map(|d| &d.bar)
    }
}

/// Interactive progress reporter using indicatif.
pub struct InteractiveReporter {
    multi: MultiProgress,
    state: Mutex<ProgressState>,
}

impl InteractiveReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            state: Mutex::new(ProgressState::default()),
        }
    }

    /// A reporter that draws nothing.
    #[cfg(test)]
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()),
            state: Mutex::new(ProgressState::default()),
        }
    }

    #[cfg(test)]
    pub fn dataset_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .datasets
            .len()
    }

    /// Create the media bar, below every dataset bar.
    fn media_bar(&self, state: &mut ProgressState) -> ProgressBar {
        if let Some(pb) = &state.media_bar {
            return pb.clone();
        }
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(Self::counter_style());
        pb.set_prefix(format!("{:12}", "Media"));
        pb.enable_steady_tick(TICK);
        state.media_bar = Some(pb.clone());
        pb
    }

    fn refresh_media_message(state: &ProgressState, pb: &ProgressBar) {
        pb.set_message(format!(
            "downloaded ({} skipped, {:.1} MB)",
            state.skipped,
            state.bytes as f64 / 1_000_000.0
        ));
    }

    pub fn handle(&self, event: SyncProgress) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        match event {
            SyncProgress::DatasetStarted { dataset } => {
                let bar = ProgressBar::new_spinner();
                let bar = match &state.media_bar {
                    Some(media) => self.multi.insert_before(media, bar),
                    None => self.multi.add(bar),
                };
                bar.set_style(Self::spinner_style());
                bar.enable_steady_tick(TICK);
                bar.set_prefix(format!("{:12}", dataset));
                bar.set_message("Checking previous output...");

                state.current = Some(dataset.clone());
                state.datasets.insert(
                    dataset,
                    DatasetState { bar, done: false },
                );
            }

            SyncProgress::DeltaFallback { reason, .. } => {
                if let Some(bar) = state.current_bar() {
                    bar.set_message(format!("Full sync ({})", reason));
                }
            }

            SyncProgress::FetchingRecords { filtered, .. } => {
                if let Some(bar) = state.current_bar() {
                    let msg = if filtered {
                        "Fetching changed records..."
                    } else {
                        "Fetching records..."
                    };
                    bar.set_message(msg);
                }
            }

            SyncProgress::FetchedPage {
                dataset,
                page,
                total_so_far,
                ..
            } => {
                if let Some(d) = state.datasets.get(&dataset) {
                    d.bar
                        .set_message(format!("Page {} ({} records)", page, total_so_far));
                }
            }

            SyncProgress::FetchComplete { dataset, total } => {
                if let Some(d) = state.datasets.get(&dataset) {
                    d.bar.set_message(format!("Fetched {} records, writing...", total));
                }
            }

            SyncProgress::FilterRejected { dataset, .. } => {
                if let Some(d) = state.datasets.get(&dataset) {
                    d.bar.set_message("Filter rejected, refetching...");
                }
            }

            SyncProgress::RateLimitBackoff {
                dataset,
                retry_after_ms,
                attempt,
            } => {
                if let Some(d) = state.datasets.get(&dataset) {
                    d.bar.set_message(format!(
                        "Rate limited (attempt {}), waiting {:.1}s...",
                        attempt,
                        retry_after_ms as f64 / 1000.0
                    ));
                }
            }

            SyncProgress::MediaDownloaded { bytes, .. } => {
                state.downloaded += 1;
                state.bytes += bytes;
                let pb = self.media_bar(&mut state);
                pb.inc(1);
                Self::refresh_media_message(&state, &pb);
            }

            SyncProgress::MediaSkipped { .. } => {
                state.skipped += 1;
                let pb = self.media_bar(&mut state);
                Self::refresh_media_message(&state, &pb);
            }

            SyncProgress::DownloadRetry {
                retry_after_ms,
                attempt,
                ..
            } => {
                let pb = self.media_bar(&mut state);
                pb.set_message(format!(
                    "retrying download (attempt {}) in {:.1}s...",
                    attempt,
                    retry_after_ms as f64 / 1000.0
                ));
            }

            SyncProgress::DatasetWritten {
                dataset,
                mode,
                records,
                changed,
            } => {
                if let Some(d) = state.datasets.get_mut(&dataset) {
                    d.done = true;
                    let msg = match mode {
                        SyncMode::Delta => {
                            format!("✓ {} rows ({} changed, delta)", records, changed)
                        }
                        SyncMode::Full => format!("✓ {} rows (full)", records),
                    };
                    d.bar.finish_with_message(msg);
                }
            }

            SyncProgress::PruneComplete { removed } => {
                let pb = self.media_bar(&mut state);
                let msg = format!(
                    "✓ {} downloaded, {} skipped, {} pruned",
                    state.downloaded, state.skipped, removed
                );
                pb.finish_with_message(msg);
            }

            SyncProgress::Warning { message } => {
                self.multi.println(format!("Warning: {}", message)).ok();
            }

            _ => {}
        }
    }

    pub fn finish(&self) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for dataset in state.datasets.values() {
            if !dataset.bar.is_finished() {
                dataset.bar.finish();
            }
        }
        if let Some(ref pb) = state.media_bar
            && !pb.is_finished()
        {
            pb.finish_with_message(format!(
                "✓ {} downloaded, {} skipped",
                state.downloaded, state.skipped
            ));
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.cyan} {spinner:.green} {msg}")
            .expect("Invalid template")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
    }

    fn counter_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.cyan} {spinner:.green} {pos:>4} {msg}")
            .expect("Invalid template")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
    }
}

impl Default for InteractiveReporter {
    fn default() -> Self {
        Self::new()
    }
}

//! Run-wide media bookkeeping shared by every dataset.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Global cap on the number of downloads in one run.
///
/// Slots are reserved before a download starts and refunded if it fails, so
/// concurrent downloads never overshoot the cap.
#[derive(Debug)]
pub struct DownloadBudget {
    remaining: AtomicUsize,
}

impl DownloadBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(limit),
        }
    }

    /// Reserve one download slot. Returns false when the budget is spent.
    pub fn try_reserve(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Give back a slot reserved for a download that did not complete.
    pub fn refund(&self) {
        self.remaining.fetch_add(1, Ordering::SeqCst);
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }
}

/// Media state accumulated across all datasets of a run.
///
/// The in-use set decides what the final prune keeps. Attachments left out
/// because the budget ran dry are counted so a dataset can tell its output
/// is incomplete.
#[derive(Debug, Default)]
pub struct SharedMediaState {
    in_use: Mutex<BTreeSet<String>>,
    budget: Option<DownloadBudget>,
    deferred: AtomicUsize,
}

impl SharedMediaState {
    /// Create state with an optional download budget.
    pub fn new(max_downloads: Option<usize>) -> Self {
        Self {
            in_use: Mutex::new(BTreeSet::new()),
            budget: max_downloads.map(DownloadBudget::new),
            deferred: AtomicUsize::new(0),
        }
    }

    /// Mark files as referenced by some dataset.
    pub fn mark_in_use<I, S>(&self, files: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut in_use = self.in_use.lock().unwrap_or_else(|e| e.into_inner());
        in_use.extend(files.into_iter().map(Into::into));
    }

    pub fn is_in_use(&self, file: &str) -> bool {
        self.in_use
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(file)
    }

    /// Copy of the in-use set.
    pub fn in_use(&self) -> BTreeSet<String> {
        self.in_use
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn budget(&self) -> Option<&DownloadBudget> {
        self.budget.as_ref()
    }

    /// Note an attachment omitted because the budget was spent.
    pub fn record_deferred(&self) {
        self.deferred.fetch_add(1, Ordering::SeqCst);
    }

    /// Attachments deferred so far in this run.
    pub fn deferred_count(&self) -> usize {
        self.deferred.load(Ordering::SeqCst)
    }
}

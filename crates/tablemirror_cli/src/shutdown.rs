use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use console::Term;

/// Request shutdown.
#[inline]
fn request_shutdown(flag: &AtomicBool) {
    flag.store(true, Ordering::Release);
}

/// Set up the Ctrl+C handler for graceful shutdown.
///
/// The first Ctrl+C sets the returned flag; the run finishes the current
/// dataset and skips the rest. A second Ctrl+C exits immediately.
pub(crate) fn setup_shutdown_handler() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }

        let is_tty = Term::stdout().is_term();
        if is_tty {
            eprintln!("\n\nShutdown requested, finishing current dataset...");
            eprintln!("Press Ctrl+C again to force quit.");
        } else {
            tracing::warn!("Shutdown requested, finishing current dataset");
        }

        request_shutdown(&handler_flag);

        // Wait for second Ctrl+C for force quit
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }

        if is_tty {
            eprintln!("Force quit!");
        }
        std::process::exit(130);
    });

    flag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shutdown_sets_flag() {
        let flag = AtomicBool::new(false);
        request_shutdown(&flag);
        assert!(flag.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_handler_starts_unset() {
        let flag = setup_shutdown_handler();
        assert!(!flag.load(Ordering::Acquire));
    }
}

//! Shutdown coordination.

use super::PortalScraper;
use crate::types::Event;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// How long shutdown waits for a cancelled run to record its outcome
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

impl PortalScraper {
    /// Shut down the scraper
    ///
    /// This method performs the shutdown sequence:
    /// 1. Stops accepting new runs (they fail with `ShuttingDown`)
    /// 2. Cancels the in-flight run, if any
    /// 3. Waits (bounded) for that run to release the run lock
    /// 4. Emits [`Event::Shutdown`]
    ///
    /// The retained snapshot stays readable afterwards.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating shutdown");

        self.control.accepting_new.store(false, Ordering::SeqCst);
        self.control.shutdown_token.cancel();

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.control.run_lock.lock()).await {
            Ok(_guard) => tracing::debug!("no scrape run in flight"),
            Err(_) => tracing::warn!("Timeout waiting for scrape run to stop, proceeding with shutdown"),
        }

        self.emit_event(Event::Shutdown);

        // The connection pool closes when the last Arc<Database> is dropped
        tracing::info!("Shutdown complete");
    }

    /// Whether `shutdown()` has been called
    pub fn is_shut_down(&self) -> bool {
        !self.control.accepting_new.load(Ordering::SeqCst)
    }
}

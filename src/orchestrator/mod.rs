//! Scrape orchestrator split into focused submodules.
//!
//! The `PortalScraper` struct and its methods are organized by concern:
//! - [`run`] - Single-flight entry points and the run state machine
//! - [`merge`] - Combining parsed pages into one snapshot
//! - [`health`] - Health classification of the retained snapshot
//! - [`lifecycle`] - Shutdown coordination

mod health;
mod lifecycle;
mod merge;
mod run;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use health::classify_health;

use crate::client::PortalClient;
use crate::config::Config;
use crate::db::Database;
use crate::error::{Result, ScrapeError};
use crate::fetch::FetchEngine;
use crate::parser::TableParser;
use crate::session::SessionManager;
use crate::types::{Event, RunReport, RunState, Snapshot};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

/// Result of a run as seen by callers joining it
pub type RunResult = std::result::Result<RunReport, ScrapeError>;

/// Receiver that resolves once the in-flight run finishes
type InFlight = watch::Receiver<Option<RunResult>>;

/// Single-flight and cancellation state
#[derive(Clone)]
pub(crate) struct RunControl {
    /// Held for the whole duration of a run
    pub(crate) run_lock: Arc<tokio::sync::Mutex<()>>,
    /// Result channel of the in-flight run; `Some` exactly while `run_lock` is held
    pub(crate) in_flight: Arc<std::sync::Mutex<Option<InFlight>>>,
    /// Last assigned run id (seeded from the history table)
    pub(crate) last_run_id: Arc<AtomicI64>,
    /// Cleared by `shutdown()`
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Parent of every run's cancellation token
    pub(crate) shutdown_token: CancellationToken,
}

/// Published state readers observe
#[derive(Clone)]
pub(crate) struct Published {
    /// Most recent successful snapshot, replaced whole
    pub(crate) snapshot: Arc<watch::Sender<Option<Arc<Snapshot>>>>,
    /// Current state machine position
    pub(crate) state: Arc<watch::Sender<RunState>>,
}

/// Main scraper instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct PortalScraper {
    /// Database for the session and run history
    pub(crate) db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Shared session owner
    pub(crate) sessions: Arc<SessionManager>,
    /// Page retrieval
    pub(crate) fetcher: Arc<FetchEngine>,
    /// Markup to records
    pub(crate) parser: Arc<TableParser>,
    /// Single-flight and cancellation state
    pub(crate) control: RunControl,
    /// Snapshot and state publication
    pub(crate) published: Published,
}

impl PortalScraper {
    /// Create a new PortalScraper instance
    ///
    /// This initializes all core components:
    /// - Validates the configuration
    /// - Opens/creates the SQLite database and runs migrations
    /// - Builds the portal HTTP client
    /// - Sets up the event broadcast channel
    ///
    /// The persisted session is loaded lazily by the first run.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let last_run_id = db.max_run_id().await?;

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = broadcast::channel(1000);

        let client = PortalClient::new(&config.portal)?;
        let sessions = Arc::new(SessionManager::new(
            client.clone(),
            db.clone(),
            &config,
            event_tx.clone(),
        ));
        let fetcher = Arc::new(FetchEngine::new(client, sessions.clone(), &config));
        let parser = Arc::new(TableParser::new(&config.calibration));

        let (snapshot_tx, _) = watch::channel(None);
        let (state_tx, _) = watch::channel(RunState::Idle);

        tracing::info!(
            base_url = %config.portal.base_url,
            pages = config.pages.len(),
            last_run_id,
            "portal scraper initialized"
        );

        Ok(Self {
            db,
            event_tx,
            config: Arc::new(config),
            sessions,
            fetcher,
            parser,
            control: RunControl {
                run_lock: Arc::new(tokio::sync::Mutex::new(())),
                in_flight: Arc::new(std::sync::Mutex::new(None)),
                last_run_id: Arc::new(AtomicI64::new(last_run_id)),
                accepting_new: Arc::new(AtomicBool::new(true)),
                shutdown_token: CancellationToken::new(),
            },
            published: Published {
                snapshot: Arc::new(snapshot_tx),
                state: Arc::new(state_tx),
            },
        })
    }

    /// Subscribe to lifecycle events
    ///
    /// Each subscriber receives all events independently. Slow subscribers
    /// that fall more than 1000 events behind see `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Current state machine position
    pub fn state(&self) -> RunState {
        *self.published.state.borrow()
    }

    /// Most recent successful snapshot, if any run has succeeded since startup
    pub fn latest_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.published.snapshot.borrow().clone()
    }

    /// Receiver notified each time a new snapshot is published
    pub fn watch_snapshot(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.published.snapshot.subscribe()
    }

    /// The session manager shared by all runs
    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Force the next run to log in again
    pub async fn invalidate_session(&self) {
        self.sessions.invalidate().await;
    }

    /// Recorded runs, newest first
    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<crate::types::RunRecord>> {
        self.db.recent_runs(limit).await
    }

    /// Whether a run is currently in flight
    pub fn is_running(&self) -> bool {
        self.control.run_lock.try_lock().is_err()
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // No subscribers is fine
        self.event_tx.send(event).ok();
    }
}

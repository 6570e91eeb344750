//! # calwatch
//!
//! Session-keeping scraper core for a login-gated equipment calibration portal.
//!
//! ## Design Philosophy
//!
//! calwatch is designed to be:
//! - **Unattended** - One login is reused across runs and renewed only when the portal rejects it
//! - **Tolerant** - A bad row or a failed page degrades the snapshot instead of discarding it
//! - **Library-first** - No CLI, no web server, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events or watch the snapshot, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use calwatch::{Config, Credentials, PortalScraper};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.portal.base_url = "https://portal.example.com".to_string();
//!
//!     let scraper = PortalScraper::new(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = scraper.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = scraper.run(&Credentials::new("user", "pass")).await?;
//!     println!(
//!         "run {} finished, {} page(s) failed, partial: {}",
//!         report.run_id,
//!         report.failures.len(),
//!         report.is_partial()
//!     );
//!
//!     if let Some(snapshot) = scraper.latest_snapshot() {
//!         println!("{} instruments", snapshot.instruments.len());
//!     }
//!
//!     scraper.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Portal HTTP client
pub mod client;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Page retrieval with retry and re-login
pub mod fetch;
/// Run sequencing, single-flight and snapshot publication
pub mod orchestrator;
/// HTML table extraction
pub mod parser;
/// Retry logic with exponential backoff
pub mod retry;
/// Portal session and login protocol
pub mod session;
/// Core types and events
pub mod types;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test_helpers;

// Re-export commonly used types
pub use config::{Config, PageConfig};
pub use db::Database;
pub use error::{
    AuthError, Error, FetchError, FetchErrorKind, PageError, PageFailure, ParseError, Result,
    RowError, ScrapeError,
};
pub use fetch::{FetchEngine, FetchOutcome};
pub use orchestrator::{PortalScraper, RunResult, classify_health};
pub use parser::{ParsedPage, TableParser};
pub use session::{CookieEntry, CookieJar, Session, SessionManager};
pub use types::{
    CalibrationStatus, Credentials, DockingStationRecord, EquipmentRecord, Event, FailureKind,
    HealthReport, HealthStatus, PageKey, PageKind, RunId, RunOutcome, RunRecord, RunReport,
    RunState, Snapshot,
};

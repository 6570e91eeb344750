//! Database layer for calwatch
//!
//! Handles SQLite persistence for the portal session and the run history.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`session`] — The single persisted portal session
//! - [`runs`] — Run history

use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod runs;
mod session;

/// Persisted session row (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub(crate) struct SessionRow {
    /// Cookie jar as JSON
    pub cookies: String,
    /// Freshness flag (0/1)
    pub fresh: i64,
    /// Session generation
    pub generation: i64,
    /// Unix timestamp of the login that produced the session
    pub logged_in_at: Option<i64>,
}

/// Run history row (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub(crate) struct RunRow {
    pub id: i64,
    pub started_at: i64,
    pub finished_at: i64,
    pub outcome: String,
    pub instruments: i64,
    pub docking_stations: i64,
    pub pages_failed: i64,
    pub rows_skipped: i64,
    pub logged_in: i64,
    pub error: Option<String>,
}

/// SQLite-backed store
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

//! Error types for calwatch
//!
//! This module provides the error taxonomy for the scraping core:
//! - [`AuthError`] - login against the portal failed
//! - [`FetchError`] - a page could not be retrieved (network, auth, unexpected status)
//! - [`ParseError`] / [`RowError`] - page-level and row-level table extraction failures
//! - [`ScrapeError`] - the aggregate outcome of a failed run
//! - [`Error`] - crate-level error for construction and persistence
//!
//! Domain errors carry string payloads rather than wrapping `reqwest`/`sqlx`
//! errors so they stay `Clone` and can be handed to every caller joined on a run.

use crate::types::PageKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for calwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for calwatch
///
/// Returned by constructors and persistence operations. Run-level failures are
/// reported through [`ScrapeError`] instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "portal.base_url")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Network error while building or using the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored value could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Login against the portal failed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AuthError {
    /// The portal answered but rejected the credentials (still on the login page)
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The login endpoint could not be reached or answered with something unusable
    #[error("portal unreachable: {0}")]
    Unreachable(String),
}

impl AuthError {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::Unreachable(_) => "portal_unreachable",
        }
    }
}

/// Terminal failure category of a page fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Connection error, timeout, or 5xx after all retries
    Network,
    /// Authentication failed even after a fresh login
    Auth,
    /// The portal answered with a status we do not handle
    UnexpectedStatus,
    /// The configured page path does not form a valid URL
    Config,
}

/// A page could not be retrieved
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FetchError {
    /// Connection-level failure (refused, reset, timeout)
    #[error("network error fetching {url}: {message}")]
    Network {
        /// Requested URL
        url: String,
        /// Underlying transport error
        message: String,
        /// Whether the failure was a timeout
        timeout: bool,
    },

    /// Portal returned a server error (5xx)
    #[error("server error {status} fetching {url}")]
    ServerError {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Session was rejected again right after a successful re-login
    #[error("authentication failed fetching {url}: {reason}")]
    Auth {
        /// Requested URL
        url: String,
        /// Why authentication could not be restored
        reason: String,
    },

    /// The re-login triggered by an expired session failed
    ///
    /// Fatal for the whole run: the orchestrator stops fetching and reports
    /// the login failure.
    #[error("re-login failed fetching {url}: {error}")]
    Login {
        /// Requested URL
        url: String,
        /// The login failure
        error: AuthError,
    },

    /// The page path cannot be resolved against the portal base URL
    #[error("invalid page URL '{url}': {message}")]
    InvalidUrl {
        /// Configured page path
        url: String,
        /// Parse failure
        message: String,
    },

    /// Portal returned a non-success status that is not worth retrying
    #[error("unexpected status {status} fetching {url}")]
    UnexpectedStatus {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },
}

impl FetchError {
    /// Terminal category of this error
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Network { .. } | FetchError::ServerError { .. } => FetchErrorKind::Network,
            FetchError::Auth { .. } | FetchError::Login { .. } => FetchErrorKind::Auth,
            FetchError::UnexpectedStatus { .. } => FetchErrorKind::UnexpectedStatus,
            FetchError::InvalidUrl { .. } => FetchErrorKind::Config,
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            FetchError::Network { timeout: true, .. } => "fetch_timeout",
            FetchError::Network { .. } => "fetch_network_error",
            FetchError::ServerError { .. } => "fetch_server_error",
            FetchError::Auth { .. } => "fetch_auth_rejected",
            FetchError::Login { error, .. } => error.error_code(),
            FetchError::UnexpectedStatus { .. } => "fetch_unexpected_status",
            FetchError::InvalidUrl { .. } => "invalid_page_url",
        }
    }

    /// The login failure, when this error came from a failed re-login
    pub fn login_failure(&self) -> Option<&AuthError> {
        match self {
            FetchError::Login { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Build a network error from a reqwest transport failure
    pub(crate) fn from_transport(url: &str, error: &reqwest::Error) -> Self {
        FetchError::Network {
            url: url.to_string(),
            message: error.to_string(),
            timeout: error.is_timeout(),
        }
    }
}

/// Page-level parse failure: the page contributes nothing to the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ParseError {
    /// Neither the table id nor the heading anchor matched anything
    #[error("table '{anchor}' not found")]
    TableNotFound {
        /// The anchor that was searched for
        anchor: String,
    },

    /// The table has no recognizable header row
    #[error("header row not found in table '{anchor}'")]
    HeaderRowNotFound {
        /// The anchor of the table
        anchor: String,
    },

    /// A column the record type cannot do without is absent
    #[error("required column '{column}' missing")]
    MissingColumn {
        /// Canonical name of the missing column
        column: String,
    },
}

impl ParseError {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            ParseError::TableNotFound { .. } => "table_not_found",
            ParseError::HeaderRowNotFound { .. } => "header_row_not_found",
            ParseError::MissingColumn { .. } => "missing_column",
        }
    }
}

/// Row-level parse failure: the row is skipped and counted
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RowError {
    /// Row cell count does not match the header
    #[error("row {row}: expected {expected} cells, found {found}")]
    CellCountMismatch {
        /// Zero-based data row index
        row: usize,
        /// Number of header columns
        expected: usize,
        /// Number of cells in the row
        found: usize,
    },

    /// Identity column is empty
    #[error("row {row}: empty serial number")]
    MissingSerial {
        /// Zero-based data row index
        row: usize,
    },

    /// Category cell names something this page kind does not route
    #[error("row {row}: unrecognized category '{category}'")]
    UnknownCategory {
        /// Zero-based data row index
        row: usize,
        /// Raw category text
        category: String,
    },
}

impl RowError {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            RowError::CellCountMismatch { .. } => "cell_count_mismatch",
            RowError::MissingSerial { .. } => "missing_serial",
            RowError::UnknownCategory { .. } => "unknown_category",
        }
    }
}

/// A page that did not contribute to the snapshot, and why
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "stage", content = "error", rename_all = "snake_case")]
pub enum PageError {
    /// Retrieval failed
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Retrieval succeeded but the table could not be read
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl PageError {
    /// Machine-readable error code of the underlying failure
    pub fn error_code(&self) -> &'static str {
        match self {
            PageError::Fetch(e) => e.error_code(),
            PageError::Parse(e) => e.error_code(),
        }
    }
}

/// A failed page together with its key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFailure {
    /// Which page failed
    pub page: PageKey,
    /// What went wrong
    pub error: PageError,
}

/// A run produced no snapshot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScrapeError {
    /// Login failed, at the start of the run or while renewing an expired session
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Every configured page failed
    #[error("all {} pages failed", failures.len())]
    AllPagesFailed {
        /// One entry per configured page
        failures: Vec<PageFailure>,
    },

    /// No target pages are configured
    #[error("no pages configured")]
    NoPagesConfigured,

    /// Another run is in flight and the caller asked not to wait
    #[error("a scrape run is already in progress")]
    AlreadyRunning,

    /// The run was cancelled by the caller
    #[error("scrape run cancelled")]
    Cancelled,

    /// The run exceeded the configured deadline
    #[error("scrape run timed out")]
    TimedOut,

    /// The scraper is shutting down
    #[error("shutdown in progress: not accepting new runs")]
    ShuttingDown,
}

impl ScrapeError {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            ScrapeError::Auth(e) => e.error_code(),
            ScrapeError::AllPagesFailed { .. } => "all_pages_failed",
            ScrapeError::NoPagesConfigured => "no_pages_configured",
            ScrapeError::AlreadyRunning => "already_running",
            ScrapeError::Cancelled => "cancelled",
            ScrapeError::TimedOut => "timed_out",
            ScrapeError::ShuttingDown => "shutting_down",
        }
    }
}

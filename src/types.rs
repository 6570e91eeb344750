//! Core types for calwatch

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PageFailure, ScrapeError};

/// Unique identifier for a scrape run
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub i64);

impl RunId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for RunId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Stored as INTEGER in run_history
impl sqlx::Type<sqlx::Sqlite> for RunId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for RunId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for RunId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Identifies a target page (and so the table it represents)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageKey(String);

impl PageKey {
    /// Create a page key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the key text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PageKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl std::fmt::Display for PageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which records a page's table holds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    /// Every row is an instrument
    Instruments,
    /// Every row is a docking station
    DockingStations,
    /// Mixed grid; each row is routed by its `Category` cell
    #[default]
    Equipment,
}

/// Portal login credentials
///
/// Supplied per run and never persisted. `Debug` redacts the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Portal username
    pub username: String,
    /// Portal password
    pub password: String,
}

impl Credentials {
    /// Create credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where a page's table sits in the markup
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableAnchor {
    /// HTML id of the table
    pub table_id: Option<String>,
    /// Text of the heading preceding the table
    pub heading: Option<String>,
}

impl std::fmt::Display for TableAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.table_id, &self.heading) {
            (Some(id), Some(heading)) => write!(f, "#{id} / \"{heading}\""),
            (Some(id), None) => write!(f, "#{id}"),
            (None, Some(heading)) => write!(f, "\"{heading}\""),
            (None, None) => f.write_str("<none>"),
        }
    }
}

/// A retrieved page, consumed by the parser and then dropped
#[derive(Clone, Debug)]
pub struct RawPage {
    /// Which page this is
    pub key: PageKey,
    /// Which records its table holds
    pub kind: PageKind,
    /// Where its table sits
    pub anchor: TableAnchor,
    /// URL that was fetched
    pub url: String,
    /// HTTP status of the final response
    pub status: u16,
    /// Response body
    pub body: String,
    /// When the response arrived
    pub fetched_at: DateTime<Utc>,
}

/// A cell value, or an explicit marker for a column the row did not provide
///
/// Serialized as the plain string, with `NotAvailable` rendered as `"N/A"`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldValue {
    /// Non-empty cell text
    Value(String),
    /// Column absent or cell empty
    #[default]
    NotAvailable,
}

impl FieldValue {
    /// Marker text used for missing values
    pub const NOT_AVAILABLE: &'static str = "N/A";

    /// Build from normalized cell text; empty text is `NotAvailable`
    pub fn from_cell(text: &str) -> Self {
        if text.is_empty() {
            FieldValue::NotAvailable
        } else {
            FieldValue::Value(text.to_string())
        }
    }

    /// The value, if present
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Value(v) => Some(v),
            FieldValue::NotAvailable => None,
        }
    }

    /// Display text, with the marker for missing values
    pub fn display(&self) -> &str {
        self.as_str().unwrap_or(Self::NOT_AVAILABLE)
    }

    /// Whether a value is present
    pub fn is_available(&self) -> bool {
        matches!(self, FieldValue::Value(_))
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display())
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.display())
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        if text == Self::NOT_AVAILABLE {
            Ok(FieldValue::NotAvailable)
        } else {
            Ok(FieldValue::from_cell(&text))
        }
    }
}

/// Rough reading of the portal's free-form upgrade column
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeHint {
    /// Blank cell
    Empty,
    /// "No"
    No,
    /// Starts with "Yes" (e.g. "YesPending", "Yes - Pending")
    YesPending,
    /// Anything else
    Other,
}

/// Upgrade-availability text, kept verbatim
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpgradeText(pub String);

impl UpgradeText {
    /// Classify the text by its observed prefixes
    pub fn classify(&self) -> UpgradeHint {
        let text = self.0.trim();
        if text.is_empty() || text == FieldValue::NOT_AVAILABLE {
            UpgradeHint::Empty
        } else if text.eq_ignore_ascii_case("no") {
            UpgradeHint::No
        } else if text.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("yes")) {
            UpgradeHint::YesPending
        } else {
            UpgradeHint::Other
        }
    }
}

/// Calibration urgency derived from days until the next calibration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationStatus {
    /// More than the warning window away, or date unknown
    #[default]
    Ok,
    /// Due within the warning window
    Warning,
    /// Overdue
    Danger,
}

impl CalibrationStatus {
    /// Status for a signed day count
    pub fn from_days(days_until: i64, warning_days: i64) -> Self {
        if days_until < 0 {
            CalibrationStatus::Danger
        } else if days_until <= warning_days {
            CalibrationStatus::Warning
        } else {
            CalibrationStatus::Ok
        }
    }
}

/// One instrument row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentRecord {
    /// Serial number (identity)
    pub serial: String,
    /// Equipment group name
    pub group: FieldValue,
    /// Instrument type
    #[serde(rename = "type")]
    pub equipment_type: FieldValue,
    /// Last calibration date as shown
    pub last_calibration: FieldValue,
    /// Next calibration date as shown
    pub next_calibration: FieldValue,
    /// Parsed next calibration date, if it parsed
    pub next_calibration_at: Option<NaiveDateTime>,
    /// Upgrade-availability text
    pub upgrade: UpgradeText,
    /// Derived urgency
    pub calibration_status: CalibrationStatus,
    /// Whole days until next calibration (negative when overdue)
    pub days_until: Option<i64>,
    /// Columns without a dedicated field, by header text
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, FieldValue>,
}

/// One gas inlet on a docking station
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasInlet {
    /// Inlet number (1-based)
    pub index: u8,
    /// Gas name
    pub name: FieldValue,
    /// Cylinder pressure
    pub pressure: FieldValue,
}

/// One docking station row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockingStationRecord {
    /// Serial / equipment number (identity)
    pub serial: String,
    /// Station type
    #[serde(rename = "type")]
    pub station_type: FieldValue,
    /// Last known state
    pub state: FieldValue,
    /// Serial of the instrument currently docked
    pub docked_serial: FieldValue,
    /// Group of the docked instrument, when it is in the same snapshot
    pub docked_group: Option<String>,
    /// Up to six gas inlets, in inlet order
    pub gas_inlets: Vec<GasInlet>,
    /// Columns without a dedicated field, by header text
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, FieldValue>,
}

/// A parsed row
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageRecord {
    /// Instrument row
    Instrument(EquipmentRecord),
    /// Docking station row
    DockingStation(DockingStationRecord),
}

/// The complete result of one successful run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// When the run finished parsing
    pub taken_at: DateTime<Utc>,
    /// All instruments, sorted by (group, type, serial)
    pub instruments: Vec<EquipmentRecord>,
    /// All docking stations, sorted by (type, serial)
    pub docking_stations: Vec<DockingStationRecord>,
}

impl Snapshot {
    /// Whether the snapshot holds any records
    pub fn has_equipment_data(&self) -> bool {
        !self.instruments.is_empty() || !self.docking_stations.is_empty()
    }

    /// Look up an instrument by serial number
    pub fn instrument(&self, serial: &str) -> Option<&EquipmentRecord> {
        self.instruments.iter().find(|r| r.serial == serial)
    }
}

/// Why a run ended in `Failed`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Login failed
    Auth,
    /// Every page failed
    AllPagesFailed,
    /// Nothing to fetch
    NoPagesConfigured,
    /// Cancelled by the caller or by shutdown
    Cancelled,
    /// Deadline exceeded
    TimedOut,
}

impl FailureKind {
    /// Failure kind for a run error; `None` for errors that never start a run
    pub fn from_error(error: &ScrapeError) -> Option<Self> {
        match error {
            ScrapeError::Auth(_) => Some(FailureKind::Auth),
            ScrapeError::AllPagesFailed { .. } => Some(FailureKind::AllPagesFailed),
            ScrapeError::NoPagesConfigured => Some(FailureKind::NoPagesConfigured),
            ScrapeError::Cancelled | ScrapeError::ShuttingDown => Some(FailureKind::Cancelled),
            ScrapeError::TimedOut => Some(FailureKind::TimedOut),
            ScrapeError::AlreadyRunning => None,
        }
    }
}

/// Orchestrator state machine position
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "kind", rename_all = "snake_case")]
pub enum RunState {
    /// No run in flight
    #[default]
    Idle,
    /// Obtaining a session
    Authenticating,
    /// Fetching pages
    Fetching,
    /// Parsing fetched pages
    Parsing,
    /// Snapshot published
    Merged,
    /// Run failed
    Failed(FailureKind),
}

/// Per-page outcome of a successful page
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageReport {
    /// Which page
    pub page: PageKey,
    /// Records contributed
    pub records: usize,
    /// Rows skipped with a row error
    pub rows_skipped: usize,
}

/// Diagnostic result of a run that published a snapshot
#[derive(Clone, Debug)]
pub struct RunReport {
    /// Run identifier
    pub run_id: RunId,
    /// The published snapshot
    pub snapshot: Arc<Snapshot>,
    /// Pages that contributed
    pub pages: Vec<PageReport>,
    /// Pages that did not
    pub failures: Vec<PageFailure>,
    /// Rows skipped across all pages
    pub rows_skipped: usize,
    /// Instrument or station rows dropped for a repeated serial
    pub duplicates_dropped: usize,
    /// Whether a real login happened during the run
    pub logged_in: bool,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

impl RunReport {
    /// True when at least one page failed
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// How a recorded run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// All pages contributed
    Success,
    /// Some pages failed
    Partial,
    /// No snapshot
    Failed,
    /// Cancelled or timed out
    Cancelled,
}

impl RunOutcome {
    /// Storage text
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Partial => "partial",
            RunOutcome::Failed => "failed",
            RunOutcome::Cancelled => "cancelled",
        }
    }

    /// Parse storage text; unknown text reads as `Failed`
    pub fn from_str_lossy(text: &str) -> Self {
        match text {
            "success" => RunOutcome::Success,
            "partial" => RunOutcome::Partial,
            "cancelled" => RunOutcome::Cancelled,
            _ => RunOutcome::Failed,
        }
    }
}

/// A finished run as stored in the history table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier
    pub id: RunId,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
    /// How it ended
    pub outcome: RunOutcome,
    /// Instruments in the published snapshot
    pub instruments: i64,
    /// Docking stations in the published snapshot
    pub docking_stations: i64,
    /// Pages that failed
    pub pages_failed: i64,
    /// Rows skipped
    pub rows_skipped: i64,
    /// Whether a login happened
    pub logged_in: bool,
    /// Error message for failed/cancelled runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Health classification of the retained snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// No snapshot since process start
    NoData,
    /// Snapshot older than the update frequency plus margin
    Stale,
    /// Snapshot is recent
    Healthy,
}

/// Health summary for a health-check endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Classification
    pub status: HealthStatus,
    /// Whether the retained snapshot holds any records
    pub has_equipment_data: bool,
    /// When the retained snapshot was taken
    pub last_update: Option<DateTime<Utc>>,
    /// Age of the retained snapshot in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_secs: Option<u64>,
    /// Current orchestrator state
    pub state: RunState,
}

/// Lifecycle events emitted through [`subscribe`](crate::PortalScraper::subscribe)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run began
    RunStarted {
        /// Run ID
        run_id: RunId,
        /// Number of target pages
        pages: usize,
    },

    /// The orchestrator moved to a new state
    StateChanged {
        /// Run ID
        run_id: RunId,
        /// New state
        state: RunState,
    },

    /// A real login completed
    LoggedIn {
        /// Generation of the new session
        generation: u64,
    },

    /// The session was marked stale
    SessionInvalidated {
        /// Generation that was invalidated
        generation: u64,
    },

    /// A page was fetched
    PageFetched {
        /// Run ID
        run_id: RunId,
        /// Page key
        page: PageKey,
        /// HTTP status
        status: u16,
    },

    /// A page contributed nothing
    PageFailed {
        /// Run ID
        run_id: RunId,
        /// Page key
        page: PageKey,
        /// Error message
        error: String,
    },

    /// A new snapshot replaced the retained one
    SnapshotPublished {
        /// Run ID
        run_id: RunId,
        /// Instrument count
        instruments: usize,
        /// Docking station count
        docking_stations: usize,
        /// Whether some pages failed
        partial: bool,
    },

    /// A run ended without a snapshot
    RunFailed {
        /// Run ID
        run_id: RunId,
        /// Machine-readable error code
        code: String,
        /// Error message
        error: String,
    },

    /// A run was cancelled or timed out
    RunCancelled {
        /// Run ID
        run_id: RunId,
    },

    /// Shutdown was requested
    Shutdown,
}

//! Configuration types for calwatch

use crate::types::{PageKey, PageKind};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf, time::Duration};

/// Portal connection and login form settings
///
/// Field names default to the ASP.NET WebForms control names the portal
/// renders on its login page.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Base URL of the portal, e.g. "https://portal.example.com"
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Login page path, relative to `base_url`
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Form field that receives the username
    #[serde(default = "default_username_field")]
    pub username_field: String,

    /// Form field that receives the password
    ///
    /// Its presence in a response body is also the "still on the login page"
    /// signature used to detect rejected credentials and expired sessions.
    #[serde(default = "default_password_field")]
    pub password_field: String,

    /// Submit button name, sent as `name=name` when set
    #[serde(default = "default_submit_button")]
    pub submit_button: Option<String>,

    /// Cookies seeded into every fresh jar (load balancer affinity etc.)
    #[serde(default)]
    pub extra_cookies: BTreeMap<String, String>,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Skip TLS certificate verification (default: false)
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            login_path: default_login_path(),
            username_field: default_username_field(),
            password_field: default_password_field(),
            submit_button: default_submit_button(),
            extra_cookies: BTreeMap::new(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            accept_invalid_certs: false,
        }
    }
}

/// A target page and how to read its table
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageConfig {
    /// Identifying key, unique across pages
    pub key: PageKey,

    /// Page path, relative to the portal base URL
    pub path: String,

    /// Which records the page's table holds
    #[serde(default)]
    pub kind: PageKind,

    /// HTML id of the target table
    #[serde(default = "default_table_id")]
    pub table_id: Option<String>,

    /// Heading text preceding the table, used when the id does not match
    #[serde(default)]
    pub heading: Option<String>,
}

impl PageConfig {
    /// Page with the portal's default grid id
    pub fn new(key: impl Into<String>, path: impl Into<String>, kind: PageKind) -> Self {
        Self {
            key: PageKey::new(key),
            path: path.into(),
            kind,
            table_id: default_table_id(),
            heading: None,
        }
    }
}

/// Fetch concurrency settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum concurrent page fetches within a run (default: 3)
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Session lifetime settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Treat a persisted session older than this as expired (default: 12 hours)
    ///
    /// `None` trusts the session until the portal rejects it.
    #[serde(default = "default_session_max_age", with = "optional_duration_serde")]
    pub max_age: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age: default_session_max_age(),
        }
    }
}

/// Calibration status derivation settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Days-until threshold at or below which a unit is `warning` (default: 10)
    #[serde(default = "default_warning_days")]
    pub warning_days: i64,

    /// chrono format strings tried in order for calibration dates
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            warning_days: default_warning_days(),
            date_formats: default_date_formats(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./calwatch.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Health classification thresholds
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthConfig {
    /// How often the external scheduler triggers runs (default: 60 minutes)
    #[serde(default = "default_update_frequency", with = "duration_serde")]
    pub update_frequency: Duration,

    /// Grace period on top of `update_frequency` before data is stale (default: 10 minutes)
    #[serde(default = "default_stale_margin", with = "duration_serde")]
    pub stale_margin: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            update_frequency: default_update_frequency(),
            stale_margin: default_stale_margin(),
        }
    }
}

/// Main configuration for PortalScraper
///
/// Fields are organized into sub-configs:
/// - [`portal`](PortalConfig) — base URL, login form, HTTP client settings
/// - [`pages`](PageConfig) — target pages and their tables
/// - [`fetch`](FetchConfig) / [`retry`](RetryConfig) — concurrency and backoff
/// - [`session`](SessionConfig) / [`calibration`](CalibrationConfig) — lifetimes and thresholds
/// - [`persistence`](PersistenceConfig) / [`health`](HealthConfig) — storage and health reporting
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Portal connection and login form
    #[serde(default)]
    pub portal: PortalConfig,

    /// Pages scraped on every run
    #[serde(default = "default_pages")]
    pub pages: Vec<PageConfig>,

    /// Fetch concurrency
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Transient failure retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Session lifetime
    #[serde(default)]
    pub session: SessionConfig,

    /// Calibration status derivation
    #[serde(default)]
    pub calibration: CalibrationConfig,

    /// Database location
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Health thresholds
    #[serde(default)]
    pub health: HealthConfig,

    /// Upper bound on a whole run (None = unbounded)
    #[serde(default, with = "optional_duration_serde")]
    pub run_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            portal: PortalConfig::default(),
            pages: default_pages(),
            fetch: FetchConfig::default(),
            retry: RetryConfig::default(),
            session: SessionConfig::default(),
            calibration: CalibrationConfig::default(),
            persistence: PersistenceConfig::default(),
            health: HealthConfig::default(),
            run_timeout: None,
        }
    }
}

impl Config {
    /// Check settings that would otherwise fail confusingly at run time
    pub fn validate(&self) -> crate::Result<()> {
        url::Url::parse(&self.portal.base_url).map_err(|e| crate::Error::Config {
            message: format!("invalid base URL '{}': {}", self.portal.base_url, e),
            key: Some("portal.base_url".into()),
        })?;

        if self.fetch.max_concurrent_fetches == 0 {
            return Err(crate::Error::Config {
                message: "max_concurrent_fetches must be at least 1".into(),
                key: Some("fetch.max_concurrent_fetches".into()),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for page in &self.pages {
            if !seen.insert(page.key.as_str()) {
                return Err(crate::Error::Config {
                    message: format!("duplicate page key '{}'", page.key),
                    key: Some("pages".into()),
                });
            }
            if page.table_id.is_none() && page.heading.is_none() {
                return Err(crate::Error::Config {
                    message: format!("page '{}' needs a table_id or a heading", page.key),
                    key: Some("pages".into()),
                });
            }
        }

        Ok(())
    }
}

// Default value functions
fn default_base_url() -> String {
    "https://inet.indsci.com".into()
}

fn default_login_path() -> String {
    "/Login.aspx".into()
}

fn default_username_field() -> String {
    "ctl00$cph1$main$Login1$UserName".into()
}

fn default_password_field() -> String {
    "ctl00$cph1$main$Login1$Password".into()
}

fn default_submit_button() -> Option<String> {
    Some("ctl00$cph1$main$Login1$LoginButton".into())
}

fn default_user_agent() -> String {
    concat!("calwatch/", env!("CARGO_PKG_VERSION")).into()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_table_id() -> Option<String> {
    Some("ctl00_ctl00_ctl00_cph1_main_dr_Grid_DXMainTable".into())
}

fn default_pages() -> Vec<PageConfig> {
    vec![PageConfig::new(
        "equipment",
        "/Dashboard/EquipmentList.aspx",
        PageKind::Equipment,
    )]
}

fn default_max_concurrent_fetches() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_session_max_age() -> Option<Duration> {
    Some(Duration::from_secs(12 * 60 * 60))
}

fn default_warning_days() -> i64 {
    10
}

fn default_date_formats() -> Vec<String> {
    [
        "%m/%d/%Y %I:%M %p",
        "%m/%d/%Y %H:%M",
        "%m/%d/%Y",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%d",
        "%d/%m/%Y %I:%M %p",
        "%d/%m/%Y",
        "%m-%d-%Y",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("calwatch.db")
}

fn default_update_frequency() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_stale_margin() -> Duration {
    Duration::from_secs(10 * 60)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

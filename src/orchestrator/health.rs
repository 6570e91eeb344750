//! Health classification of the retained snapshot.

use super::PortalScraper;
use crate::config::HealthConfig;
use crate::types::{HealthReport, HealthStatus, RunState, Snapshot};
use chrono::{DateTime, Utc};

/// Classify `snapshot` as of `now`
///
/// Stale once its age exceeds `update_frequency + stale_margin`.
pub fn classify_health(
    snapshot: Option<&Snapshot>,
    now: DateTime<Utc>,
    config: &HealthConfig,
    state: RunState,
) -> HealthReport {
    let Some(snapshot) = snapshot else {
        return HealthReport {
            status: HealthStatus::NoData,
            has_equipment_data: false,
            last_update: None,
            age_secs: None,
            state,
        };
    };

    // A clock step backwards reads as age zero
    let age = (now - snapshot.taken_at).to_std().unwrap_or_default();
    let threshold = config.update_frequency + config.stale_margin;
    let status = if age > threshold {
        HealthStatus::Stale
    } else {
        HealthStatus::Healthy
    };

    HealthReport {
        status,
        has_equipment_data: snapshot.has_equipment_data(),
        last_update: Some(snapshot.taken_at),
        age_secs: Some(age.as_secs()),
        state,
    }
}

impl PortalScraper {
    /// Health summary for a health-check endpoint
    pub fn health(&self) -> HealthReport {
        let snapshot = self.latest_snapshot();
        classify_health(
            snapshot.as_deref(),
            Utc::now(),
            &self.config.health,
            self.state(),
        )
    }
}

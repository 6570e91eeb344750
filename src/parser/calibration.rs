//! Calibration date parsing and status derivation

use crate::types::CalibrationStatus;
use chrono::{NaiveDate, NaiveDateTime};

const SECONDS_PER_DAY: i64 = 86_400;

/// Parse a portal date with the first format that accepts it
///
/// Date-only formats are read as midnight.
pub(crate) fn parse_portal_date(text: &str, formats: &[String]) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    formats.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(text, format)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(text, format)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
    })
}

/// Whole days from `now` to `due`, floored (one second overdue is -1)
pub(crate) fn days_until(due: NaiveDateTime, now: NaiveDateTime) -> i64 {
    (due - now).num_seconds().div_euclid(SECONDS_PER_DAY)
}

/// Status and day count for an optional due date; unknown dates read as `Ok`
pub(crate) fn derive_status(
    due: Option<NaiveDateTime>,
    now: NaiveDateTime,
    warning_days: i64,
) -> (CalibrationStatus, Option<i64>) {
    match due {
        Some(due) => {
            let days = days_until(due, now);
            (CalibrationStatus::from_days(days, warning_days), Some(days))
        }
        None => (CalibrationStatus::Ok, None),
    }
}

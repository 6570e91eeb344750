//! Combining parsed pages into one snapshot.

use crate::parser::ParsedPage;
use crate::types::{DockingStationRecord, EquipmentRecord, PageRecord, PageReport, Snapshot};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Output of [`merge_pages`]
pub(crate) struct Merged {
    pub snapshot: Snapshot,
    pub pages: Vec<PageReport>,
    pub rows_skipped: usize,
    pub duplicates_dropped: usize,
}

/// Merge pages in configured order
///
/// The first record for a serial wins; later ones are counted as dropped.
/// Docking stations get the group of their docked instrument when that
/// instrument is in the same snapshot.
pub(crate) fn merge_pages(pages: Vec<ParsedPage>, taken_at: DateTime<Utc>) -> Merged {
    let mut instruments: Vec<EquipmentRecord> = Vec::new();
    let mut docking_stations: Vec<DockingStationRecord> = Vec::new();
    let mut instrument_serials = HashSet::new();
    let mut station_serials = HashSet::new();
    let mut reports = Vec::with_capacity(pages.len());
    let mut rows_skipped = 0;
    let mut duplicates_dropped = 0;

    for page in pages {
        let key = page.page.clone();
        let (records, skipped) = page.into_records();
        reports.push(PageReport {
            page: key,
            records: records.len(),
            rows_skipped: skipped,
        });
        rows_skipped += skipped;

        for record in records {
            match record {
                PageRecord::Instrument(r) if instrument_serials.insert(r.serial.clone()) => {
                    instruments.push(r);
                }
                PageRecord::DockingStation(r) if station_serials.insert(r.serial.clone()) => {
                    docking_stations.push(r);
                }
                _ => duplicates_dropped += 1,
            }
        }
    }

    if duplicates_dropped > 0 {
        tracing::warn!(duplicates_dropped, "dropped records with repeated serial numbers");
    }

    instruments.sort_by(|a, b| {
        (&a.group, &a.equipment_type, &a.serial).cmp(&(&b.group, &b.equipment_type, &b.serial))
    });
    docking_stations.sort_by(|a, b| (&a.station_type, &a.serial).cmp(&(&b.station_type, &b.serial)));

    let groups: HashMap<&str, &EquipmentRecord> = instruments
        .iter()
        .map(|r| (r.serial.as_str(), r))
        .collect();
    for station in &mut docking_stations {
        station.docked_group = station
            .docked_serial
            .as_str()
            .and_then(|serial| groups.get(serial))
            .map(|instrument| instrument.group.display().to_string());
    }

    Merged {
        snapshot: Snapshot {
            taken_at,
            instruments,
            docking_stations,
        },
        pages: reports,
        rows_skipped,
        duplicates_dropped,
    }
}

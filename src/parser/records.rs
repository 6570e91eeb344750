//! Header-driven row to record mapping

use super::calibration::{derive_status, parse_portal_date};
use crate::error::{ParseError, RowError};
use crate::types::{
    DockingStationRecord, EquipmentRecord, FieldValue, GasInlet, PageKind, PageRecord,
    UpgradeText,
};
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Gas inlets a docking station can report
pub(crate) const MAX_GAS_INLETS: u8 = 6;

/// A logical column: canonical header plus accepted spellings (lowercase)
struct Field {
    name: &'static str,
    aliases: &'static [&'static str],
}

const CATEGORY: Field = Field {
    name: "Category",
    aliases: &["category", "equipment category"],
};
const SERIAL: Field = Field {
    name: "Serial Number",
    aliases: &["serial number", "serial", "serial no", "serial #", "equipment number", "sn"],
};
const GROUP: Field = Field {
    name: "Equipment Group",
    aliases: &["equipment group", "group", "unit"],
};
const TYPE: Field = Field {
    name: "Type",
    aliases: &["type", "equipment type", "instrument type", "model"],
};
const LAST_CALIBRATION: Field = Field {
    name: "Last Calibration Date",
    aliases: &["last calibration date", "last calibration", "last cal date"],
};
const NEXT_CALIBRATION: Field = Field {
    name: "Next Calibration Date",
    aliases: &["next calibration date", "next calibration", "next cal date", "calibration due"],
};
const UPGRADE: Field = Field {
    name: "Upgrade Available",
    aliases: &["upgrade available", "upgrade availability", "upgrade", "upgrades"],
};
const STATE: Field = Field {
    name: "State",
    aliases: &["state", "last known state", "status"],
};
const DOCKED: Field = Field {
    name: "Instrument Currently Docked",
    aliases: &["instrument currently docked", "currently docked", "docked instrument"],
};

/// Case-insensitive header lookup
pub(crate) struct ColumnMap<'a> {
    headers: &'a [String],
    by_name: HashMap<String, usize>,
}

impl<'a> ColumnMap<'a> {
    pub(crate) fn new(headers: &'a [String]) -> Self {
        let mut by_name = HashMap::new();
        for (index, header) in headers.iter().enumerate() {
            // First occurrence wins for repeated captions
            by_name.entry(header.to_lowercase()).or_insert(index);
        }
        Self { headers, by_name }
    }

    fn find<S: AsRef<str>>(&self, aliases: &[S]) -> Option<usize> {
        aliases
            .iter()
            .find_map(|alias| self.by_name.get(alias.as_ref()).copied())
    }

    fn optional(&self, field: &Field) -> Option<usize> {
        self.find(field.aliases)
    }

    fn required(&self, field: &Field) -> Result<usize, ParseError> {
        self.optional(field).ok_or_else(|| ParseError::MissingColumn {
            column: field.name.to_string(),
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.headers.len()
    }
}

struct InstrumentColumns {
    serial: usize,
    group: Option<usize>,
    equipment_type: Option<usize>,
    last_calibration: Option<usize>,
    next_calibration: Option<usize>,
    upgrade: Option<usize>,
}

impl InstrumentColumns {
    fn consumed(&self) -> impl Iterator<Item = usize> + '_ {
        [
            Some(self.serial),
            self.group,
            self.equipment_type,
            self.last_calibration,
            self.next_calibration,
            self.upgrade,
        ]
        .into_iter()
        .flatten()
    }
}

struct InletColumns {
    index: u8,
    name: Option<usize>,
    pressure: Option<usize>,
}

struct StationColumns {
    serial: usize,
    station_type: Option<usize>,
    state: Option<usize>,
    docked: Option<usize>,
    inlets: Vec<InletColumns>,
}

impl StationColumns {
    fn consumed(&self) -> impl Iterator<Item = usize> + '_ {
        [Some(self.serial), self.station_type, self.state, self.docked]
            .into_iter()
            .chain(self.inlets.iter().flat_map(|i| [i.name, i.pressure]))
            .flatten()
    }
}

fn inlet_columns(columns: &ColumnMap<'_>) -> Vec<InletColumns> {
    (1..=MAX_GAS_INLETS)
        .filter_map(|n| {
            let name = columns.find(&[
                format!("gas inlet {n}"),
                format!("gas inlet {n} name"),
                format!("inlet {n} gas"),
                format!("inlet {n}"),
                format!("gas {n}"),
            ]);
            let pressure = columns.find(&[
                format!("gas inlet {n} pressure"),
                format!("inlet {n} pressure"),
                format!("gas {n} pressure"),
                format!("pressure {n}"),
            ]);
            (name.is_some() || pressure.is_some()).then_some(InletColumns {
                index: n,
                name,
                pressure,
            })
        })
        .collect()
}

/// Column positions for one page, resolved from its header row
pub(crate) struct Layout {
    kind: PageKind,
    category: Option<usize>,
    instrument: InstrumentColumns,
    station: StationColumns,
    instrument_extras: Vec<usize>,
    station_extras: Vec<usize>,
}

impl Layout {
    /// Resolve columns, failing when a column the page kind needs is missing
    pub(crate) fn resolve(kind: PageKind, columns: &ColumnMap<'_>) -> Result<Self, ParseError> {
        let category = match kind {
            PageKind::Equipment => Some(columns.required(&CATEGORY)?),
            PageKind::Instruments | PageKind::DockingStations => columns.optional(&CATEGORY),
        };
        let serial = columns.required(&SERIAL)?;
        let next_calibration = match kind {
            PageKind::Instruments => Some(columns.required(&NEXT_CALIBRATION)?),
            PageKind::DockingStations | PageKind::Equipment => columns.optional(&NEXT_CALIBRATION),
        };

        let equipment_type = columns.optional(&TYPE);
        let instrument = InstrumentColumns {
            serial,
            group: columns.optional(&GROUP),
            equipment_type,
            last_calibration: columns.optional(&LAST_CALIBRATION),
            next_calibration,
            upgrade: columns.optional(&UPGRADE),
        };
        let station = StationColumns {
            serial,
            station_type: equipment_type,
            state: columns.optional(&STATE),
            docked: columns.optional(&DOCKED),
            inlets: inlet_columns(columns),
        };

        let extras = |used: HashSet<usize>| -> Vec<usize> {
            (0..columns.len())
                .filter(|i| !used.contains(i) && Some(*i) != category)
                .filter(|i| !columns.headers[*i].is_empty())
                .collect()
        };
        let instrument_extras = extras(instrument.consumed().collect());
        let station_extras = extras(station.consumed().collect());

        Ok(Self {
            kind,
            category,
            instrument,
            station,
            instrument_extras,
            station_extras,
        })
    }
}

/// Builds records from text rows of one table
pub(crate) struct RowBuilder<'a> {
    pub headers: &'a [String],
    pub layout: &'a Layout,
    pub date_formats: &'a [String],
    pub warning_days: i64,
    pub now: NaiveDateTime,
}

enum RowKind {
    Instrument,
    DockingStation,
}

impl RowBuilder<'_> {
    pub(crate) fn build(&self, row: usize, cells: &[String]) -> Result<PageRecord, RowError> {
        if cells.len() != self.headers.len() {
            return Err(RowError::CellCountMismatch {
                row,
                expected: self.headers.len(),
                found: cells.len(),
            });
        }

        let kind = match self.layout.kind {
            PageKind::Instruments => RowKind::Instrument,
            PageKind::DockingStations => RowKind::DockingStation,
            PageKind::Equipment => {
                let category = text(cells, self.layout.category);
                if category.eq_ignore_ascii_case("instrument") {
                    RowKind::Instrument
                } else if category.eq_ignore_ascii_case("docking station") {
                    RowKind::DockingStation
                } else {
                    return Err(RowError::UnknownCategory {
                        row,
                        category: category.to_string(),
                    });
                }
            }
        };

        let serial = text(cells, Some(self.layout.instrument.serial));
        if serial.is_empty() {
            return Err(RowError::MissingSerial { row });
        }

        Ok(match kind {
            RowKind::Instrument => PageRecord::Instrument(self.instrument(serial, cells)),
            RowKind::DockingStation => PageRecord::DockingStation(self.station(serial, cells)),
        })
    }

    fn instrument(&self, serial: &str, cells: &[String]) -> EquipmentRecord {
        let columns = &self.layout.instrument;
        let next_calibration = field(cells, columns.next_calibration);
        let next_calibration_at = next_calibration
            .as_str()
            .and_then(|t| parse_portal_date(t, self.date_formats));
        let (calibration_status, days_until) =
            derive_status(next_calibration_at, self.now, self.warning_days);

        let upgrade = match columns.upgrade {
            Some(_) => UpgradeText(text(cells, columns.upgrade).to_string()),
            None => UpgradeText(FieldValue::NOT_AVAILABLE.to_string()),
        };

        EquipmentRecord {
            serial: serial.to_string(),
            group: field(cells, columns.group),
            equipment_type: field(cells, columns.equipment_type),
            last_calibration: field(cells, columns.last_calibration),
            next_calibration,
            next_calibration_at,
            upgrade,
            calibration_status,
            days_until,
            extra: self.extras(cells, &self.layout.instrument_extras),
        }
    }

    fn station(&self, serial: &str, cells: &[String]) -> DockingStationRecord {
        let columns = &self.layout.station;
        let gas_inlets = columns
            .inlets
            .iter()
            .map(|inlet| GasInlet {
                index: inlet.index,
                name: field(cells, inlet.name),
                pressure: field(cells, inlet.pressure),
            })
            .collect();

        DockingStationRecord {
            serial: serial.to_string(),
            station_type: field(cells, columns.station_type),
            state: field(cells, columns.state),
            docked_serial: field(cells, columns.docked),
            docked_group: None,
            gas_inlets,
            extra: self.extras(cells, &self.layout.station_extras),
        }
    }

    fn extras(&self, cells: &[String], indices: &[usize]) -> BTreeMap<String, FieldValue> {
        indices
            .iter()
            .map(|i| (self.headers[*i].clone(), field(cells, Some(*i))))
            .collect()
    }
}

fn text(cells: &[String], index: Option<usize>) -> &str {
    index
        .and_then(|i| cells.get(i))
        .map(String::as_str)
        .unwrap_or_default()
}

fn field(cells: &[String], index: Option<usize>) -> FieldValue {
    FieldValue::from_cell(text(cells, index))
}

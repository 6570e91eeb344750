//! Table parser: page markup to structured records
//!
//! Parsing is synchronous and self-contained. `scraper::Html` is not `Send`,
//! so the document is built and dropped inside [`TableParser::parse`] and
//! never lives across an `.await`.

mod calibration;
mod records;
mod table;

use crate::config::CalibrationConfig;
use crate::error::{ParseError, RowError};
use crate::types::{PageKey, PageRecord, RawPage};
use chrono::NaiveDateTime;
use records::{ColumnMap, Layout, RowBuilder};

/// Records of one page, with row-level failures kept in place
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedPage {
    /// Which page was parsed
    pub page: PageKey,
    /// One entry per data row, in table order
    pub rows: Vec<Result<PageRecord, RowError>>,
}

impl ParsedPage {
    /// Successfully built records
    pub fn records(&self) -> impl Iterator<Item = &PageRecord> {
        self.rows.iter().filter_map(|r| r.as_ref().ok())
    }

    /// Rows that failed to build
    pub fn rows_skipped(&self) -> usize {
        self.rows.iter().filter(|r| r.is_err()).count()
    }

    /// Split into records and the number of skipped rows
    pub fn into_records(self) -> (Vec<PageRecord>, usize) {
        let mut records = Vec::with_capacity(self.rows.len());
        let mut skipped = 0;
        for row in self.rows {
            match row {
                Ok(record) => records.push(record),
                Err(_) => skipped += 1,
            }
        }
        (records, skipped)
    }
}

/// Turns fetched pages into records
#[derive(Clone, Debug)]
pub struct TableParser {
    warning_days: i64,
    date_formats: Vec<String>,
}

impl TableParser {
    /// Create a parser with the configured warning window and date formats
    pub fn new(config: &CalibrationConfig) -> Self {
        Self {
            warning_days: config.warning_days,
            date_formats: config.date_formats.clone(),
        }
    }

    /// Parse `page`, deriving calibration fields against `now` (portal-local time)
    ///
    /// # Errors
    /// Page-level failures only: table or header row not found, or a column
    /// the page kind requires is missing. Bad rows are returned as `Err`
    /// entries in [`ParsedPage::rows`].
    pub fn parse(&self, page: &RawPage, now: NaiveDateTime) -> Result<ParsedPage, ParseError> {
        let table = table::extract_table(&page.body, &page.anchor)?;
        let columns = ColumnMap::new(&table.headers);
        let layout = Layout::resolve(page.kind, &columns)?;

        let builder = RowBuilder {
            headers: &table.headers,
            layout: &layout,
            date_formats: &self.date_formats,
            warning_days: self.warning_days,
            now,
        };

        let rows: Vec<Result<PageRecord, RowError>> = table
            .rows
            .iter()
            .enumerate()
            .map(|(index, cells)| builder.build(index, cells))
            .collect();

        for error in rows.iter().filter_map(|r| r.as_ref().err()) {
            tracing::warn!(page = %page.key, error = %error, "skipping row");
        }
        tracing::debug!(
            page = %page.key,
            columns = table.headers.len(),
            rows = rows.len(),
            "parsed table"
        );

        Ok(ParsedPage {
            page: page.key.clone(),
            rows,
        })
    }
}

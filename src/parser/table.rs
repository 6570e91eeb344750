//! Locating the grid in a page and flattening it into text cells
//!
//! Works on the DevExpress grid markup the portal renders and on plain
//! `<table>`s with `<th>` headers. The parsed document never leaves this
//! module; callers get owned strings back.

use crate::error::ParseError;
use crate::types::TableAnchor;
use scraper::{ElementRef, Html, Selector};

/// Header texts and data rows of one table
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct TextTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Collapse runs of whitespace (including `&nbsp;`) and trim
pub(crate) fn normalize_text(text: &str) -> String {
    // char::is_whitespace covers U+00A0
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Find the anchored table in `html` and read its header and data rows
pub(crate) fn extract_table(html: &str, anchor: &TableAnchor) -> Result<TextTable, ParseError> {
    let document = Html::parse_document(html);

    let table = find_table(&document, anchor).ok_or_else(|| ParseError::TableNotFound {
        anchor: anchor.to_string(),
    })?;

    let rows = table_rows(table);
    let header_index = find_header_row(&rows).ok_or_else(|| ParseError::HeaderRowNotFound {
        anchor: anchor.to_string(),
    })?;

    let headers = cells(rows[header_index]).map(header_text).collect();

    let dx_rows: Vec<ElementRef<'_>> = rows
        .iter()
        .copied()
        .filter(|row| row_id_contains(*row, "DXDataRow"))
        .collect();
    let data_rows: Vec<ElementRef<'_>> = if dx_rows.is_empty() {
        rows.iter()
            .skip(header_index + 1)
            .copied()
            .filter(|row| cells(*row).any(|c| c.value().name() == "td"))
            .collect()
    } else {
        dx_rows
    };

    let rows = data_rows
        .into_iter()
        .map(|row| cells(row).map(cell_text).collect())
        .collect();

    Ok(TextTable { headers, rows })
}

/// By id first, then the first table after a matching heading
fn find_table<'a>(document: &'a Html, anchor: &TableAnchor) -> Option<ElementRef<'a>> {
    let Ok(table_sel) = Selector::parse("table") else {
        return None;
    };

    if let Some(id) = &anchor.table_id {
        let by_id = document
            .select(&table_sel)
            .find(|table| table.value().id() == Some(id.as_str()));
        if by_id.is_some() {
            return by_id;
        }
    }

    let heading = anchor.heading.as_deref()?;
    let Ok(sel) = Selector::parse("h1, h2, h3, h4, h5, h6, table") else {
        return None;
    };

    let mut seen_heading = false;
    for element in document.select(&sel) {
        if element.value().name() == "table" {
            if seen_heading {
                return Some(element);
            }
        } else if normalize_text(&element.text().collect::<String>()).eq_ignore_ascii_case(heading)
        {
            seen_heading = true;
        }
    }
    None
}

/// Rows of `table` itself, excluding rows of nested tables
fn table_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|e| e.value().name() == "tr"),
            ),
            _ => {}
        }
    }
    rows
}

fn find_header_row(rows: &[ElementRef<'_>]) -> Option<usize> {
    rows.iter()
        .position(|row| row_id_contains(*row, "DXHeadersRow"))
        .or_else(|| {
            rows.iter()
                .position(|row| cells(*row).any(|c| c.value().name() == "th"))
        })
}

fn row_id_contains(row: ElementRef<'_>, marker: &str) -> bool {
    row.value().id().is_some_and(|id| id.contains(marker))
}

/// Direct `<td>`/`<th>` children of a row
fn cells<'a>(row: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|e| matches!(e.value().name(), "td" | "th"))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    normalize_text(&cell.text().collect::<String>())
}

/// DevExpress wraps the caption in a nested table next to sort/filter icons
fn header_text(cell: ElementRef<'_>) -> String {
    let nested = Selector::parse("table td, table th")
        .ok()
        .and_then(|sel| cell.select(&sel).next());
    match nested {
        Some(first) => cell_text(first),
        None => cell_text(cell),
    }
}

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::fmt;
use tracing::{debug, warn};

use crate::config::ExtractorConfig;
use crate::constants::{
    INTERCEPTIONS_COLUMN, POINTS_ALLOWED_COLUMN, SACKS_COLUMN, SEASON_COLUMN, TEAM_COLUMN,
};
use crate::error::{Result, ScraperError};
use crate::types::{RawRow, RawTable};

static TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table").expect("valid table selector"));
static HEAD_ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("thead > tr").expect("valid thead selector"));
static ANY_ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("valid row selector"));
static BODY_ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tbody > tr").expect("valid tbody selector"));

/// Structural drift found while extracting a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaReport {
    /// Every required column was found.
    Complete,
    /// The table was found but some required columns were not.
    Partial { missing: Vec<String> },
    /// No table carried any of the expected headers.
    MissingTable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaIssue {
    MissingTable,
    MissingColumn(String),
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaIssue::MissingTable => write!(f, "MISSING_TABLE"),
            SchemaIssue::MissingColumn(name) => write!(f, "MISSING_COLUMN({})", name),
        }
    }
}

impl SchemaReport {
    pub fn is_complete(&self) -> bool {
        matches!(self, SchemaReport::Complete)
    }

    pub fn issues(&self) -> Vec<SchemaIssue> {
        match self {
            SchemaReport::Complete => Vec::new(),
            SchemaReport::Partial { missing } => missing
                .iter()
                .map(|name| SchemaIssue::MissingColumn(name.clone()))
                .collect(),
            SchemaReport::MissingTable => vec![SchemaIssue::MissingTable],
        }
    }
}

struct ColumnSpec {
    name: &'static str,
    headers: Vec<String>,
    required: bool,
}

/// Pulls the team-defense totals table out of an HTML page.
///
/// Headers are matched exactly (case and whitespace aside) against the
/// configured labels. A renamed header is reported missing, never guessed.
pub struct TableExtractor {
    table_selector: Option<Selector>,
    columns: Vec<ColumnSpec>,
    skip_row_labels: Vec<String>,
}

impl TableExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        let table_selector = match &config.table_selector {
            Some(css) => Some(Selector::parse(css).map_err(|e| {
                ScraperError::Config(format!("invalid extractor.table_selector '{}': {:?}", css, e))
            })?),
            None => None,
        };
        let column = |name, headers: &[String], required| ColumnSpec {
            name,
            headers: headers.iter().map(|h| normalize(h)).collect(),
            required,
        };
        Ok(Self {
            table_selector,
            columns: vec![
                column(TEAM_COLUMN, &config.team_headers, true),
                column(SEASON_COLUMN, &config.season_headers, false),
                column(POINTS_ALLOWED_COLUMN, &config.points_allowed_headers, true),
                column(SACKS_COLUMN, &config.sacks_headers, true),
                column(INTERCEPTIONS_COLUMN, &config.interceptions_headers, true),
            ],
            skip_row_labels: config.skip_row_labels.iter().map(|l| normalize(l)).collect(),
        })
    }

    pub fn extract(&self, body: &str) -> (RawTable, SchemaReport) {
        let document = Html::parse_document(body);

        let Some((table, headers)) = self.locate_table(&document) else {
            warn!("no table with the expected headers found");
            return (RawTable::default(), SchemaReport::MissingTable);
        };

        // canonical column -> cell index
        let mut positions: Vec<(&'static str, usize)> = Vec::new();
        let mut missing = Vec::new();
        for column in &self.columns {
            match headers.iter().position(|h| column.headers.contains(h)) {
                Some(idx) => positions.push((column.name, idx)),
                None if column.required => missing.push(column.name.to_string()),
                None => {}
            }
        }

        let mut rows = Vec::new();
        for tr in table.select(&BODY_ROW) {
            let cells = row_cells(&tr);
            if cells.is_empty() || cells.iter().all(|c| c.text.is_empty()) {
                continue;
            }
            // repeated header rows inside the body
            if cells.iter().all(|c| c.is_header) {
                continue;
            }
            if cells.iter().any(|c| self.skip_row_labels.contains(&normalize(&c.text))) {
                debug!(row = ?cells.iter().map(|c| c.text.as_str()).collect::<Vec<_>>(), "skipping summary row");
                continue;
            }
            let mut row = RawRow::new();
            for (name, idx) in &positions {
                if let Some(cell) = cells.get(*idx) {
                    row.insert(name.to_string(), cell.text.clone());
                }
            }
            rows.push(row);
        }

        let report = if missing.is_empty() {
            SchemaReport::Complete
        } else {
            warn!(missing = ?missing, "table is missing expected columns");
            SchemaReport::Partial { missing }
        };
        debug!(rows = rows.len(), "extracted table");
        (RawTable::new(rows), report)
    }

    fn candidate_tables<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        match &self.table_selector {
            None => document.select(&TABLE).collect(),
            Some(selector) => document
                .select(selector)
                .flat_map(|el| {
                    if el.value().name() == "table" {
                        vec![el]
                    } else {
                        el.select(&TABLE).collect()
                    }
                })
                .collect(),
        }
    }

    /// First candidate table whose header row carries at least one required header.
    fn locate_table<'a>(&self, document: &'a Html) -> Option<(ElementRef<'a>, Vec<String>)> {
        self.candidate_tables(document).into_iter().find_map(|table| {
            let headers = header_labels(&table);
            let anchored = self
                .columns
                .iter()
                .filter(|c| c.required)
                .any(|c| headers.iter().any(|h| c.headers.contains(h)));
            anchored.then_some((table, headers))
        })
    }
}

struct Cell {
    text: String,
    is_header: bool,
}

fn row_cells(tr: &ElementRef) -> Vec<Cell> {
    tr.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "th" | "td"))
        .map(|el| Cell {
            text: collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")),
            is_header: el.value().name() == "th",
        })
        .collect()
}

/// Normalized header labels: last `<thead>` row, else the first all-`<th>` row.
fn header_labels(table: &ElementRef) -> Vec<String> {
    let header_row = table.select(&HEAD_ROW).last().or_else(|| {
        table.select(&ANY_ROW).find(|tr| {
            let cells = row_cells(tr);
            !cells.is_empty() && cells.iter().all(|c| c.is_header)
        })
    });
    header_row
        .map(|tr| row_cells(&tr).iter().map(|c| normalize(&c.text)).collect())
        .unwrap_or_default()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize(s: &str) -> String {
    collapse_whitespace(s).to_lowercase()
}

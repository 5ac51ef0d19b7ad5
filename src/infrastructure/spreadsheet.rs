//! Stock feed spreadsheet reading.
//!
//! The wholesale price list arrives as an `.xls` workbook. Two facts are
//! mined from it: the set of identifiers currently in stock (any cell that
//! is a bare 12-digit string) and the in-transit quantity per identifier
//! (fixed column positions in the price sheet layout).

use std::collections::BTreeMap;
use std::path::Path;

use calamine::{open_workbook, Data, Reader, Xls};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{DeviceId, IdentifierSet};

/// Column holding the product identifier in the price sheet.
const IDENTIFIER_COLUMN: usize = 2;
/// Column holding the in-transit quantity.
const IN_TRANSIT_COLUMN: usize = 5;

static TWELVE_DIGITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{12}$").expect("identifier pattern"));

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("could not open feed workbook {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: calamine::XlsError,
    },
}

/// One worksheet as a plain row matrix; every cell rendered to text.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

/// Spreadsheet access seam; the production reader parses `.xls` workbooks,
/// tests substitute canned sheets.
pub trait SpreadsheetReader: Send + Sync {
    fn read_sheets(&self, path: &Path) -> Result<Vec<Sheet>, FeedError>;
}

/// calamine-backed `.xls` reader.
pub struct XlsFeedReader;

impl SpreadsheetReader for XlsFeedReader {
    fn read_sheets(&self, path: &Path) -> Result<Vec<Sheet>, FeedError> {
        let mut workbook: Xls<_> = open_workbook(path).map_err(|source| FeedError::Open {
            path: path.display().to_string(),
            source,
        })?;

        let mut sheets = Vec::new();
        for (name, range) in workbook.worksheets() {
            let rows = range
                .rows()
                .map(|row| row.iter().map(cell_to_string).collect())
                .collect();
            sheets.push(Sheet { name, rows });
        }
        debug!("read {} sheet(s) from {}", sheets.len(), path.display());
        Ok(sheets)
    }
}

/// Render a cell the way the feed uses it: identifiers stored as numbers
/// must come out as their plain digit string.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 => format!("{f:.0}"),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Empty => String::new(),
        other => other.to_string().trim().to_string(),
    }
}

/// Every cell across every sheet that is a bare 12-digit string is a
/// stocked identifier.
pub fn scan_stock_identifiers(sheets: &[Sheet]) -> IdentifierSet {
    let mut ids = IdentifierSet::new();
    for sheet in sheets {
        for row in &sheet.rows {
            for cell in row {
                if TWELVE_DIGITS.is_match(cell) {
                    if let Ok(id) = DeviceId::new(cell.clone()) {
                        ids.insert(id);
                    }
                }
            }
        }
    }
    ids
}

/// Identifier → in-transit quantity from the fixed feed columns. Rows that
/// are too short or whose identifier cell is not a 12-digit string are
/// skipped; an unparseable quantity reads as 0.
pub fn scan_in_transit(sheets: &[Sheet]) -> BTreeMap<DeviceId, u32> {
    let mut quantities = BTreeMap::new();
    for sheet in sheets {
        for row in &sheet.rows {
            if row.len() <= IN_TRANSIT_COLUMN {
                continue;
            }
            let raw_id = &row[IDENTIFIER_COLUMN];
            if !TWELVE_DIGITS.is_match(raw_id) {
                continue;
            }
            let Ok(id) = DeviceId::new(raw_id.clone()) else {
                continue;
            };
            let quantity = parse_quantity(&row[IN_TRANSIT_COLUMN]);
            quantities.insert(id, quantity);
        }
    }
    if quantities.is_empty() {
        warn!("feed contained no in-transit rows");
    }
    quantities
}

fn parse_quantity(raw: &str) -> u32 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|q| q.is_finite() && *q >= 0.0)
        .map_or(0, |q| q as u32)
}

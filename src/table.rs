//! Minimal tabular loader for the lab input files (CSV/TSV with a header
//! row whose capitalization is not trusted).
//!
//! Cells are kept as strings; the workflows parse what they need on demand
//! so a stray `NA` in an unused column never aborts a run. Excel inputs are
//! not handled here; exports should be saved as CSV/TSV first.

use std::path::Path;

use crate::error::{FluentError, Result};

/// An input table: lowercased headers plus string cells.
#[derive(Clone, Debug, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column index for a (case-insensitive) header name.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        let want = name.to_ascii_lowercase();
        self.headers
            .iter()
            .position(|h| *h == want)
            .ok_or_else(|| FluentError::MissingColumn(name.to_string()))
    }

    /// Fail unless every named column is present.
    pub fn require_columns(&self, names: &[&str]) -> Result<()> {
        for name in names {
            self.column_index(name)?;
        }
        Ok(())
    }

    /// Cell by row and 0-based column index; ragged rows read as empty.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows[row].get(col).map(String::as_str).unwrap_or("")
    }

    /// Cell by row and header name.
    pub fn cell_named(&self, row: usize, name: &str) -> Result<&str> {
        Ok(self.cell(row, self.column_index(name)?))
    }

    /// Keep only the given 0-indexed rows, in the given order.
    pub fn select_rows(&mut self, keep: &[usize]) -> Result<()> {
        let nrows = self.rows.len();
        let mut selected = Vec::with_capacity(keep.len());
        for &r in keep {
            if r >= nrows {
                return Err(FluentError::RowOutOfRange { row: r, nrows });
            }
            selected.push(self.rows[r].clone());
        }
        self.rows = selected;
        Ok(())
    }
}

/// Parse a cell that may be empty/NA. Empty-ish cells yield `None`;
/// anything else must parse as `f64`.
pub fn parse_opt_f64(cell: &str) -> Option<f64> {
    let c = cell.trim();
    if c.is_empty() || c.eq_ignore_ascii_case("na") || c.eq_ignore_ascii_case("nan") {
        return None;
    }
    c.parse().ok()
}

/// Like [`parse_opt_f64`] for integer well/tube positions. Accepts numbers
/// exported with a trailing `.0`.
pub fn parse_opt_u32(cell: &str) -> Option<u32> {
    parse_opt_f64(cell).and_then(|v| {
        if v >= 0.0 && v.fract() == 0.0 {
            Some(v as u32)
        } else {
            None
        }
    })
}

/// Delimiter guess from the file extension: `.csv` is comma, everything
/// else tab. Workflow code may override (BioRad layout exports use `;`).
pub fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => b',',
        _ => b'\t',
    }
}

/// Load a delimited table. `delimiter = None` guesses from the extension;
/// `has_headers = false` synthesizes positional headers (`"1"`, `"2"`, ...).
///
/// A result with a single column is rejected: in practice that is always a
/// delimiter mixup, and catching it here beats emitting a garbage worklist.
pub fn load_table(path: &Path, delimiter: Option<u8>, has_headers: bool) -> Result<Table> {
    let delim = delimiter.unwrap_or_else(|| delimiter_for(path));
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(has_headers)
        .delimiter(delim)
        .flexible(true)
        .from_path(path)?;

    let mut table = Table::default();
    if has_headers {
        table.headers = rdr
            .headers()?
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .collect();
    }
    for record in rdr.records() {
        let record = record?;
        table
            .rows
            .push(record.iter().map(|c| c.trim().to_string()).collect());
    }
    if !has_headers {
        let ncols = table.rows.iter().map(Vec::len).max().unwrap_or(0);
        table.headers = (1..=ncols).map(|i| i.to_string()).collect();
    }
    if table.headers.len() < 2 {
        return Err(FluentError::SingleColumn);
    }
    Ok(table)
}

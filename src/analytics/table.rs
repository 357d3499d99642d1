//! In-memory tabular data loaded from CSV.
//!
//! One whole-file load, no streaming. Cells are kept as raw text;
//! empty fields count as missing. Values are surfaced as JSON so
//! numeric columns come out as numbers and everything else as strings,
//! which is what the charting front end consumes.

use crate::core::error::{CanvassError, Result};
use log::debug;
use serde_json::Value;
use std::io::Read;
use std::path::Path;

/// A loaded table: ordered columns, row-major cells.
#[derive(Debug, Clone)]
pub struct DataTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl DataTable {
    /// Loads a table from CSV bytes.
    ///
    /// # Errors
    /// Returns an I/O error when the header or a row cannot be parsed;
    /// the underlying message is surfaced verbatim.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

        let headers = rdr
            .headers()
            .map_err(|e| CanvassError::io("csv_header_error", e.to_string(), "analytics:table"))?;
        let columns: Vec<String> = headers.iter().map(str::to_string).collect();

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(|e| {
                CanvassError::io("csv_row_error", e.to_string(), "analytics:table")
            })?;
            let mut row: Vec<Option<String>> = record
                .iter()
                .map(|cell| {
                    if cell.is_empty() {
                        None
                    } else {
                        Some(cell.to_string())
                    }
                })
                .collect();
            // Short rows read as missing trailing cells; long rows are
            // clipped to the header width.
            row.resize(columns.len(), None);
            rows.push(row);
        }

        debug!(
            "loaded table: {} columns, {} rows",
            columns.len(),
            rows.len()
        );
        Ok(Self { columns, rows })
    }

    /// Loads a table from a CSV file on disk.
    ///
    /// # Errors
    /// Returns an I/O error when the file cannot be opened or parsed.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            CanvassError::io("csv_open_error", e.to_string(), "analytics:table")
                .with_context("path", path.display().to_string())
        })?;
        Self::from_reader(file)
    }

    /// Column names in file order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of data rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Whether a column exists.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    fn cell<'a>(&self, row: &'a [Option<String>], idx: usize) -> Option<&'a str> {
        row.get(idx).and_then(|c| c.as_deref())
    }

    /// A column's values in row order; missing cells become JSON null.
    #[must_use]
    pub fn values(&self, name: &str) -> Vec<Value> {
        let Some(idx) = self.column_index(name) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .map(|row| self.cell(row, idx).map_or(Value::Null, cell_value))
            .collect()
    }

    /// A column's non-missing raw text values in row order.
    #[must_use]
    pub fn text_values(&self, name: &str) -> Vec<String> {
        let Some(idx) = self.column_index(name) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter_map(|row| self.cell(row, idx).map(str::to_string))
            .collect()
    }

    /// Whether any cell of the column is missing.
    #[must_use]
    pub fn has_missing(&self, name: &str) -> bool {
        let Some(idx) = self.column_index(name) else {
            return false;
        };
        self.rows.iter().any(|row| self.cell(row, idx).is_none())
    }

    /// Unique non-missing values, in order of first appearance.
    #[must_use]
    pub fn unique_values(&self, name: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.text_values(name)
            .into_iter()
            .filter(|v| seen.insert(v.clone()))
            .collect()
    }

    /// Row-major matrix of the given columns' values.
    #[must_use]
    pub fn matrix(&self, names: &[String]) -> Vec<Vec<Value>> {
        let indices: Vec<Option<usize>> = names.iter().map(|n| self.column_index(n)).collect();
        self.rows
            .iter()
            .map(|row| {
                indices
                    .iter()
                    .map(|idx| {
                        idx.and_then(|i| self.cell(row, i))
                            .map_or(Value::Null, cell_value)
                    })
                    .collect()
            })
            .collect()
    }

    /// Counts rows per distinct non-missing value of a column.
    ///
    /// Ordered ascending by value (numbers before their lexical
    /// neighbours compare numerically), so repeated calls on the same
    /// table yield the same sequence.
    #[must_use]
    pub fn group_count(&self, name: &str) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for value in self.text_values(name) {
            match counts.iter_mut().find(|(v, _)| *v == value) {
                Some((_, n)) => *n += 1,
                None => counts.push((value, 1)),
            }
        }
        counts.sort_by(|(a, _), (b, _)| compare_cells(a, b));
        counts
    }

    /// Counts occurrences of each of the given values of a column.
    #[must_use]
    pub fn counts_for(&self, name: &str, values: &[String]) -> Vec<usize> {
        let all = self.text_values(name);
        values
            .iter()
            .map(|v| all.iter().filter(|x| *x == v).count())
            .collect()
    }
}

/// Parses a cell into a JSON value: integers, then floats, then text.
pub(crate) fn cell_value(cell: &str) -> Value {
    if let Ok(i) = cell.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = cell.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(cell.to_string())
}

fn compare_cells(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.cmp(b),
    }
}

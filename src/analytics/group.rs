//! Group-by frequency aggregation.

use super::table::{cell_value, DataTable};
use crate::core::error::{CanvassError, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Counts rows per distinct value for each requested column.
///
/// Each record is shaped `{"<column>": value, "count": n}` to match
/// what the charting front end consumes; keys keep the same typing as
/// [`DataTable::values`], so numeric columns come out as numbers.
/// Columns are processed independently; the first invalid column
/// aborts the whole call with that column named. Output order per
/// column is ascending by value and stable across repeated calls on
/// the same table.
///
/// # Errors
/// Validation error naming the first unknown column.
pub fn group_by(table: &DataTable, columns: &[String]) -> Result<BTreeMap<String, Vec<Value>>> {
    let mut results = BTreeMap::new();

    for column in columns {
        if !table.has_column(column) {
            return Err(CanvassError::validation(
                "invalid_column",
                format!("Invalid column selected: {column}"),
                "analytics:group_by",
            )
            .with_context("column", column.clone()));
        }

        let records = table
            .group_count(column)
            .into_iter()
            .map(|(value, count)| {
                let mut record = Map::new();
                record.insert(column.clone(), cell_value(&value));
                record.insert("count".to_string(), Value::Number(count.into()));
                Value::Object(record)
            })
            .collect();
        results.insert(column.clone(), records);
    }

    Ok(results)
}

//! Chart-ready series construction from a loaded table.
//!
//! Validation is fail-fast: the first violated rule wins and names the
//! offending column or constraint. Empty series are valid output; a
//! table with no rows is not an error.

use super::table::DataTable;
use crate::core::error::{CanvassError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ORIGIN: &str = "analytics:plot";

/// The fixed set of supported plot types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotKind {
    Scatter,
    Bar,
    Line,
    Pie,
    Box,
    Area,
    Heatmap,
}

impl PlotKind {
    /// The `type` string the charting front end expects. Line and area
    /// charts render as scatter traces with extra attributes.
    #[must_use]
    pub const fn trace_type(self) -> &'static str {
        match self {
            Self::Scatter | Self::Line | Self::Area => "scatter",
            Self::Bar => "bar",
            Self::Pie => "pie",
            Self::Box => "box",
            Self::Heatmap => "heatmap",
        }
    }
}

/// A requested plot: type, optional x-axis column, y-axis columns.
#[derive(Debug, Clone, Deserialize)]
pub struct PlotSpec {
    pub plot_type: PlotKind,
    #[serde(default)]
    pub x_axis: Option<String>,
    #[serde(default)]
    pub y_axes: Vec<String>,
}

/// One chart series. Field presence depends on the plot type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    #[serde(rename = "type")]
    pub trace_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z: Option<Vec<Vec<Value>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Series {
    fn new(trace_type: &'static str) -> Self {
        Self {
            trace_type,
            x: None,
            y: None,
            z: None,
            labels: None,
            values: None,
            mode: None,
            fill: None,
            name: None,
        }
    }
}

/// Axis title metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisTitle {
    pub title: String,
}

/// Chart layout: title plus axis titles, both suppressed for plot
/// types without axes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layout {
    pub title: String,
    pub xaxis: Option<AxisTitle>,
    pub yaxis: Option<AxisTitle>,
}

/// The full plot-data response: series plus layout.
#[derive(Debug, Clone, Serialize)]
pub struct PlotData {
    pub data: Vec<Series>,
    pub layout: Layout,
}

fn invalid_column(column: &str) -> CanvassError {
    CanvassError::validation(
        "invalid_column",
        format!("Invalid column selected: {column}"),
        ORIGIN,
    )
    .with_context("column", column.to_string())
}

fn require_x(spec: &PlotSpec) -> Result<&String> {
    spec.x_axis.as_ref().ok_or_else(|| {
        CanvassError::validation(
            "x_axis_required",
            format!("x_axis is required for {} charts", spec.plot_type.trace_type()),
            ORIGIN,
        )
        .with_context("field", "x_axis")
    })
}

fn check_columns(table: &DataTable, spec: &PlotSpec) -> Result<()> {
    let x = require_x(spec)?;
    if !table.has_column(x) {
        return Err(invalid_column(x));
    }
    for y in &spec.y_axes {
        if !table.has_column(y) {
            return Err(invalid_column(y));
        }
    }
    Ok(())
}

/// Builds the series list and layout for one plot request.
///
/// # Errors
/// Validation errors name the offending column or constraint; see the
/// per-type rules below.
pub fn build_plot(table: &DataTable, spec: &PlotSpec) -> Result<PlotData> {
    debug!(
        "building plot: type={:?} x={:?} y={:?}",
        spec.plot_type, spec.x_axis, spec.y_axes
    );

    let data = match spec.plot_type {
        PlotKind::Pie => build_pie(table, spec)?,
        PlotKind::Heatmap => build_heatmap(table, spec)?,
        PlotKind::Scatter | PlotKind::Bar | PlotKind::Line | PlotKind::Area => {
            check_columns(table, spec)?;
            build_xy(table, spec)
        }
        PlotKind::Box => {
            // Box plots pair no x-axis; only the y columns must exist.
            for y in &spec.y_axes {
                if !table.has_column(y) {
                    return Err(invalid_column(y));
                }
            }
            build_box(table, spec)
        }
    };

    Ok(PlotData {
        data,
        layout: layout_for(spec),
    })
}

/// Pie: x required, at most one y, x values must be unique and
/// present in every row. One series: labels in first-appearance
/// order, values from the y column when given, else per-label
/// frequency counts.
fn build_pie(table: &DataTable, spec: &PlotSpec) -> Result<Vec<Series>> {
    let x = require_x(spec)?;
    if !table.has_column(x) {
        return Err(invalid_column(x));
    }
    if spec.y_axes.len() > 1 {
        return Err(CanvassError::validation(
            "pie_single_y_axis",
            "Pie chart supports only one Y-axis variable",
            ORIGIN,
        )
        .with_context("field", "y_axes"));
    }
    if let Some(y) = spec.y_axes.first() {
        if !table.has_column(y) {
            return Err(invalid_column(y));
        }
    }

    // One label per row: a duplicate or a missing cell both break the
    // label/value alignment.
    let labels = table.unique_values(x);
    if labels.len() != table.row_count() {
        return Err(CanvassError::validation(
            "pie_duplicate_labels",
            "x_axis must have unique values for pie charts",
            ORIGIN,
        )
        .with_context("column", x.clone()));
    }

    let values = match spec.y_axes.first() {
        Some(y) => table.values(y),
        None => table
            .counts_for(x, &labels)
            .into_iter()
            .map(|n| Value::Number(n.into()))
            .collect(),
    };

    let mut series = Series::new(PlotKind::Pie.trace_type());
    series.labels = Some(labels);
    series.values = Some(values);
    Ok(vec![series])
}

/// Heatmap: x and at least one y required, no missing values in any of
/// them. One series: z is the row-major matrix of the y columns, x the
/// x column's values, y the list of y column names.
fn build_heatmap(table: &DataTable, spec: &PlotSpec) -> Result<Vec<Series>> {
    let x = require_x(spec)?;
    if spec.y_axes.is_empty() {
        return Err(CanvassError::validation(
            "y_axes_required",
            "x_axis and y_axes are required for heatmaps",
            ORIGIN,
        )
        .with_context("field", "y_axes"));
    }
    check_columns(table, spec)?;

    let mut with_missing: Vec<&String> = Vec::new();
    if table.has_missing(x) {
        with_missing.push(x);
    }
    with_missing.extend(spec.y_axes.iter().filter(|y| table.has_missing(y)));
    if let Some(column) = with_missing.first() {
        return Err(CanvassError::validation(
            "heatmap_missing_values",
            "x_axis and y_axes must not contain null values for heatmaps",
            ORIGIN,
        )
        .with_context("column", (*column).clone()));
    }

    let mut series = Series::new(PlotKind::Heatmap.trace_type());
    series.z = Some(table.matrix(&spec.y_axes));
    series.x = Some(table.values(x));
    series.y = Some(
        spec.y_axes
            .iter()
            .map(|y| Value::String(y.clone()))
            .collect::<Vec<_>>(),
    );
    Ok(vec![series])
}

/// Scatter, line, bar, area: one series per y column with parallel
/// x/y sequences. Scatter and line connect points with markers; area
/// fills down to the zero baseline.
fn build_xy(table: &DataTable, spec: &PlotSpec) -> Vec<Series> {
    let x = spec.x_axis.as_deref().unwrap_or_default();
    spec.y_axes
        .iter()
        .map(|y| {
            let mut series = Series::new(spec.plot_type.trace_type());
            series.x = Some(table.values(x));
            series.y = Some(table.values(y));
            series.name = Some(y.clone());
            match spec.plot_type {
                PlotKind::Scatter | PlotKind::Line => series.mode = Some("lines+markers"),
                PlotKind::Area => series.fill = Some("tozeroy"),
                _ => {}
            }
            series
        })
        .collect()
}

/// Box: one series per y column with only that column's values.
fn build_box(table: &DataTable, spec: &PlotSpec) -> Vec<Series> {
    spec.y_axes
        .iter()
        .map(|y| {
            let mut series = Series::new(PlotKind::Box.trace_type());
            series.y = Some(table.values(y));
            series.name = Some(y.clone());
            series
        })
        .collect()
}

fn layout_for(spec: &PlotSpec) -> Layout {
    let x = spec.x_axis.clone().unwrap_or_default();
    let ys = spec.y_axes.join(", ");
    match spec.plot_type {
        PlotKind::Pie => Layout {
            title: format!("Pie Chart of {x}"),
            xaxis: None,
            yaxis: None,
        },
        PlotKind::Heatmap => Layout {
            title: format!("Heatmap of {ys} by {x}"),
            xaxis: None,
            yaxis: None,
        },
        _ => Layout {
            title: format!("{ys} vs {x}"),
            xaxis: Some(AxisTitle { title: x }),
            yaxis: Some(AxisTitle { title: ys }),
        },
    }
}

//! CSV analytics: tabular loading, chart-ready series construction,
//! group-by aggregation, and report export.
//!
//! - [`table`] - `DataTable`: one in-memory CSV load
//! - [`plot`] - per-type validation and series construction
//! - [`group`] - frequency counts per column
//! - [`report`] - HTML report and the PDF renderer seam
//!
//! The plot builder and aggregator depend only on [`table::DataTable`];
//! neither touches persistence.

pub mod group;
pub mod plot;
pub mod report;
pub mod table;

pub use group::group_by;
pub use plot::{build_plot, PlotData, PlotKind, PlotSpec};
pub use report::{render_html, render_pdf, PdfRenderer, TextPdfRenderer};
pub use table::DataTable;

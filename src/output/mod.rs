//! Output formatting module
//!
//! Renders run summaries and failure reports.

mod reporter;

pub use reporter::{write_report_to_file, OutputFormat, ResultReporter};

//! Output formatting module
//!
//! Renders aggregated metrics and run summaries for the console.

mod formatter;

pub use formatter::{write_run_to_file, OutputFormat, ResultFormatter};

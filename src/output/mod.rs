//! Output formatting module
//!
//! Final run reports and live console output.

mod formatter;
mod reporter;

pub use formatter::{write_report_to_file, OutputFormat, RunFormatter, RunReport};
pub use reporter::ConsoleReporter;

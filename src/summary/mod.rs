//! Run summary and exit codes
//!
//! Every run produces a `RunSummary`; `--summary-json` writes it to disk.

mod exit_code;
mod run_summary;

pub use exit_code::{ExitCode, Status};
pub use run_summary::{RunHeader, RunSummary, RUN_SUMMARY_SCHEMA_ID, RUN_SUMMARY_SCHEMA_VERSION};

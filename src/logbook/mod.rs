//! Log book: CSV records of received data frames and their offline analysis.
//!
//! [`LogBook`] collects a [`LogRecord`] per received data frame and writes one
//! file per rotation window. The [`analysis`] module reads those files back.

pub mod analysis;
mod writer;

pub use analysis::{AnalysisSettings, LogSummary, LoggedMetrics, analyze, grade, grade_bands};
pub use writer::{LogBook, LogRecord, log_path, write_log_file};

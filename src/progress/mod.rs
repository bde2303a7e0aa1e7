//! Evaluation progress: shared counters plus a periodic reporter.

pub mod reporter;
pub mod tracker;

pub use reporter::{
    LogReporter, ProgressReporter, ReporterHandle, finish_guarded, report_guarded,
    spawn_progress_reporter,
};
pub use tracker::{ProgressSnapshot, ProgressTracker};

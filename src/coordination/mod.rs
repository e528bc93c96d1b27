//! Sequential dataset loading and per-run outcome reporting

pub mod loader;
pub mod outcome;

pub use loader::{Loader, LoaderOptionsBuilder};
pub use outcome::{DatasetFailure, DatasetOutcome, DatasetStats, RunSummary};

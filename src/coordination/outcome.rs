use std::time::Duration;
use uuid::Uuid;

use crate::error::{ErrorKind, LoadError};

/// Counters for one successfully loaded dataset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatasetStats {
    pub files: usize,
    pub batches: usize,
    pub rows: u64,
}

/// Why a dataset failed, flattened for reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&LoadError> for DatasetFailure {
    fn from(err: &LoadError) -> Self {
        Self {
            kind: err.kind(),
            message: format!("{:#}", err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatasetOutcome {
    pub dataset: String,
    pub result: Result<DatasetStats, DatasetFailure>,
    pub duration: Duration,
}

impl DatasetOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Result of a whole run, one outcome per requested dataset in run order
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub outcomes: Vec<DatasetOutcome>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// Rows appended by datasets that completed
    pub fn rows_loaded(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(|stats| stats.rows)
            .sum()
    }

    pub fn outcome(&self, dataset: &str) -> Option<&DatasetOutcome> {
        self.outcomes.iter().find(|o| o.dataset == dataset)
    }
}

//! Error types shared by the resolver, reader and loader layers.

use std::fmt;
use std::path::PathBuf;

/// Classification of a [`LoadError`], reported per dataset in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A schema entry or a source file does not exist.
    NotFound,
    /// The schema document or the configuration is malformed.
    Validation,
    /// A dataset has no partition files.
    NoData,
    /// Anything else: connectivity, parse errors, type mismatches.
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::NoData => "no_data",
            ErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Dataset '{0}' not found in schema document")]
    DatasetNotFound(String),

    #[error("CSV file '{}' not found", .0.display())]
    FileNotFound(PathBuf),

    #[error("Some columns in dataset '{dataset}' are missing the sorting key '{key}'")]
    MissingSortKey { dataset: String, key: &'static str },

    #[error("Column descriptor {index} of dataset '{dataset}' has no column_name")]
    MissingColumnName { dataset: String, index: usize },

    #[error("Column descriptors of dataset '{dataset}' are malformed: {reason}")]
    MalformedDescriptors { dataset: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No files found for {0}")]
    NoData(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::DatasetNotFound(_) | LoadError::FileNotFound(_) => ErrorKind::NotFound,
            LoadError::MissingSortKey { .. }
            | LoadError::MissingColumnName { .. }
            | LoadError::MalformedDescriptors { .. }
            | LoadError::InvalidConfig(_) => ErrorKind::Validation,
            LoadError::NoData(_) => ErrorKind::NoData,
            LoadError::Other(_) => ErrorKind::Other,
        }
    }
}

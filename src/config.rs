//! Configuration constants for the dataset loader
//!
//! This module centralizes the tunable parameters and file-layout conventions
//! used throughout the application.

use std::time::Duration;

// ============================================================================
// Source Layout
// ============================================================================

/// Name of the schema document inside the source base directory
pub const SCHEMA_FILE_NAME: &str = "schemas.json";

/// File name prefix shared by every partition file of a dataset
pub const PARTITION_PREFIX: &str = "part-";

/// Descriptor key that defines left-to-right column order
pub const SORT_KEY: &str = "column_position";

// ============================================================================
// Reader Configuration
// ============================================================================

/// Number of records per row batch handed to the table writer
///
/// Bounds the memory held for one dataset at any time: only one batch is
/// materialized while it is being appended.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

// ============================================================================
// Database Configuration
// ============================================================================

pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// The loader is sequential, so a couple of connections is plenty.
pub const MAX_CONNECTIONS: u32 = 2;

/// Upper bound on bind parameters in one Postgres statement
pub const MAX_BIND_PARAMS: usize = 65_535;

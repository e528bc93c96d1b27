//! High-level runner API for the dataset loader.
//!
//! This module provides a simplified public interface that encapsulates the
//! setup of the schema document, the connection pool, the table writer and the
//! loader. It is the API used by the CLI.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::catalog::SchemaDocument;
use crate::coordination::{Loader, LoaderOptionsBuilder};
use crate::db::{self as db_pool, BatchWriter};
use crate::formats::{DelimitedConfig, ReaderConfig};
use crate::telemetry::{ProgressStats, TelemetryEvent, spawn_progress_display};

pub use crate::coordination::{DatasetFailure, DatasetOutcome, DatasetStats, RunSummary};
pub use crate::db::{ConnectionTarget, ConnectionTargetBuilder};
pub use crate::error::{ErrorKind, LoadError};

/// Arguments for running a load
#[derive(Debug, Clone)]
pub struct LoadArgs {
    // Source configuration
    pub base_dir: PathBuf,
    pub delimiter: String,
    pub chunk_size: usize,

    // Destination
    pub connection: ConnectionTarget,
    pub insert_batch_size: usize,
    pub create_tables: bool,

    pub quiet: bool,

    // Test-only: inject a pre-created pool (for SQLite testing)
    #[cfg(test)]
    pub test_pool: Option<crate::db::pool::Pool>,
}

impl LoadArgs {
    fn reader_config(&self) -> Result<ReaderConfig> {
        let config = ReaderConfig {
            chunk_size: self.chunk_size,
            delimited: DelimitedConfig::csv().with_delimiter(&self.delimiter)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<ReaderConfig> {
        if self.insert_batch_size == 0 {
            return Err(LoadError::InvalidConfig(
                "insert_batch_size must be greater than zero".to_string(),
            )
            .into());
        }
        self.reader_config()
    }
}

/// What a load would do for one dataset
#[derive(Debug, Clone)]
pub struct DatasetPlan {
    pub dataset: String,
    pub result: Result<PlannedLoad, DatasetFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLoad {
    pub columns: Vec<String>,
    pub partitions: Vec<PathBuf>,
}

/// Resolve columns and partitions of every requested dataset without touching
/// the database.
pub fn plan_load(args: &LoadArgs, datasets: &[String]) -> Result<Vec<DatasetPlan>> {
    args.validate()?;
    let schemas = SchemaDocument::load(&args.base_dir)?;

    let datasets = if datasets.is_empty() {
        schemas.dataset_names()
    } else {
        datasets.to_vec()
    };

    Ok(datasets
        .into_iter()
        .map(|dataset| {
            let result = schemas
                .resolve_columns(&dataset)
                .and_then(|columns| {
                    let partitions = crate::io::list_partitions(&args.base_dir, &dataset)?;
                    Ok(PlannedLoad {
                        columns,
                        partitions: partitions.into_iter().collect(),
                    })
                })
                .map_err(|e| DatasetFailure::from(&e));
            DatasetPlan { dataset, result }
        })
        .collect())
}

/// Load the requested datasets (all of them when `datasets` is empty).
///
/// Fails only on setup errors: invalid arguments, an unreadable schema
/// document or an unreachable database. Per-dataset failures are reported in
/// the returned [`RunSummary`]. The pool is closed before returning.
///
/// # Example
///
/// ```no_run
/// use dataset_loader::runner::{ConnectionTargetBuilder, LoadArgs, run_load};
///
/// # async fn example() -> anyhow::Result<()> {
/// let args = LoadArgs {
///     base_dir: "/data/retail_db".into(),
///     delimiter: ",".to_string(),
///     chunk_size: 10_000,
///     connection: ConnectionTargetBuilder::default()
///         .database("retail_db")
///         .username("retail_user")
///         .password("secret")
///         .build()?,
///     insert_batch_size: 1_000,
///     create_tables: true,
///     quiet: true,
/// };
///
/// let summary = run_load(args, &["orders".to_string()]).await?;
/// println!("Loaded {} rows in {:?}", summary.rows_loaded(), summary.duration);
/// # Ok(())
/// # }
/// ```
pub async fn run_load(args: LoadArgs, datasets: &[String]) -> Result<RunSummary> {
    let reader = args.validate()?;
    let schemas = Arc::new(SchemaDocument::load(&args.base_dir)?);
    let options = LoaderOptionsBuilder::default()
        .reader(reader)
        .create_tables(args.create_tables)
        .build()?;

    // Create connection pool (or use test pool if provided)
    #[cfg(test)]
    let pool = if let Some(test_pool) = args.test_pool {
        test_pool
    } else {
        db_pool::pool::pool(&args.connection).await?
    };

    #[cfg(not(test))]
    let pool = db_pool::pool::pool(&args.connection).await?;

    let writer = Arc::new(BatchWriter::new(pool.clone(), args.insert_batch_size));
    let mut loader = Loader::new(&args.base_dir, schemas, writer, options);

    let progress = if args.quiet {
        None
    } else {
        let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel::<TelemetryEvent>();
        loader = loader.with_telemetry(telemetry_tx);
        Some(spawn_progress_display(telemetry_rx))
    };

    let summary = loader.run(Some(datasets)).await;

    // Dropping the loader closes the telemetry channel and ends the display
    drop(loader);
    finish_progress(progress).await;

    pool.close().await;
    Ok(summary)
}

/// Wait for the progress display to drain. A failed display never fails the run.
async fn finish_progress(progress: Option<JoinHandle<ProgressStats>>) -> Option<ProgressStats> {
    match progress?.await {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!("Progress display task failed: {}", e);
            None
        }
    }
}

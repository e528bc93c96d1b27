use derive_builder::Builder;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::outcome::{DatasetFailure, DatasetOutcome, DatasetStats, RunSummary};
use crate::catalog::SchemaDocument;
use crate::db::{TableSchema, TableWriter};
use crate::error::LoadError;
use crate::formats::{ReaderConfig, RowBatch, read_partition};
use crate::io::list_partitions;
use crate::telemetry::TelemetryEvent;

/// Per-run loader settings
#[derive(Debug, Clone, Builder)]
pub struct LoaderOptions {
    #[builder(default)]
    pub reader: ReaderConfig,
    /// Create destination tables that do not exist yet
    #[builder(default = "true")]
    pub create_tables: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            reader: ReaderConfig::default(),
            create_tables: true,
        }
    }
}

/// Loads datasets one at a time into the table named after each dataset.
///
/// Every step is awaited before the next batch is read, so at most one batch
/// is in flight. Each batch is appended in its own transaction: a failure
/// part way through a dataset leaves the earlier batches in the table.
pub struct Loader {
    base_dir: PathBuf,
    schemas: Arc<SchemaDocument>,
    writer: Arc<dyn TableWriter>,
    options: LoaderOptions,
    telemetry_tx: Option<mpsc::UnboundedSender<TelemetryEvent>>,
}

impl Loader {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        schemas: Arc<SchemaDocument>,
        writer: Arc<dyn TableWriter>,
        options: LoaderOptions,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            schemas,
            writer,
            options,
            telemetry_tx: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>) -> Self {
        self.telemetry_tx = Some(telemetry_tx);
        self
    }

    fn emit(&self, event: TelemetryEvent) {
        if let Some(tx) = &self.telemetry_tx {
            let _ = tx.send(event);
        }
    }

    /// Append every partition of `dataset` to the table of the same name.
    ///
    /// Errors are returned as-is; nothing already appended is undone.
    pub async fn load_dataset(&self, dataset: &str) -> Result<DatasetStats, LoadError> {
        let partitions = list_partitions(&self.base_dir, dataset)?;
        let mut stats = DatasetStats::default();
        let mut table: Option<TableSchema> = None;

        for path in &partitions {
            let reader = read_partition(path, &self.schemas, &self.options.reader)?;
            stats.files += 1;

            for batch in reader {
                let batch = batch?;
                let schema = match table.take() {
                    Some(schema) => schema,
                    None => self.prepare_table(dataset, &batch).await?,
                };

                info!("Populating chunk {} of {}", batch.chunk_index, dataset);
                let started = Instant::now();
                let rows = self.writer.append(&schema, &batch).await?;
                table = Some(schema);

                stats.batches += 1;
                stats.rows += rows;
                self.emit(TelemetryEvent::BatchLoaded {
                    dataset: dataset.to_string(),
                    chunk_index: batch.chunk_index,
                    records_loaded: rows,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
        }

        Ok(stats)
    }

    async fn prepare_table(
        &self,
        dataset: &str,
        sample: &RowBatch,
    ) -> Result<TableSchema, LoadError> {
        let specs = self.schemas.resolve_column_specs(dataset)?;
        let schema = self
            .writer
            .prepare_table(dataset, &specs, sample, self.options.create_tables)
            .await?;
        Ok(schema)
    }

    /// Load the named datasets in order, or every dataset of the schema
    /// document (ascending by name) when none are given.
    ///
    /// A failing dataset is recorded and the run moves on to the next one.
    pub async fn run(&self, datasets: Option<&[String]>) -> RunSummary {
        let run_id = Uuid::new_v4();
        let start_time = Instant::now();

        let datasets = match datasets {
            Some(names) if !names.is_empty() => names.to_vec(),
            _ => self.schemas.dataset_names(),
        };
        info!(%run_id, datasets = datasets.len(), "Starting load run");

        let mut outcomes = Vec::with_capacity(datasets.len());
        for dataset in datasets {
            self.emit(TelemetryEvent::DatasetStarted {
                dataset: dataset.clone(),
            });
            let started = Instant::now();

            let result = match self.load_dataset(&dataset).await {
                Ok(stats) => {
                    info!(
                        dataset = %dataset,
                        rows = stats.rows,
                        files = stats.files,
                        "Loaded dataset"
                    );
                    Ok(stats)
                }
                Err(err) => {
                    warn!(
                        dataset = %dataset,
                        kind = %err.kind(),
                        "Failed to load dataset: {:#}",
                        err
                    );
                    Err(DatasetFailure::from(&err))
                }
            };

            self.emit(TelemetryEvent::DatasetFinished {
                dataset: dataset.clone(),
                succeeded: result.is_ok(),
            });
            info!("Done with {}", dataset);

            outcomes.push(DatasetOutcome {
                dataset,
                result,
                duration: started.elapsed(),
            });
        }

        RunSummary {
            run_id,
            outcomes,
            duration: start_time.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnSpec;
    use crate::db::schema::infer_table_schema;
    use crate::error::ErrorKind;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records appended rows; fails the append call with the given index
    #[derive(Default)]
    struct RecordingWriter {
        prepared: Mutex<Vec<String>>,
        appended: Mutex<Vec<(String, Vec<Vec<String>>)>>,
        fail_on_append: Option<usize>,
        calls: Mutex<usize>,
    }

    impl RecordingWriter {
        fn failing_on(call: usize) -> Self {
            Self {
                fail_on_append: Some(call),
                ..Self::default()
            }
        }

        fn rows_for(&self, table: &str) -> Vec<Vec<String>> {
            self.appended
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _)| t == table)
                .flat_map(|(_, rows)| rows.clone())
                .collect()
        }
    }

    #[async_trait]
    impl TableWriter for RecordingWriter {
        async fn prepare_table(
            &self,
            table: &str,
            columns: &[ColumnSpec],
            sample: &RowBatch,
            _create_if_missing: bool,
        ) -> anyhow::Result<TableSchema> {
            self.prepared.lock().unwrap().push(table.to_string());
            Ok(infer_table_schema(table, columns, sample))
        }

        async fn append(&self, table: &TableSchema, batch: &RowBatch) -> anyhow::Result<u64> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls - 1
            };
            if self.fail_on_append == Some(call) {
                anyhow::bail!("connection reset");
            }
            let rows = batch.records.iter().map(|r| r.fields.clone()).collect();
            self.appended
                .lock()
                .unwrap()
                .push((table.name.clone(), rows));
            Ok(batch.len() as u64)
        }
    }

    fn write_dataset(base: &TempDir, dataset: &str, files: &[(&str, &str)]) {
        let dir = base.path().join(dataset);
        std::fs::create_dir_all(&dir).unwrap();
        for (name, content) in files {
            std::fs::write(dir.join(name), content).unwrap();
        }
    }

    fn fixture() -> (TempDir, Arc<SchemaDocument>) {
        let base = TempDir::new().unwrap();
        let schemas = SchemaDocument::from_json_str(
            r#"{
                "a": [{"column_name": "id", "column_position": 1}],
                "b": [
                    {"column_name": "y", "column_position": 2},
                    {"column_name": "x", "column_position": 1}
                ],
                "missing_ds": [{"column_name": "id", "column_position": 1}]
            }"#,
        )
        .unwrap();
        write_dataset(&base, "a", &[("part-00000", "1\n2\n3\n")]);
        write_dataset(
            &base,
            "b",
            &[("part-00001", "x3,y3\n"), ("part-00000", "x1,y1\nx2,y2\n")],
        );
        (base, Arc::new(schemas))
    }

    fn loader(
        base: &TempDir,
        schemas: Arc<SchemaDocument>,
        writer: Arc<RecordingWriter>,
    ) -> Loader {
        let options = LoaderOptionsBuilder::default()
            .reader(ReaderConfig::new(2))
            .build()
            .unwrap();
        Loader::new(base.path(), schemas, writer, options)
    }

    #[tokio::test]
    async fn test_load_dataset_in_file_and_row_order() {
        let (base, schemas) = fixture();
        let writer = Arc::new(RecordingWriter::default());
        let loader = loader(&base, schemas, writer.clone());

        let stats = loader.load_dataset("b").await.unwrap();

        assert_eq!(
            stats,
            DatasetStats {
                files: 2,
                batches: 2,
                rows: 3
            }
        );
        assert_eq!(
            writer.rows_for("b"),
            vec![
                vec!["x1".to_string(), "y1".to_string()],
                vec!["x2".to_string(), "y2".to_string()],
                vec!["x3".to_string(), "y3".to_string()],
            ]
        );
        assert_eq!(*writer.prepared.lock().unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_load_dataset_without_partitions_is_no_data() {
        let (base, schemas) = fixture();
        let writer = Arc::new(RecordingWriter::default());
        let loader = loader(&base, schemas, writer.clone());

        let err = loader.load_dataset("missing_ds").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NoData);
        assert!(writer.prepared.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_earlier_batches() {
        let (base, schemas) = fixture();
        // "a" has 3 rows and chunk size 2: the second batch fails
        let writer = Arc::new(RecordingWriter::failing_on(1));
        let loader = loader(&base, schemas, writer.clone());

        let err = loader.load_dataset("a").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(
            writer.rows_for("a"),
            vec![vec!["1".to_string()], vec!["2".to_string()]]
        );
    }

    #[tokio::test]
    async fn test_run_continues_past_failed_dataset() {
        let (base, schemas) = fixture();
        let writer = Arc::new(RecordingWriter::default());
        let loader = loader(&base, schemas, writer.clone());

        let requested = vec!["a".to_string(), "missing_ds".to_string()];
        let summary = loader.run(Some(requested.as_slice())).await;

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.rows_loaded(), 3);
        let failure = summary
            .outcome("missing_ds")
            .unwrap()
            .result
            .clone()
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::NoData);
        assert_eq!(writer.rows_for("a").len(), 3);
    }

    #[tokio::test]
    async fn test_run_defaults_to_all_datasets_sorted() {
        let (base, schemas) = fixture();
        let writer = Arc::new(RecordingWriter::default());
        let loader = loader(&base, schemas, writer.clone());

        let summary = loader.run(None).await;
        let order: Vec<_> = summary.outcomes.iter().map(|o| o.dataset.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "missing_ds"]);

        let empty: Vec<String> = vec![];
        let summary = loader.run(Some(empty.as_slice())).await;
        assert_eq!(summary.outcomes.len(), 3);
    }

    #[tokio::test]
    async fn test_run_unknown_dataset_is_reported() {
        let (base, schemas) = fixture();
        write_dataset(&base, "ghost", &[("part-00000", "1\n")]);
        let loader = loader(&base, schemas, Arc::new(RecordingWriter::default()));

        let requested = vec!["ghost".to_string()];
        let summary = loader.run(Some(requested.as_slice())).await;

        let failure = summary.outcomes[0].result.clone().unwrap_err();
        assert_eq!(failure.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_run_emits_telemetry_for_every_dataset() {
        let (base, schemas) = fixture();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let loader =
            loader(&base, schemas, Arc::new(RecordingWriter::default())).with_telemetry(tx);

        loader.run(None).await;
        drop(loader);

        let mut stats = crate::telemetry::ProgressStats::new();
        while let Some(event) = rx.recv().await {
            stats.update(&event);
        }
        assert_eq!(stats.datasets_started, 3);
        assert_eq!(stats.datasets_succeeded, 2);
        assert_eq!(stats.datasets_failed, 1);
        // a: 2 batches, b: one per file
        assert_eq!(stats.batches_loaded, 4);
        assert_eq!(stats.records_loaded, 6);
    }
}

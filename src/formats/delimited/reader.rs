use anyhow::{Context, anyhow};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::catalog::SchemaDocument;
use crate::error::LoadError;
use crate::formats::reader::{ReaderConfig, Record, RowBatch};

/// Open a partition file as a lazy sequence of row batches.
///
/// The dataset name is the name of the file's parent directory; its columns
/// come from the schema document and are assigned to fields by position.
pub fn read_partition(
    path: &Path,
    schemas: &SchemaDocument,
    config: &ReaderConfig,
) -> Result<BatchReader, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound(path.to_path_buf()));
    }
    config.validate()?;

    let dataset = dataset_name_of(path)?;
    let columns = schemas.resolve_columns(dataset)?;

    let reader = config
        .delimited
        .reader_builder()
        .from_path(path)
        .with_context(|| format!("Failed to open partition file {}", path.display()))?;

    Ok(BatchReader {
        path: path.to_path_buf(),
        columns: Arc::from(columns),
        reader,
        chunk_size: config.chunk_size,
        next_chunk: 0,
        rows_read: 0,
        done: false,
    })
}

fn dataset_name_of(path: &Path) -> Result<&str, LoadError> {
    path.parent()
        .and_then(Path::file_name)
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            anyhow!(
                "Cannot derive a dataset name from the parent directory of {}",
                path.display()
            )
            .into()
        })
}

/// Single-pass iterator over the row batches of one partition file.
///
/// Yields at most `chunk_size` records per batch and stops after the first
/// error.
pub struct BatchReader {
    path: PathBuf,
    columns: Arc<[String]>,
    reader: csv::Reader<File>,
    chunk_size: usize,
    next_chunk: usize,
    rows_read: u64,
    done: bool,
}

impl BatchReader {
    fn to_record(&self, row: &csv::StringRecord) -> Result<Record, LoadError> {
        let expected = self.columns.len();
        if row.len() > expected {
            let line = row.position().map(|p| p.line()).unwrap_or(0);
            return Err(anyhow!(
                "{}:{}: row has {} fields but the schema defines {} columns",
                self.path.display(),
                line,
                row.len(),
                expected
            )
            .into());
        }

        let mut fields: Vec<String> = row.iter().map(str::to_string).collect();
        // Short rows load trailing columns as NULL
        fields.resize(expected, String::new());
        Ok(Record { fields })
    }

    fn fail(&mut self, err: LoadError) -> Option<Result<RowBatch, LoadError>> {
        self.done = true;
        Some(Err(err))
    }
}

impl Iterator for BatchReader {
    type Item = Result<RowBatch, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut records = Vec::with_capacity(self.chunk_size.min(4096));
        let mut row = csv::StringRecord::new();

        while records.len() < self.chunk_size {
            match self.reader.read_record(&mut row) {
                Ok(true) => match self.to_record(&row) {
                    Ok(record) => records.push(record),
                    Err(e) => return self.fail(e),
                },
                Ok(false) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    let err = anyhow::Error::new(e)
                        .context(format!("Failed to parse CSV record in {}", self.path.display()));
                    return self.fail(err.into());
                }
            }
        }

        if records.is_empty() {
            return None;
        }

        let batch = RowBatch {
            columns: Arc::clone(&self.columns),
            chunk_index: self.next_chunk,
            first_row: self.rows_read,
            records,
        };
        self.next_chunk += 1;
        self.rows_read += batch.len() as u64;
        Some(Ok(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn orders_schema() -> SchemaDocument {
        SchemaDocument::from_json_str(
            r#"{"orders": [
                {"column_name": "id", "column_position": 1},
                {"column_name": "amount", "column_position": 0}
            ]}"#,
        )
        .unwrap()
    }

    fn write_partition(dir: &TempDir, dataset: &str, name: &str, content: &str) -> PathBuf {
        let dataset_dir = dir.path().join(dataset);
        std::fs::create_dir_all(&dataset_dir).unwrap();
        let path = dataset_dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_headerless_rows_use_resolved_columns() {
        let dir = TempDir::new().unwrap();
        let path = write_partition(&dir, "orders", "part-00000", "5,10.0\n6,20.0\n");

        let config = ReaderConfig::new(10);
        let batches: Vec<RowBatch> = read_partition(&path, &orders_schema(), &config)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(&*batch.columns, &["amount".to_string(), "id".to_string()]);
        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch.named(0).collect::<Vec<_>>(),
            vec![("amount", "5"), ("id", "10.0")]
        );
        assert_eq!(
            batch.named(1).collect::<Vec<_>>(),
            vec![("amount", "6"), ("id", "20.0")]
        );
    }

    #[test]
    fn test_chunking_preserves_every_row() {
        let dir = TempDir::new().unwrap();
        let mut content = String::new();
        for i in 0..25 {
            content.push_str(&format!("{},{}.5\n", i, i));
        }
        let path = write_partition(&dir, "orders", "part-00000", &content);

        let config = ReaderConfig::new(10);
        let batches: Vec<RowBatch> = read_partition(&path, &orders_schema(), &config)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(batches.len(), 3);
        assert_eq!(
            batches.iter().map(RowBatch::len).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
        assert_eq!(
            batches.iter().map(|b| b.chunk_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(
            batches.iter().map(|b| b.first_row).collect::<Vec<_>>(),
            vec![0, 10, 20]
        );

        let amounts: Vec<String> = batches
            .iter()
            .flat_map(|b| b.records.iter().map(|r| r.fields[0].clone()))
            .collect();
        let expected: Vec<String> = (0..25).map(|i| i.to_string()).collect();
        assert_eq!(amounts, expected);
    }

    #[test]
    fn test_exact_multiple_of_chunk_size() {
        let dir = TempDir::new().unwrap();
        let path = write_partition(&dir, "orders", "part-00000", "1,a\n2,b\n3,c\n4,d\n");

        let mut reader = read_partition(&path, &orders_schema(), &ReaderConfig::new(2)).unwrap();
        assert_eq!(reader.next().unwrap().unwrap().len(), 2);
        assert_eq!(reader.next().unwrap().unwrap().len(), 2);
        assert!(reader.next().is_none());
        // Single pass: once consumed it stays exhausted
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_empty_file_yields_no_batches() {
        let dir = TempDir::new().unwrap();
        let path = write_partition(&dir, "orders", "part-00000", "");

        let mut reader = read_partition(&path, &orders_schema(), &ReaderConfig::new(5)).unwrap();
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_quoted_fields_keep_delimiters() {
        let dir = TempDir::new().unwrap();
        let path = write_partition(&dir, "orders", "part-00000", "\"1,000\",x\n");

        let batch = read_partition(&path, &orders_schema(), &ReaderConfig::new(5))
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(batch.records[0].fields, vec!["1,000", "x"]);
    }

    #[test]
    fn test_short_rows_are_padded() {
        let dir = TempDir::new().unwrap();
        let path = write_partition(&dir, "orders", "part-00000", "7\n");

        let batch = read_partition(&path, &orders_schema(), &ReaderConfig::new(5))
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(batch.records[0].fields, vec!["7", ""]);
    }

    #[test]
    fn test_long_rows_fail_and_fuse() {
        let dir = TempDir::new().unwrap();
        let path = write_partition(&dir, "orders", "part-00000", "1,2\n1,2,3\n4,5\n");

        let mut reader = read_partition(&path, &orders_schema(), &ReaderConfig::new(5)).unwrap();
        let err = reader.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(err.to_string().contains("3 fields"));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("orders").join("part-99999");

        let err = read_partition(&path, &orders_schema(), &ReaderConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_dataset_taken_from_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = write_partition(&dir, "returns", "part-00000", "1,2\n");

        let err = read_partition(&path, &orders_schema(), &ReaderConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::DatasetNotFound(ref name) if name == "returns"));
    }

    #[test]
    fn test_resolver_validation_propagates() {
        let schemas =
            SchemaDocument::from_json_str(r#"{"orders": [{"column_name": "id"}]}"#).unwrap();
        let dir = TempDir::new().unwrap();
        let path = write_partition(&dir, "orders", "part-00000", "1\n");

        let err = read_partition(&path, &schemas, &ReaderConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_custom_delimiter() {
        let dir = TempDir::new().unwrap();
        let path = write_partition(&dir, "orders", "part-00000", "5|10.0\n");
        let mut config = ReaderConfig::new(5);
        config.delimited = config.delimited.with_delimiter("|").unwrap();

        let batch = read_partition(&path, &orders_schema(), &config)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(batch.records[0].fields, vec!["5", "10.0"]);
    }
}

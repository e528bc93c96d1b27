use std::sync::Arc;

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::LoadError;

/// A single record (row) from a partition file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub fields: Vec<String>,
}

/// A bounded run of consecutive records from one partition file
#[derive(Debug, Clone)]
pub struct RowBatch {
    /// Column names, positionally matching every record's fields
    pub columns: Arc<[String]>,
    pub records: Vec<Record>,
    /// Zero-based index of this batch within its file
    pub chunk_index: usize,
    /// Zero-based row offset of the first record within its file
    pub first_row: u64,
}

impl RowBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Pairs of (column name, raw value) for the record at `idx`
    pub fn named(&self, idx: usize) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.records[idx].fields.iter().map(String::as_str))
    }
}

/// Configuration for delimited file reading (CSV, TSV, etc.)
#[derive(Debug, Clone)]
pub struct DelimitedConfig {
    pub delimiter: u8,
    pub has_header: bool,
    pub quote: u8,
}

impl DelimitedConfig {
    /// Partition files are headerless exports; column names come from the schema document.
    pub fn csv() -> Self {
        Self::default()
    }

    /// Parse a delimiter given on the command line (`,`, `|`, `\t`, ...)
    pub fn with_delimiter(mut self, delimiter: &str) -> anyhow::Result<Self> {
        self.delimiter = if delimiter == "\\t" || delimiter == "\t" {
            b'\t'
        } else if delimiter.len() == 1 {
            delimiter.as_bytes()[0]
        } else {
            anyhow::bail!("Delimiter must be a single character or \\t");
        };
        Ok(self)
    }

    pub(crate) fn reader_builder(&self) -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .quote(self.quote)
            .has_headers(self.has_header)
            .flexible(true);
        builder
    }
}

impl Default for DelimitedConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_header: false,
            quote: b'"',
        }
    }
}

/// How partition files are parsed and chunked
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub chunk_size: usize,
    pub delimited: DelimitedConfig,
}

impl ReaderConfig {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            delimited: DelimitedConfig::csv(),
        }
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        if self.chunk_size == 0 {
            return Err(LoadError::InvalidConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_fields_follow_columns() {
        let batch = RowBatch {
            columns: Arc::from(vec!["amount".to_string(), "id".to_string()]),
            records: vec![Record {
                fields: vec!["5".to_string(), "10.0".to_string()],
            }],
            chunk_index: 0,
            first_row: 0,
        };

        let named: Vec<_> = batch.named(0).collect();
        assert_eq!(named, vec![("amount", "5"), ("id", "10.0")]);
    }

    #[test]
    fn test_delimiter_parsing() {
        assert_eq!(
            DelimitedConfig::csv().with_delimiter("|").unwrap().delimiter,
            b'|'
        );
        assert_eq!(
            DelimitedConfig::csv().with_delimiter("\\t").unwrap().delimiter,
            b'\t'
        );
        assert!(DelimitedConfig::csv().with_delimiter("||").is_err());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(ReaderConfig::new(0).validate().is_err());
        assert!(ReaderConfig::default().validate().is_ok());
        assert_eq!(ReaderConfig::default().chunk_size, 10_000);
    }
}

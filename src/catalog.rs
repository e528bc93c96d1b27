//! Schema document loading and column-order resolution

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::config::{SCHEMA_FILE_NAME, SORT_KEY};
use crate::error::LoadError;

/// One column entry of a dataset in `schemas.json`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ColumnDescriptor {
    #[serde(default)]
    pub column_name: Option<String>,
    #[serde(default)]
    pub column_position: Option<i64>,
    /// Declared source type, used when the destination table must be created
    #[serde(default)]
    pub data_type: Option<String>,
}

/// A resolved column: its name and optional declared type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: Option<String>,
}

/// Mapping from dataset name to its column descriptors.
///
/// Datasets are kept in a sorted map so that "load everything" runs visit
/// datasets in ascending name order. Descriptors stay untyped until a dataset
/// is resolved, so a malformed entry only fails its own dataset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct SchemaDocument {
    datasets: BTreeMap<String, Value>,
}

impl SchemaDocument {
    /// Read `<base_dir>/schemas.json`
    pub fn load(base_dir: &Path) -> Result<Self, LoadError> {
        let path = base_dir.join(SCHEMA_FILE_NAME);
        if !path.exists() {
            return Err(LoadError::FileNotFound(path));
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read schema document {}", path.display()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("Failed to parse schema document {}", path.display()))
            .map_err(LoadError::from)
    }

    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Dataset names in ascending order
    pub fn dataset_names(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }

    /// Column names of `dataset` sorted by `column_position`
    pub fn resolve_columns(&self, dataset: &str) -> Result<Vec<String>, LoadError> {
        Ok(self
            .resolve_column_specs(dataset)?
            .into_iter()
            .map(|spec| spec.name)
            .collect())
    }

    /// Like [`resolve_columns`](Self::resolve_columns), keeping declared types.
    ///
    /// The sort is stable, so descriptors sharing a position keep their
    /// document order.
    pub fn resolve_column_specs(&self, dataset: &str) -> Result<Vec<ColumnSpec>, LoadError> {
        let raw = self
            .datasets
            .get(dataset)
            .ok_or_else(|| LoadError::DatasetNotFound(dataset.to_string()))?;
        let descriptors = Vec::<ColumnDescriptor>::deserialize(raw).map_err(|e| {
            LoadError::MalformedDescriptors {
                dataset: dataset.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut positioned = Vec::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.iter().enumerate() {
            let position = descriptor
                .column_position
                .ok_or_else(|| LoadError::MissingSortKey {
                    dataset: dataset.to_string(),
                    key: SORT_KEY,
                })?;
            positioned.push((position, index, descriptor));
        }
        positioned.sort_by_key(|(position, _, _)| *position);

        if positioned.windows(2).any(|pair| pair[0].0 == pair[1].0) {
            warn!(dataset, "Duplicate column_position values; keeping document order for ties");
        }

        positioned
            .into_iter()
            .map(|(_, index, descriptor)| {
                let name = descriptor
                    .column_name
                    .clone()
                    .ok_or_else(|| LoadError::MissingColumnName {
                        dataset: dataset.to_string(),
                        index,
                    })?;
                Ok(ColumnSpec {
                    name,
                    data_type: descriptor.data_type.clone(),
                })
            })
            .collect()
    }
}

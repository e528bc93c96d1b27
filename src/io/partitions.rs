use anyhow::Context;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::PARTITION_PREFIX;
use crate::error::LoadError;

/// Find the partition files (`part-*`) of a dataset under `base_dir`.
///
/// A missing dataset directory is treated the same as an empty one.
pub fn list_partitions(base_dir: &Path, dataset: &str) -> Result<BTreeSet<PathBuf>, LoadError> {
    let dir = base_dir.join(dataset);
    let mut partitions = BTreeSet::new();

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => Some(entries),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context(format!("Failed to list dataset directory {}", dir.display()))
                .into());
        }
    };

    for entry in entries.into_iter().flatten() {
        let entry =
            entry.with_context(|| format!("Failed to list dataset directory {}", dir.display()))?;
        let path = entry.path();
        let is_partition = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(PARTITION_PREFIX));
        if is_partition && path.is_file() {
            partitions.insert(path);
        }
    }

    if partitions.is_empty() {
        return Err(LoadError::NoData(dataset.to_string()));
    }
    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_lists_only_partition_files() {
        let dir = TempDir::new().unwrap();
        let dataset_dir = dir.path().join("orders");
        std::fs::create_dir_all(dataset_dir.join("part-nested")).unwrap();
        std::fs::write(dataset_dir.join("part-00001"), "1,2\n").unwrap();
        std::fs::write(dataset_dir.join("part-00000"), "1,2\n").unwrap();
        std::fs::write(dataset_dir.join("_SUCCESS"), "").unwrap();
        std::fs::write(dataset_dir.join("notes.txt"), "").unwrap();

        let partitions = list_partitions(dir.path(), "orders").unwrap();
        let names: Vec<_> = partitions
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["part-00000", "part-00001"]);
    }

    #[test]
    fn test_empty_directory_is_no_data() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("orders")).unwrap();
        std::fs::write(dir.path().join("orders").join("_SUCCESS"), "").unwrap();

        let err = list_partitions(dir.path(), "orders").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoData);
    }

    #[test]
    fn test_missing_directory_is_no_data() {
        let dir = TempDir::new().unwrap();

        let err = list_partitions(dir.path(), "missing_ds").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoData);
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON and JSONL file operations.
//!
//! Whole-file writes go to a temporary sibling first and are renamed into
//! place, so a reader never observes a half-written export.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use super::{StorageError, StoragePaths, StorageResult};

/// File-backed export store.
#[derive(Debug, Clone)]
pub struct FileStore {
    paths: StoragePaths,
    initialized: bool,
}

impl FileStore {
    /// Does NOT create the directory structure. Call `initialize()` first.
    pub fn new(paths: StoragePaths) -> Self {
        Self {
            paths,
            initialized: false,
        }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Create the export directories. Idempotent.
    pub fn initialize(&mut self) -> StorageResult<()> {
        for dir in [self.paths.audit_dir(), self.paths.chains_dir()] {
            fs::create_dir_all(&dir)?;
        }
        self.initialized = true;
        Ok(())
    }

    fn ensure_initialized(&self) -> StorageResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(StorageError::NotInitialized)
        }
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        File::open(path.as_ref()).is_ok()
    }

    // ========== JSON ==========

    pub fn read_json<T: DeserializeOwned>(&self, path: impl AsRef<Path>) -> StorageResult<T> {
        self.ensure_initialized()?;
        let path = path.as_ref();
        let file = open_existing(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Write a JSON file (atomic write via rename).
    pub fn write_json<T: Serialize>(&self, path: impl AsRef<Path>, value: &T) -> StorageResult<()> {
        self.ensure_initialized()?;
        self.write_atomic(path.as_ref(), |writer| {
            serde_json::to_writer_pretty(&mut *writer, value)?;
            Ok(())
        })
    }

    // ========== JSONL ==========

    /// Read one value per non-empty line.
    pub fn read_jsonl<T: DeserializeOwned>(&self, path: impl AsRef<Path>) -> StorageResult<Vec<T>> {
        self.ensure_initialized()?;
        let file = open_existing(path.as_ref())?;

        let mut values = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            values.push(serde_json::from_str(&line)?);
        }
        Ok(values)
    }

    /// Replace the file with one JSON object per line (atomic write via rename).
    pub fn write_jsonl<T: Serialize>(&self, path: impl AsRef<Path>, values: &[T]) -> StorageResult<()> {
        self.ensure_initialized()?;
        self.write_atomic(path.as_ref(), |writer| {
            for value in values {
                serde_json::to_writer(&mut *writer, value)?;
                writer.write_all(b"\n")?;
            }
            Ok(())
        })
    }

    fn write_atomic(
        &self,
        path: &Path,
        body: impl FnOnce(&mut BufWriter<File>) -> StorageResult<()>,
    ) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("tmp");
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            body(&mut writer)?;
            writer.flush()?;
        }

        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

fn open_existing(path: &Path) -> StorageResult<File> {
    File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(path.display().to_string())
        } else {
            StorageError::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestData {
        id: String,
        value: i32,
    }

    fn setup() -> (TempDir, FileStore) {
        let temp = TempDir::new().unwrap();
        let mut store = FileStore::new(StoragePaths::new(temp.path()));
        store.initialize().unwrap();
        (temp, store)
    }

    #[test]
    fn initialize_creates_directories() {
        let (_temp, store) = setup();
        assert!(store.paths().audit_dir().exists());
        assert!(store.paths().chains_dir().exists());
    }

    #[test]
    fn write_and_read_json() {
        let (_temp, store) = setup();
        let data = TestData {
            id: "c-1".to_string(),
            value: 42,
        };
        let path = store.paths().chain_file("PT-1").unwrap();
        store.write_json(&path, &data).unwrap();

        let read: TestData = store.read_json(&path).unwrap();
        assert_eq!(read, data);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn jsonl_preserves_order_and_replaces() {
        let (_temp, store) = setup();
        let path = store.paths().audit_events_file("PT-1").unwrap();
        let rows: Vec<TestData> = (1..=3)
            .map(|i| TestData {
                id: format!("e-{i}"),
                value: i,
            })
            .collect();

        store.write_jsonl(&path, &rows).unwrap();
        store.write_jsonl(&path, &rows[..2]).unwrap();

        let read: Vec<TestData> = store.read_jsonl(&path).unwrap();
        assert_eq!(read, rows[..2].to_vec());
    }

    #[test]
    fn missing_file_is_not_found() {
        let (_temp, store) = setup();
        let path = store.paths().chain_file("nobody").unwrap();
        assert!(!store.exists(&path));
        assert!(matches!(
            store.read_json::<TestData>(&path),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn uninitialized_store_returns_error() {
        let store = FileStore::new(StoragePaths::new("/tmp/never-init"));
        let result = store.read_json::<TestData>("/tmp/any.json");
        assert!(matches!(result, Err(StorageError::NotInitialized)));
    }
}

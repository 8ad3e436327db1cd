// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path layout for exported audit streams and custody chains.

use std::path::{Path, PathBuf};

use super::{StorageError, StorageResult};

/// Default export root, relative to the working directory.
pub const DATA_ROOT: &str = "./data";

/// Storage path utilities.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

/// Reject identifiers that would escape their directory.
pub fn safe_segment(id: &str) -> StorageResult<&str> {
    let bad = id.is_empty()
        || id == "."
        || id.contains("..")
        || id.contains('/')
        || id.contains('\\')
        || id.contains('\0');
    if bad {
        return Err(StorageError::InvalidPath(id.to_string()));
    }
    Ok(id)
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========== Audit Paths ==========

    pub fn audit_dir(&self) -> PathBuf {
        self.root.join("audit")
    }

    /// Path to one stream's JSONL file.
    pub fn audit_events_file(&self, stream: &str) -> StorageResult<PathBuf> {
        Ok(self
            .audit_dir()
            .join(safe_segment(stream)?)
            .join("events.jsonl"))
    }

    // ========== Custody Chain Paths ==========

    pub fn chains_dir(&self) -> PathBuf {
        self.root.join("chains")
    }

    pub fn chain_file(&self, subject_id: &str) -> StorageResult<PathBuf> {
        Ok(self
            .chains_dir()
            .join(format!("{}.json", safe_segment(subject_id)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_use_data_root() {
        let paths = StoragePaths::default();
        assert_eq!(paths.root(), Path::new("./data"));
    }

    #[test]
    fn audit_and_chain_paths_are_correct() {
        let paths = StoragePaths::new("/tmp/test-data");
        assert_eq!(
            paths.audit_events_file("PT-1").unwrap(),
            PathBuf::from("/tmp/test-data/audit/PT-1/events.jsonl")
        );
        assert_eq!(
            paths.chain_file("PT-1").unwrap(),
            PathBuf::from("/tmp/test-data/chains/PT-1.json")
        );
    }

    #[test]
    fn traversal_is_rejected() {
        let paths = StoragePaths::default();
        for bad in ["", ".", "../etc", "a/b", "a\\b", "x..y"] {
            assert!(
                matches!(paths.chain_file(bad), Err(StorageError::InvalidPath(_))),
                "{bad:?}"
            );
        }
    }
}

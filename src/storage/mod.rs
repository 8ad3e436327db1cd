// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Export Storage
//!
//! Audit streams and custody chains live in memory while the process runs.
//! This module persists them as plain files so they can be re-verified
//! offline or by another process.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//!   audit/
//!     {subject_id}/events.jsonl   # one hash-chained stream per subject
//!   chains/
//!     {subject_id}.json           # ordered custody entries
//! ```
//!
//! Confidential payloads never reach this layer: chains hold only summary
//! fingerprints and audit entries hold only identifiers and details.

pub mod fs;
pub mod paths;

pub use fs::FileStore;
pub use paths::StoragePaths;

/// Error type for export storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage not initialized")]
    NotInitialized,

    #[error("identifier cannot be used as a path segment: {0:?}")]
    InvalidPath(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

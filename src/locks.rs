// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-subject serialization.
//!
//! Operations on the same subject must not interleave across the anchor call
//! (a race there forks a custody chain). Operations on different subjects
//! proceed in parallel. The table itself is guarded by a short std mutex that
//! is never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Map from subject id to an async mutex owning that subject's state.
pub struct SubjectTable<T> {
    table: Mutex<HashMap<String, Arc<AsyncMutex<T>>>>,
}

impl<T> Default for SubjectTable<T> {
    fn default() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Default> SubjectTable<T> {
    /// Lock the subject's slot, creating an empty one on first use.
    pub async fn lock(&self, subject_id: &str) -> OwnedMutexGuard<T> {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table.entry(subject_id.to_string()).or_default().clone()
        };
        slot.lock_owned().await
    }
}

impl<T> SubjectTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock an existing slot without creating one.
    pub async fn lock_existing(&self, subject_id: &str) -> Option<OwnedMutexGuard<T>> {
        let slot = {
            let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table.get(subject_id).cloned()
        }?;
        Some(slot.lock_owned().await)
    }

    /// Subjects that have a slot, sorted.
    pub fn subjects(&self) -> Vec<String> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = table.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Plain per-subject locks with no owned state.
pub type SubjectLocks = SubjectTable<()>;

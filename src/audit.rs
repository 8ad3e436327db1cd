// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Append-only, hash-chained audit log.
//!
//! Every operation across the consent ledger, access controller, custody
//! chain and record store lands here. Entries are grouped into one stream per
//! subject (entries without a subject go to [`GLOBAL_STREAM`]); within a
//! stream each entry records its `sequence` and the `own_hash` of its
//! predecessor, and its own hash covers every other field. Verification needs
//! nothing but the entries themselves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::ClockSource;
use crate::hasher::{fingerprint_parts, Digest};
use crate::storage::{FileStore, StorageResult};

/// Stream for entries that carry no subject.
pub const GLOBAL_STREAM: &str = "_global";

/// Actor recorded for entries the core writes on its own behalf.
pub const SYSTEM_ACTOR: &str = "system";

/// Types of auditable actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // Subject events
    SubjectRegistered,
    SubjectDeactivated,

    // Consent events
    ConsentGranted,
    ConsentRevoked,
    ConsentExpired,
    ConsentConsumed,
    EmergencyOverride,

    // Access events
    AccessDenied,

    // Custody events
    HandoffRecorded,

    // Record events
    RecordCreated,
    RecordUpdated,
    RecordRead,
    RecordDeleted,
    IntegrityFailure,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::SubjectRegistered => "subject_registered",
            AuditAction::SubjectDeactivated => "subject_deactivated",
            AuditAction::ConsentGranted => "consent_granted",
            AuditAction::ConsentRevoked => "consent_revoked",
            AuditAction::ConsentExpired => "consent_expired",
            AuditAction::ConsentConsumed => "consent_consumed",
            AuditAction::EmergencyOverride => "emergency_override",
            AuditAction::AccessDenied => "access_denied",
            AuditAction::HandoffRecorded => "handoff_recorded",
            AuditAction::RecordCreated => "record_created",
            AuditAction::RecordUpdated => "record_updated",
            AuditAction::RecordRead => "record_read",
            AuditAction::RecordDeleted => "record_deleted",
            AuditAction::IntegrityFailure => "integrity_failure",
        }
    }
}

/// An event about to be appended.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub actor: String,
    pub subject_id: Option<String>,
    pub record_id: Option<String>,
    pub detail: serde_json::Value,
}

impl AuditEvent {
    pub fn new(action: AuditAction, actor: impl Into<String>) -> Self {
        Self {
            action,
            actor: actor.into(),
            subject_id: None,
            record_id: None,
            detail: serde_json::Value::Null,
        }
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn with_record(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// A committed audit log entry. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: String,
    /// Position within the entry's stream, starting at 0.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub actor: String,
    pub subject_id: Option<String>,
    pub record_id: Option<String>,
    pub detail: serde_json::Value,
    /// `own_hash` of the previous entry in the stream.
    pub previous_hash: Option<Digest>,
    /// Hash over every field above.
    pub own_hash: Digest,
}

impl AuditEntry {
    /// Recompute the hash of this entry, ignoring the stored `own_hash`.
    pub fn compute_hash(&self) -> Digest {
        let sequence = self.sequence.to_be_bytes();
        let timestamp = self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let detail = self.detail.to_string();
        let previous = self.previous_hash.map(|d| d.to_hex()).unwrap_or_default();
        let subject = optional_part(&self.subject_id);
        let record = optional_part(&self.record_id);

        fingerprint_parts(&[
            self.id.as_bytes(),
            &sequence,
            timestamp.as_bytes(),
            self.action.as_str().as_bytes(),
            self.actor.as_bytes(),
            subject.as_bytes(),
            record.as_bytes(),
            detail.as_bytes(),
            previous.as_bytes(),
        ])
    }

    /// Stream this entry belongs to.
    pub fn stream(&self) -> &str {
        self.subject_id.as_deref().unwrap_or(GLOBAL_STREAM)
    }
}

// Distinguish `None` from `Some("")`.
fn optional_part(value: &Option<String>) -> String {
    match value {
        Some(v) => format!("1{v}"),
        None => "0".to_string(),
    }
}

/// Why an entry failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditIssueKind {
    HashMismatch { stored: Digest, recomputed: Digest },
    BrokenLink { expected: Option<Digest>, actual: Option<Digest> },
    SequenceGap { expected: u64, actual: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditIssue {
    pub index: usize,
    pub entry_id: String,
    #[serde(flatten)]
    pub kind: AuditIssueKind,
}

/// Result of verifying one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditVerification {
    pub valid: bool,
    pub issues: Vec<AuditIssue>,
}

/// In-memory audit log.
pub struct AuditLog {
    streams: Mutex<HashMap<String, Vec<AuditEntry>>>,
    clock: Arc<dyn ClockSource>,
}

impl AuditLog {
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<AuditEntry>>> {
        self.streams.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an event to its subject's stream.
    pub fn append(&self, event: AuditEvent) -> AuditEntry {
        let mut streams = self.lock();
        let key = event
            .subject_id
            .clone()
            .unwrap_or_else(|| GLOBAL_STREAM.to_string());
        let stream = streams.entry(key).or_default();

        let mut entry = AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            sequence: stream.len() as u64,
            timestamp: self.clock.now(),
            action: event.action,
            actor: event.actor,
            subject_id: event.subject_id,
            record_id: event.record_id,
            detail: event.detail,
            previous_hash: stream.last().map(|e| e.own_hash),
            own_hash: Digest::from_bytes([0; 32]),
        };
        entry.own_hash = entry.compute_hash();
        stream.push(entry.clone());

        tracing::trace!(
            action = entry.action.as_str(),
            stream = entry.stream(),
            sequence = entry.sequence,
            "Audit entry appended"
        );
        entry
    }

    /// Entries of one subject's stream, in insertion order.
    pub fn entries(&self, subject_id: &str) -> Vec<AuditEntry> {
        self.lock().get(subject_id).cloned().unwrap_or_default()
    }

    pub fn global_entries(&self) -> Vec<AuditEntry> {
        self.entries(GLOBAL_STREAM)
    }

    /// Stream names, sorted.
    pub fn streams(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Total number of entries across all streams.
    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count of entries with the given action across all streams.
    pub fn count(&self, action: AuditAction) -> usize {
        self.lock()
            .values()
            .flat_map(|s| s.iter())
            .filter(|e| e.action == action)
            .count()
    }

    /// Verify a complete stream: hashes, sequence and linkage.
    pub fn verify(entries: &[AuditEntry]) -> bool {
        Self::verify_report(entries).valid
    }

    /// Like [`AuditLog::verify`] but lists every problem found.
    pub fn verify_report(entries: &[AuditEntry]) -> AuditVerification {
        let mut issues = Vec::new();

        for (index, entry) in entries.iter().enumerate() {
            let recomputed = entry.compute_hash();
            if recomputed != entry.own_hash {
                issues.push(AuditIssue {
                    index,
                    entry_id: entry.id.clone(),
                    kind: AuditIssueKind::HashMismatch {
                        stored: entry.own_hash,
                        recomputed,
                    },
                });
            }

            if entry.sequence != index as u64 {
                issues.push(AuditIssue {
                    index,
                    entry_id: entry.id.clone(),
                    kind: AuditIssueKind::SequenceGap {
                        expected: index as u64,
                        actual: entry.sequence,
                    },
                });
            }

            let expected_previous = index.checked_sub(1).map(|i| entries[i].own_hash);
            if entry.previous_hash != expected_previous {
                issues.push(AuditIssue {
                    index,
                    entry_id: entry.id.clone(),
                    kind: AuditIssueKind::BrokenLink {
                        expected: expected_previous,
                        actual: entry.previous_hash,
                    },
                });
            }
        }

        AuditVerification {
            valid: issues.is_empty(),
            issues,
        }
    }

    /// Verify every stream held in memory.
    pub fn verify_all(&self) -> bool {
        self.lock().values().all(|s| Self::verify(s))
    }

    /// Write one stream to `{root}/audit/{stream}/events.jsonl`.
    pub fn export_stream(&self, store: &FileStore, stream: &str) -> StorageResult<usize> {
        let entries = self.entries(stream);
        let path = store.paths().audit_events_file(stream)?;
        store.write_jsonl(path, &entries)?;
        Ok(entries.len())
    }

    /// Read an exported stream back. Callers verify it with [`AuditLog::verify`].
    pub fn load_stream(store: &FileStore, stream: &str) -> StorageResult<Vec<AuditEntry>> {
        let path = store.paths().audit_events_file(stream)?;
        store.read_jsonl(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::storage::StoragePaths;
    use serde_json::json;
    use tempfile::TempDir;

    fn log() -> AuditLog {
        AuditLog::new(Arc::new(SystemClock))
    }

    fn seed(log: &AuditLog, subject: &str, n: usize) {
        for i in 0..n {
            log.append(
                AuditEvent::new(AuditAction::RecordRead, format!("dr-{i}"))
                    .with_subject(subject)
                    .with_record(format!("rec-{i}"))
                    .with_detail(json!({ "i": i })),
            );
        }
    }

    #[test]
    fn create_audit_event() {
        let event = AuditEvent::new(AuditAction::RecordCreated, "dr-1")
            .with_subject("PT-1")
            .with_record("rec-1");
        assert_eq!(event.action, AuditAction::RecordCreated);
        assert_eq!(event.subject_id.as_deref(), Some("PT-1"));
        assert_eq!(event.record_id.as_deref(), Some("rec-1"));
    }

    #[test]
    fn streams_are_hash_linked() {
        let log = log();
        seed(&log, "PT-1", 4);

        let entries = log.entries("PT-1");
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].previous_hash, None);
        for i in 1..entries.len() {
            assert_eq!(entries[i].previous_hash, Some(entries[i - 1].own_hash));
            assert_eq!(entries[i].sequence, i as u64);
        }
        assert!(AuditLog::verify(&entries));
    }

    #[test]
    fn subjects_get_independent_streams() {
        let log = log();
        seed(&log, "PT-1", 2);
        seed(&log, "PT-2", 3);
        log.append(AuditEvent::new(AuditAction::AccessDenied, "system"));

        assert_eq!(log.entries("PT-1").len(), 2);
        assert_eq!(log.entries("PT-2")[0].sequence, 0);
        assert_eq!(log.global_entries().len(), 1);
        assert_eq!(log.len(), 6);
        assert_eq!(log.count(AuditAction::RecordRead), 5);
        assert!(log.verify_all());
    }

    #[test]
    fn tampered_detail_is_detected() {
        let log = log();
        seed(&log, "PT-1", 3);
        let mut entries = log.entries("PT-1");
        entries[1].detail = json!({ "i": 99 });

        let report = AuditLog::verify_report(&entries);
        assert!(!report.valid);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].index, 1);
        assert!(matches!(
            report.issues[0].kind,
            AuditIssueKind::HashMismatch { .. }
        ));
    }

    #[test]
    fn removed_entry_is_detected() {
        let log = log();
        seed(&log, "PT-1", 3);
        let mut entries = log.entries("PT-1");
        entries.remove(1);

        let report = AuditLog::verify_report(&entries);
        assert!(!report.valid);
        assert!(report.issues.iter().all(|i| i.index == 1));
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i.kind, AuditIssueKind::BrokenLink { .. })));
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i.kind, AuditIssueKind::SequenceGap { expected: 1, actual: 2 })));
    }

    #[test]
    fn subject_none_and_empty_hash_differently() {
        let log = log();
        let entry = log.append(AuditEvent::new(AuditAction::AccessDenied, "x"));
        let mut altered = entry.clone();
        altered.record_id = Some(String::new());
        assert_ne!(entry.compute_hash(), altered.compute_hash());
    }

    #[test]
    fn export_and_reload_still_verifies() {
        let temp = TempDir::new().unwrap();
        let mut store = FileStore::new(StoragePaths::new(temp.path()));
        store.initialize().unwrap();

        let log = log();
        seed(&log, "PT-1", 5);
        assert_eq!(log.export_stream(&store, "PT-1").unwrap(), 5);

        let loaded = AuditLog::load_stream(&store, "PT-1").unwrap();
        assert_eq!(loaded, log.entries("PT-1"));
        assert!(AuditLog::verify(&loaded));
    }
}

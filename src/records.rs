// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Record Store
//!
//! Owns record payloads and their version history.
//!
//! - Payloads are encrypted through the configured [`CipherService`] before
//!   fingerprinting. Without a cipher only `normal` records are accepted.
//! - The fingerprint covers id, subject, category, sensitivity, creation time
//!   and stored payload, and is recomputed on every read.
//! - Every mutation is authorized, anchored and audited. Deletion is soft.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::anchor::{metadata, AnchorClient, AnchorReceipt};
use crate::audit::{AuditAction, AuditEvent, AuditLog};
use crate::auth::{AccessController, Actor, Authorization, Permission};
use crate::cipher::{CipherError, CipherService};
use crate::clock::ClockSource;
use crate::error::{CoreError, CoreResult};
use crate::hasher::{fingerprint_parts, Digest};
use crate::locks::SubjectLocks;
use crate::models::{Category, RecordStatus, Sensitivity};
use crate::subjects::SubjectRegistry;

// =============================================================================
// Types
// =============================================================================

/// A superseded version of a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordVersion {
    pub version: u32,
    pub fingerprint: Digest,
    pub timestamp: DateTime<Utc>,
    pub editor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: String,
    pub subject_id: String,
    pub category: Category,
    pub sensitivity: Sensitivity,
    /// Stored bytes; ciphertext when `encrypted` is set.
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,
    pub encrypted: bool,
    pub version: u32,
    pub version_history: Vec<RecordVersion>,
    pub status: RecordStatus,
    pub fingerprint: Digest,
    pub anchor_ref: AnchorReceipt,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deletion_reason: Option<String>,
}

impl Record {
    /// Fingerprint of the record as currently stored.
    pub fn compute_fingerprint(&self) -> Digest {
        record_fingerprint(
            &self.id,
            &self.subject_id,
            self.category,
            self.sensitivity,
            self.created_at,
            &self.payload,
        )
    }

    pub fn is_deleted(&self) -> bool {
        self.status == RecordStatus::Deleted
    }
}

fn record_fingerprint(
    id: &str,
    subject_id: &str,
    category: Category,
    sensitivity: Sensitivity,
    created_at: DateTime<Utc>,
    payload: &[u8],
) -> Digest {
    let created = created_at.to_rfc3339_opts(SecondsFormat::Nanos, true);
    fingerprint_parts(&[
        id.as_bytes(),
        subject_id.as_bytes(),
        category.as_str().as_bytes(),
        sensitivity.as_str().as_bytes(),
        created.as_bytes(),
        payload,
    ])
}

/// Partial update. Unset fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct RecordUpdate {
    pub payload: Option<Vec<u8>>,
    pub category: Option<Category>,
    pub sensitivity: Option<Sensitivity>,
}

impl RecordUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = Some(sensitivity);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub record_id: String,
    pub valid: bool,
    pub stored_fingerprint: Digest,
    pub recomputed_fingerprint: Digest,
}

// =============================================================================
// Store
// =============================================================================

pub struct RecordStore {
    records: Mutex<HashMap<String, Record>>,
    locks: SubjectLocks,
    access: Arc<AccessController>,
    subjects: Arc<SubjectRegistry>,
    anchor: Arc<dyn AnchorClient>,
    cipher: Option<Arc<dyn CipherService>>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn ClockSource>,
}

impl RecordStore {
    /// A store without a cipher accepts only `normal` records.
    pub fn new(
        access: Arc<AccessController>,
        subjects: Arc<SubjectRegistry>,
        anchor: Arc<dyn AnchorClient>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            locks: SubjectLocks::new(),
            access,
            subjects,
            anchor,
            cipher: None,
            audit,
            clock,
        }
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn CipherService>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Record>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn get(&self, record_id: &str) -> CoreResult<Record> {
        self.lock()
            .get(record_id)
            .cloned()
            .ok_or_else(|| CoreError::RecordNotFound(record_id.to_string()))
    }

    /// Encrypt for storage, or refuse if confidentiality is required and no
    /// cipher is configured.
    fn seal(&self, plaintext: &[u8], sensitivity: Sensitivity) -> CoreResult<(Vec<u8>, bool)> {
        match &self.cipher {
            Some(cipher) => Ok((cipher.encrypt(plaintext)?, true)),
            None if sensitivity.requires_encryption() => {
                Err(CipherError::Unavailable(sensitivity.as_str().to_string()).into())
            }
            None => Ok((plaintext.to_vec(), false)),
        }
    }

    async fn anchor_event(
        &self,
        digest: &Digest,
        kind: &str,
        record: &Record,
        sensitivity: Sensitivity,
        version: u32,
    ) -> CoreResult<AnchorReceipt> {
        let version = version.to_string();
        let meta = metadata([
            ("kind", kind),
            ("subject_id", record.subject_id.as_str()),
            ("record_id", record.id.as_str()),
            ("sensitivity", sensitivity.as_str()),
            ("version", version.as_str()),
        ]);
        Ok(self
            .anchor
            .submit(digest, &meta)
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    subject_id = %record.subject_id,
                    record_id = %record.id,
                    kind,
                    error = %e,
                    "Record event not anchored; nothing committed"
                )
            })?)
    }

    /// Sensitivity gate, then grant check. Nothing is spent yet.
    fn gate(
        &self,
        record: &Record,
        actor: &Actor,
        permission: Permission,
    ) -> CoreResult<Authorization> {
        self.access.check_sensitivity(
            &record.subject_id,
            &actor.id,
            actor.role,
            permission,
            record.sensitivity,
        )?;
        self.access.check_access(
            &record.subject_id,
            &actor.id,
            actor.role,
            permission,
            Some(record.category),
        )
    }

    // ========== Mutations ==========

    pub async fn create(
        &self,
        subject_id: &str,
        category: Category,
        payload: &[u8],
        sensitivity: Sensitivity,
        actor: &Actor,
    ) -> CoreResult<Record> {
        let _guard = self.locks.lock(subject_id).await;
        let authorization = self.access.check_access(
            subject_id,
            &actor.id,
            actor.role,
            Permission::Write,
            Some(category),
        )?;
        if !self.subjects.is_active(subject_id) {
            return Err(CoreError::SubjectNotFound(subject_id.to_string()));
        }
        let (stored, encrypted) = self.seal(payload, sensitivity)?;

        let now = self.clock.now();
        let id = uuid::Uuid::new_v4().to_string();
        let fingerprint = record_fingerprint(&id, subject_id, category, sensitivity, now, &stored);

        let mut record = Record {
            id,
            subject_id: subject_id.to_string(),
            category,
            sensitivity,
            payload: stored,
            encrypted,
            version: 1,
            version_history: Vec::new(),
            status: RecordStatus::Active,
            fingerprint,
            anchor_ref: AnchorReceipt::new(""),
            created_at: now,
            created_by: actor.id.clone(),
            updated_at: now,
            updated_by: actor.id.clone(),
            deleted_at: None,
            deletion_reason: None,
        };
        record.anchor_ref = self
            .anchor_event(&fingerprint, "record_create", &record, sensitivity, 1)
            .await?;
        self.access.commit(&authorization)?;

        self.lock().insert(record.id.clone(), record.clone());

        self.audit.append(
            AuditEvent::new(AuditAction::RecordCreated, &actor.id)
                .with_subject(subject_id)
                .with_record(&record.id)
                .with_detail(json!({
                    "role": actor.role,
                    "category": category,
                    "sensitivity": sensitivity,
                    "version": 1,
                    "fingerprint": fingerprint,
                    "anchor_ref": record.anchor_ref,
                })),
        );
        tracing::info!(
            subject_id,
            record_id = %record.id,
            category = category.as_str(),
            sensitivity = sensitivity.as_str(),
            "Record created"
        );
        Ok(record)
    }

    /// Apply `changes` as a new version. The prior version moves to history.
    pub async fn update(
        &self,
        record_id: &str,
        changes: RecordUpdate,
        actor: &Actor,
    ) -> CoreResult<Record> {
        let subject_id = self.get(record_id)?.subject_id;
        let _guard = self.locks.lock(&subject_id).await;
        let mut record = self.get(record_id)?;

        let category = changes.category.unwrap_or(record.category);
        let sensitivity = changes.sensitivity.unwrap_or(record.sensitivity);
        let mut authorizations = vec![self.gate(&record, actor, Permission::Write)?];
        if sensitivity != record.sensitivity {
            self.access.check_sensitivity(
                &subject_id,
                &actor.id,
                actor.role,
                Permission::Write,
                sensitivity,
            )?;
        }
        if category != record.category {
            let target = self.access.check_access(
                &subject_id,
                &actor.id,
                actor.role,
                Permission::Write,
                Some(category),
            )?;
            if target.grant_id() != authorizations[0].grant_id() {
                authorizations.push(target);
            }
        }
        if record.is_deleted() {
            return Err(CoreError::Validation(format!(
                "record {record_id} is deleted"
            )));
        }

        let (payload, encrypted) = match &changes.payload {
            Some(plaintext) => self.seal(plaintext, sensitivity)?,
            None if !record.encrypted && sensitivity.requires_encryption() => {
                self.seal(&record.payload, sensitivity)?
            }
            None => (record.payload.clone(), record.encrypted),
        };

        let now = self.clock.now();
        let version = record.version + 1;
        let fingerprint = record_fingerprint(
            &record.id,
            &record.subject_id,
            category,
            sensitivity,
            record.created_at,
            &payload,
        );
        let anchor_ref = self
            .anchor_event(&fingerprint, "record_update", &record, sensitivity, version)
            .await?;
        for authorization in &authorizations {
            self.access.commit(authorization)?;
        }

        let previous_fingerprint = record.fingerprint;
        record.version_history.push(RecordVersion {
            version: record.version,
            fingerprint: record.fingerprint,
            timestamp: record.updated_at,
            editor: record.updated_by.clone(),
        });
        record.version = version;
        record.category = category;
        record.sensitivity = sensitivity;
        record.payload = payload;
        record.encrypted = encrypted;
        record.fingerprint = fingerprint;
        record.anchor_ref = anchor_ref;
        record.updated_at = now;
        record.updated_by = actor.id.clone();

        self.lock().insert(record.id.clone(), record.clone());

        self.audit.append(
            AuditEvent::new(AuditAction::RecordUpdated, &actor.id)
                .with_subject(&record.subject_id)
                .with_record(&record.id)
                .with_detail(json!({
                    "role": actor.role,
                    "version": version,
                    "previous_fingerprint": previous_fingerprint,
                    "fingerprint": fingerprint,
                    "anchor_ref": record.anchor_ref,
                })),
        );
        tracing::info!(
            subject_id = %record.subject_id,
            record_id = %record.id,
            version,
            "Record updated"
        );
        Ok(record)
    }

    /// Mark a record deleted. The payload is retained.
    pub async fn soft_delete(&self, record_id: &str, actor: &Actor, reason: &str) -> CoreResult<()> {
        let subject_id = self.get(record_id)?.subject_id;
        let _guard = self.locks.lock(&subject_id).await;
        let mut record = self.get(record_id)?;
        let authorization = self.gate(&record, actor, Permission::Delete)?;
        if record.is_deleted() {
            return Err(CoreError::Validation(format!(
                "record {record_id} is already deleted"
            )));
        }

        let now = self.clock.now();
        let deleted_at = now.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let digest = fingerprint_parts(&[
            record.fingerprint.as_bytes(),
            b"deleted",
            reason.as_bytes(),
            deleted_at.as_bytes(),
        ]);
        let anchor_ref = self
            .anchor_event(&digest, "record_delete", &record, record.sensitivity, record.version)
            .await?;
        self.access.commit(&authorization)?;

        record.status = RecordStatus::Deleted;
        record.deleted_at = Some(now);
        record.deletion_reason = Some(reason.to_string());
        self.lock().insert(record.id.clone(), record.clone());

        self.audit.append(
            AuditEvent::new(AuditAction::RecordDeleted, &actor.id)
                .with_subject(&record.subject_id)
                .with_record(&record.id)
                .with_detail(json!({
                    "role": actor.role,
                    "reason": reason,
                    "anchor_ref": anchor_ref,
                })),
        );
        tracing::info!(
            subject_id = %record.subject_id,
            record_id = %record.id,
            reason,
            "Record soft-deleted"
        );
        Ok(())
    }

    // ========== Reads ==========

    /// Read a record as stored (payload possibly encrypted).
    ///
    /// Applies the sensitivity gate, the grant check and an integrity check.
    /// Deleted records read as not found, but only to authorized actors.
    pub fn read(&self, record_id: &str, actor: &Actor) -> CoreResult<Record> {
        let record = self.get(record_id)?;
        let authorization = self.gate(&record, actor, Permission::Read)?;
        if record.is_deleted() {
            return Err(CoreError::RecordNotFound(record_id.to_string()));
        }

        let recomputed = record.compute_fingerprint();
        if recomputed != record.fingerprint {
            tracing::warn!(
                subject_id = %record.subject_id,
                record_id,
                stored = %record.fingerprint,
                recomputed = %recomputed,
                "Record fingerprint mismatch"
            );
            self.audit.append(
                AuditEvent::new(AuditAction::IntegrityFailure, &actor.id)
                    .with_subject(&record.subject_id)
                    .with_record(record_id)
                    .with_detail(json!({
                        "stored_fingerprint": record.fingerprint,
                        "recomputed_fingerprint": recomputed,
                    })),
            );
            return Err(CoreError::IntegrityViolation {
                id: record_id.to_string(),
                expected: record.fingerprint.to_hex(),
                actual: recomputed.to_hex(),
            });
        }
        self.access.commit(&authorization)?;

        self.audit.append(
            AuditEvent::new(AuditAction::RecordRead, &actor.id)
                .with_subject(&record.subject_id)
                .with_record(record_id)
                .with_detail(json!({ "role": actor.role, "version": record.version })),
        );
        tracing::debug!(subject_id = %record.subject_id, record_id, "Record read");
        Ok(record)
    }

    /// Read and decrypt a record's payload.
    pub fn read_payload(&self, record_id: &str, actor: &Actor) -> CoreResult<Vec<u8>> {
        let record = self.read(record_id, actor)?;
        if !record.encrypted {
            return Ok(record.payload);
        }
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| CipherError::Unavailable(record.sensitivity.as_str().to_string()))?;
        Ok(cipher.decrypt(&record.payload)?)
    }

    /// Recompute the fingerprint from stored fields. Works on deleted records.
    pub fn verify_integrity(&self, record_id: &str) -> CoreResult<IntegrityReport> {
        let record = self.get(record_id)?;
        Ok(integrity_report(&record))
    }

    /// Integrity reports for every record, ordered by record id.
    pub fn verify_all(&self) -> Vec<IntegrityReport> {
        let mut reports: Vec<IntegrityReport> = self.lock().values().map(integrity_report).collect();
        reports.sort_by(|a, b| a.record_id.cmp(&b.record_id));
        reports
    }

    pub fn version_history(&self, record_id: &str) -> CoreResult<Vec<RecordVersion>> {
        Ok(self.get(record_id)?.version_history)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn integrity_report(record: &Record) -> IntegrityReport {
    let recomputed = record.compute_fingerprint();
    IntegrityReport {
        record_id: record.id.clone(),
        valid: recomputed == record.fingerprint,
        stored_fingerprint: record.fingerprint,
        recomputed_fingerprint: recomputed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::MemoryAnchor;
    use crate::auth::Role;
    use crate::cipher::SivCipher;
    use crate::clock::ManualClock;
    use crate::consent::{ConsentLedger, ConsentStatus, GrantRequest};
    use crate::models::SubjectKind;

    struct Fixture {
        anchor: Arc<MemoryAnchor>,
        audit: Arc<AuditLog>,
        access: Arc<AccessController>,
        subjects: Arc<SubjectRegistry>,
        store: RecordStore,
    }

    fn fixture(with_cipher: bool) -> Fixture {
        let anchor = Arc::new(MemoryAnchor::new());
        let clock = Arc::new(ManualClock::default());
        let audit = Arc::new(AuditLog::new(clock.clone()));
        let ledger = Arc::new(ConsentLedger::new(anchor.clone(), audit.clone(), clock.clone()));
        let access = Arc::new(AccessController::new(ledger, audit.clone()));
        let subjects = Arc::new(SubjectRegistry::new(audit.clone(), clock.clone()));
        subjects.register("PT-1", SubjectKind::Patient, None).unwrap();

        let mut store = RecordStore::new(
            access.clone(),
            subjects.clone(),
            anchor.clone(),
            audit.clone(),
            clock,
        );
        if with_cipher {
            store = store.with_cipher(Arc::new(SivCipher::new([7u8; 32]).unwrap()));
        }
        Fixture {
            anchor,
            audit,
            access,
            subjects,
            store,
        }
    }

    fn owner() -> Actor {
        Actor::new("PT-1", Role::Patient)
    }

    async fn vitals(f: &Fixture, sensitivity: Sensitivity) -> Record {
        f.store
            .create("PT-1", Category::Vitals, b"hr=72", sensitivity, &owner())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_anchors_and_verifies() {
        let f = fixture(false);
        let record = vitals(&f, Sensitivity::Normal).await;

        assert_eq!(record.version, 1);
        assert!(record.version_history.is_empty());
        assert_eq!(record.payload, b"hr=72");
        assert!(f.anchor.is_anchored(&record.anchor_ref));

        let submissions = f.anchor.submissions();
        let submission = &submissions[0];
        assert_eq!(submission.fingerprint, record.fingerprint);
        assert_eq!(submission.metadata["kind"], "record_create");
        assert_eq!(submission.metadata["sensitivity"], "normal");

        let report = f.store.verify_integrity(&record.id).unwrap();
        assert!(report.valid);
        assert_eq!(report.stored_fingerprint, report.recomputed_fingerprint);
        assert_eq!(f.audit.count(AuditAction::RecordCreated), 1);
    }

    #[tokio::test]
    async fn create_requires_write_grant_for_category() {
        let f = fixture(false);
        let nurse = Actor::new("nurse-1", Role::Nurse);
        assert!(matches!(
            f.store
                .create("PT-1", Category::Vitals, b"x", Sensitivity::Normal, &nurse)
                .await,
            Err(CoreError::AccessDenied { .. })
        ));

        f.access
            .ledger()
            .grant(GrantRequest::new("PT-1", "nurse-1", Role::Nurse, &["vitals"]))
            .await
            .unwrap();
        f.store
            .create("PT-1", Category::Vitals, b"x", Sensitivity::Normal, &nurse)
            .await
            .unwrap();
        assert!(f
            .store
            .create("PT-1", Category::Genomics, b"x", Sensitivity::Normal, &nurse)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn create_requires_active_subject() {
        let f = fixture(false);
        let ghost = Actor::new("PT-9", Role::Patient);
        assert!(matches!(
            f.store
                .create("PT-9", Category::Vitals, b"x", Sensitivity::Normal, &ghost)
                .await,
            Err(CoreError::SubjectNotFound(_))
        ));

        f.subjects.deactivate("PT-1", "moved").unwrap();
        assert!(matches!(
            f.store
                .create("PT-1", Category::Vitals, b"x", Sensitivity::Normal, &owner())
                .await,
            Err(CoreError::SubjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn confidential_records_fail_closed_without_cipher() {
        let f = fixture(false);
        let err = f
            .store
            .create("PT-1", Category::MentalHealth, b"notes", Sensitivity::Restricted, &owner())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Cipher(CipherError::Unavailable(_))));
        assert!(f.store.is_empty());
        assert!(f.anchor.submissions().is_empty());

        let record = vitals(&f, Sensitivity::Normal).await;
        assert!(matches!(
            f.store
                .update(
                    &record.id,
                    RecordUpdate::new().with_sensitivity(Sensitivity::HighlyRestricted),
                    &owner()
                )
                .await,
            Err(CoreError::Cipher(CipherError::Unavailable(_)))
        ));
        assert!(f.store.verify_integrity(&record.id).unwrap().valid);
    }

    #[tokio::test]
    async fn payload_is_encrypted_at_rest() {
        let f = fixture(true);
        let record = f
            .store
            .create("PT-1", Category::MentalHealth, b"session notes", Sensitivity::Restricted, &owner())
            .await
            .unwrap();

        assert!(record.encrypted);
        assert_ne!(record.payload, b"session notes");
        assert_eq!(
            f.store.read_payload(&record.id, &owner()).unwrap(),
            b"session notes"
        );
    }

    #[tokio::test]
    async fn update_keeps_history_and_tracks_fingerprint() {
        let f = fixture(true);
        let v1 = vitals(&f, Sensitivity::Normal).await;

        // Same payload: new version, same fingerprint
        let v2 = f
            .store
            .update(&v1.id, RecordUpdate::new().with_payload(b"hr=72".to_vec()), &owner())
            .await
            .unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.version_history.len(), 1);
        assert_eq!(v2.fingerprint, v1.fingerprint);

        let v3 = f
            .store
            .update(&v1.id, RecordUpdate::new().with_payload(b"hr=90".to_vec()), &owner())
            .await
            .unwrap();
        assert_eq!(v3.version_history.len(), 2);
        assert_ne!(v3.fingerprint, v2.fingerprint);

        let v4 = f
            .store
            .update(&v1.id, RecordUpdate::new().with_category(Category::CarePlans), &owner())
            .await
            .unwrap();
        assert_ne!(v4.fingerprint, v3.fingerprint);

        let v5 = f
            .store
            .update(&v1.id, RecordUpdate::new().with_sensitivity(Sensitivity::Restricted), &owner())
            .await
            .unwrap();
        assert_ne!(v5.fingerprint, v4.fingerprint);
        assert_eq!(v5.version_history.len(), 4);

        let history = f.store.version_history(&v1.id).unwrap();
        let versions: Vec<u32> = history.iter().map(|h| h.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
        assert_eq!(history[0].fingerprint, v1.fingerprint);
        assert_eq!(history[0].editor, "PT-1");

        assert!(f.store.verify_integrity(&v1.id).unwrap().valid);
        assert_eq!(f.store.read_payload(&v1.id, &owner()).unwrap(), b"hr=90");
    }

    #[tokio::test]
    async fn update_unknown_record() {
        let f = fixture(false);
        assert!(matches!(
            f.store.update("missing", RecordUpdate::new(), &owner()).await,
            Err(CoreError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_anchor_leaves_record_unchanged() {
        let f = fixture(false);
        let record = vitals(&f, Sensitivity::Normal).await;
        f.anchor.set_available(false);

        assert!(f
            .store
            .update(&record.id, RecordUpdate::new().with_payload(b"hr=100".to_vec()), &owner())
            .await
            .unwrap_err()
            .is_retryable());
        let stored = f.store.read(&record.id, &owner()).unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.payload, b"hr=72");
    }

    #[tokio::test]
    async fn break_glass_only_requires_emergency_role() {
        let f = fixture(true);
        let record = f
            .store
            .create("PT-1", Category::Diagnoses, b"dx", Sensitivity::BreakGlassOnly, &owner())
            .await
            .unwrap();

        // Even the owner is refused by the sensitivity gate
        assert!(matches!(
            f.store.read(&record.id, &owner()),
            Err(CoreError::AccessDenied { .. })
        ));

        f.access
            .emergency_override("PT-1", "er-doc", "cardiac arrest")
            .await
            .unwrap();
        let er = Actor::new("er-doc", Role::Emergency);
        assert_eq!(f.store.read_payload(&record.id, &er).unwrap(), b"dx");
    }

    #[tokio::test]
    async fn break_glass_only_record_cannot_be_changed_outside_emergency() {
        let f = fixture(true);
        let record = f
            .store
            .create("PT-1", Category::Diagnoses, b"secret", Sensitivity::BreakGlassOnly, &owner())
            .await
            .unwrap();

        let downgrade = RecordUpdate::new().with_sensitivity(Sensitivity::Normal);
        assert!(matches!(
            f.store.update(&record.id, downgrade, &owner()).await,
            Err(CoreError::AccessDenied { .. })
        ));
        assert!(matches!(
            f.store
                .update(&record.id, RecordUpdate::new().with_payload(b"edited".to_vec()), &owner())
                .await,
            Err(CoreError::AccessDenied { .. })
        ));
        assert!(matches!(
            f.store.soft_delete(&record.id, &owner(), "hide it").await,
            Err(CoreError::AccessDenied { .. })
        ));
        assert!(matches!(
            f.store.read_payload(&record.id, &owner()),
            Err(CoreError::AccessDenied { .. })
        ));

        // Break-glass grants are read-only
        f.access
            .emergency_override("PT-1", "er-doc", "cardiac arrest")
            .await
            .unwrap();
        let er = Actor::new("er-doc", Role::Emergency);
        assert!(matches!(
            f.store
                .update(&record.id, RecordUpdate::new().with_sensitivity(Sensitivity::Normal), &er)
                .await,
            Err(CoreError::AccessDenied { .. })
        ));

        let stored = f.store.read(&record.id, &er).unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.sensitivity, Sensitivity::BreakGlassOnly);
        assert!(!stored.is_deleted());
    }

    #[tokio::test]
    async fn update_cannot_raise_sensitivity_past_clearance() {
        let f = fixture(true);
        let record = vitals(&f, Sensitivity::Normal).await;
        assert!(matches!(
            f.store
                .update(
                    &record.id,
                    RecordUpdate::new().with_sensitivity(Sensitivity::BreakGlassOnly),
                    &owner()
                )
                .await,
            Err(CoreError::AccessDenied { .. })
        ));

        f.access
            .ledger()
            .grant(GrantRequest::new("PT-1", "nurse-1", Role::Nurse, &["vitals"]))
            .await
            .unwrap();
        let nurse = Actor::new("nurse-1", Role::Nurse);
        assert!(matches!(
            f.store
                .update(
                    &record.id,
                    RecordUpdate::new().with_sensitivity(Sensitivity::HighlyRestricted),
                    &nurse
                )
                .await,
            Err(CoreError::AccessDenied { .. })
        ));
        assert_eq!(f.store.version_history(&record.id).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn one_time_grant_survives_sensitivity_denial() {
        let f = fixture(true);
        let grant = f
            .access
            .ledger()
            .grant(GrantRequest::new("PT-1", "care-1", Role::Caregiver, &["care_plans"]).one_time())
            .await
            .unwrap();
        let restricted = f
            .store
            .create("PT-1", Category::CarePlans, b"plan", Sensitivity::Restricted, &owner())
            .await
            .unwrap();
        let normal = f
            .store
            .create("PT-1", Category::CarePlans, b"visit", Sensitivity::Normal, &owner())
            .await
            .unwrap();

        let caregiver = Actor::new("care-1", Role::Caregiver);
        assert!(matches!(
            f.store.read(&restricted.id, &caregiver),
            Err(CoreError::AccessDenied { .. })
        ));
        assert_eq!(f.access.ledger().check(&grant.id), ConsentStatus::Active);

        assert_eq!(f.store.read_payload(&normal.id, &caregiver).unwrap(), b"visit");
        assert_eq!(f.access.ledger().check(&grant.id), ConsentStatus::Revoked);
        assert!(f.store.read(&normal.id, &caregiver).is_err());
    }

    #[tokio::test]
    async fn one_time_grant_survives_failed_anchor() {
        let f = fixture(false);
        let grant = f
            .access
            .ledger()
            .grant(GrantRequest::new("PT-1", "nurse-1", Role::Nurse, &["vitals"]).one_time())
            .await
            .unwrap();
        let nurse = Actor::new("nurse-1", Role::Nurse);

        f.anchor.set_available(false);
        let err = f
            .store
            .create("PT-1", Category::Vitals, b"hr=80", Sensitivity::Normal, &nurse)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AnchorUnavailable(_)));
        assert_eq!(f.access.ledger().check(&grant.id), ConsentStatus::Active);
        assert!(f.store.is_empty());

        f.anchor.set_available(true);
        f.store
            .create("PT-1", Category::Vitals, b"hr=80", Sensitivity::Normal, &nurse)
            .await
            .unwrap();
        assert_eq!(f.access.ledger().check(&grant.id), ConsentStatus::Revoked);
    }

    #[tokio::test]
    async fn one_time_grant_covers_category_change_once() {
        let f = fixture(false);
        let record = vitals(&f, Sensitivity::Normal).await;
        let grant = f
            .access
            .ledger()
            .grant(
                GrantRequest::new("PT-1", "nurse-1", Role::Nurse, &["vitals", "care_plans"])
                    .one_time(),
            )
            .await
            .unwrap();
        let nurse = Actor::new("nurse-1", Role::Nurse);

        let updated = f
            .store
            .update(&record.id, RecordUpdate::new().with_category(Category::CarePlans), &nurse)
            .await
            .unwrap();
        assert_eq!(updated.category, Category::CarePlans);
        assert_eq!(f.access.ledger().check(&grant.id), ConsentStatus::Revoked);
        assert_eq!(f.audit.count(AuditAction::ConsentConsumed), 1);
    }

    #[tokio::test]
    async fn deleted_record_is_denied_to_unauthorized_actor() {
        let f = fixture(false);
        let live = vitals(&f, Sensitivity::Normal).await;
        let gone = vitals(&f, Sensitivity::Normal).await;
        f.store.soft_delete(&gone.id, &owner(), "duplicate").await.unwrap();

        let stranger = Actor::new("dr-x", Role::Specialist);
        let live_err = f.store.read(&live.id, &stranger).unwrap_err();
        let gone_err = f.store.read(&gone.id, &stranger).unwrap_err();
        assert_eq!(live_err.error_code(), gone_err.error_code());
        assert!(matches!(gone_err, CoreError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn tampering_is_detected() {
        let f = fixture(false);
        let record = vitals(&f, Sensitivity::Normal).await;

        f.store
            .records
            .lock()
            .unwrap()
            .get_mut(&record.id)
            .unwrap()
            .payload = b"hr=200".to_vec();

        let report = f.store.verify_integrity(&record.id).unwrap();
        assert!(!report.valid);
        assert_ne!(report.stored_fingerprint, report.recomputed_fingerprint);

        assert!(matches!(
            f.store.read(&record.id, &owner()),
            Err(CoreError::IntegrityViolation { .. })
        ));
        assert_eq!(f.audit.count(AuditAction::IntegrityFailure), 1);
    }

    #[tokio::test]
    async fn soft_delete_retains_payload() {
        let f = fixture(false);
        let record = vitals(&f, Sensitivity::Normal).await;

        f.access
            .ledger()
            .grant(GrantRequest::new("PT-1", "nurse-1", Role::Nurse, &["vitals"]))
            .await
            .unwrap();
        let nurse = Actor::new("nurse-1", Role::Nurse);
        assert!(matches!(
            f.store.soft_delete(&record.id, &nurse, "cleanup").await,
            Err(CoreError::AccessDenied { .. })
        ));

        f.store.soft_delete(&record.id, &owner(), "entered in error").await.unwrap();
        assert!(matches!(
            f.store.read(&record.id, &owner()),
            Err(CoreError::RecordNotFound(_))
        ));
        assert!(matches!(
            f.store.soft_delete(&record.id, &owner(), "again").await,
            Err(CoreError::Validation(_))
        ));

        assert_eq!(f.store.len(), 1);
        assert!(f.store.verify_integrity(&record.id).unwrap().valid);
        let kinds: Vec<String> = f
            .anchor
            .submissions()
            .iter()
            .map(|s| s.metadata["kind"].clone())
            .collect();
        assert!(kinds.contains(&"record_delete".to_string()));
        assert!(AuditLog::verify(&f.audit.entries("PT-1")));
    }
}

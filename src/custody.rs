// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Custody Chain
//!
//! Per-subject, append-only sequence of handoff records. Each entry points at
//! the anchor receipt of the entry before it:
//!
//! ```text
//! [0] prev=None ─► own=tx-a
//! [1] prev=tx-a ─► own=tx-b
//! [2] prev=tx-b ─► own=tx-c
//! ```
//!
//! Only the fingerprint of a clinical summary enters the chain, never the
//! summary itself.
//!
//! ## Concurrency
//!
//! Appends for one subject hold that subject's lock across the anchor call,
//! so index assignment and linkage cannot interleave. An append whose anchor
//! call fails leaves the chain untouched.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::anchor::{metadata, AnchorClient, AnchorReceipt};
use crate::audit::{AuditAction, AuditEvent, AuditLog, SYSTEM_ACTOR};
use crate::auth::Role;
use crate::clock::ClockSource;
use crate::error::{CoreError, CoreResult};
use crate::hasher::{fingerprint, fingerprint_parts, Digest};
use crate::locks::SubjectTable;
use crate::models::HandoffType;
use crate::storage::FileStore;
use crate::subjects::validate_subject_id;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustodyEntry {
    pub subject_id: String,
    /// Position in the chain; 0 is the genesis entry.
    pub chain_index: u64,
    pub sender_role: Role,
    pub receiver_id: String,
    pub receiver_role: Role,
    pub handoff_type: HandoffType,
    pub summary_fingerprint: Digest,
    /// `None` only for the genesis entry.
    pub previous_anchor_ref: Option<AnchorReceipt>,
    pub own_anchor_ref: AnchorReceipt,
    pub created_at: DateTime<Utc>,
}

impl CustodyEntry {
    /// Fingerprint submitted to the anchor for this entry.
    pub fn fingerprint(&self) -> Digest {
        handoff_fingerprint(
            &self.subject_id,
            self.chain_index,
            self.sender_role,
            &self.receiver_id,
            self.receiver_role,
            self.handoff_type,
            &self.summary_fingerprint,
            self.previous_anchor_ref.as_ref(),
            self.created_at,
        )
    }

    pub fn is_genesis(&self) -> bool {
        self.chain_index == 0
    }
}

#[allow(clippy::too_many_arguments)]
fn handoff_fingerprint(
    subject_id: &str,
    chain_index: u64,
    sender_role: Role,
    receiver_id: &str,
    receiver_role: Role,
    handoff_type: HandoffType,
    summary_fingerprint: &Digest,
    previous_anchor_ref: Option<&AnchorReceipt>,
    created_at: DateTime<Utc>,
) -> Digest {
    let index = chain_index.to_be_bytes();
    let previous = previous_anchor_ref.map(AnchorReceipt::as_str).unwrap_or("");
    let created = created_at.to_rfc3339_opts(SecondsFormat::Nanos, true);
    fingerprint_parts(&[
        subject_id.as_bytes(),
        &index,
        sender_role.as_str().as_bytes(),
        receiver_id.as_bytes(),
        receiver_role.as_str().as_bytes(),
        handoff_type.as_str().as_bytes(),
        summary_fingerprint.as_bytes(),
        previous.as_bytes(),
        created.as_bytes(),
    ])
}

// =============================================================================
// Verification report
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainIssueKind {
    /// Entry 0 points at a predecessor.
    GenesisHasPrevious,
    /// `previous_anchor_ref` differs from the prior entry's `own_anchor_ref`.
    BrokenLink,
    /// `chain_index` differs from the entry's position.
    IndexMismatch,
    /// Entry belongs to another subject.
    SubjectMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainIssue {
    pub index: usize,
    pub kind: ChainIssueKind,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub issues: Vec<ChainIssue>,
}

/// Check linkage, indices and ownership of a chain. Every problem is
/// reported, not just the first.
pub fn verify_entries(subject_id: &str, entries: &[CustodyEntry]) -> ChainVerification {
    let mut issues = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        if entry.subject_id != subject_id {
            issues.push(ChainIssue {
                index,
                kind: ChainIssueKind::SubjectMismatch,
                expected: Some(subject_id.to_string()),
                actual: Some(entry.subject_id.clone()),
            });
        }

        if entry.chain_index != index as u64 {
            issues.push(ChainIssue {
                index,
                kind: ChainIssueKind::IndexMismatch,
                expected: Some(index.to_string()),
                actual: Some(entry.chain_index.to_string()),
            });
        }

        let actual = entry.previous_anchor_ref.as_ref().map(|r| r.to_string());
        match index.checked_sub(1).map(|i| &entries[i]) {
            None if actual.is_some() => issues.push(ChainIssue {
                index,
                kind: ChainIssueKind::GenesisHasPrevious,
                expected: None,
                actual,
            }),
            Some(prior) if entry.previous_anchor_ref.as_ref() != Some(&prior.own_anchor_ref) => {
                issues.push(ChainIssue {
                    index,
                    kind: ChainIssueKind::BrokenLink,
                    expected: Some(prior.own_anchor_ref.to_string()),
                    actual,
                })
            }
            _ => {}
        }
    }

    ChainVerification {
        valid: issues.is_empty(),
        issues,
    }
}

// =============================================================================
// Store
// =============================================================================

/// All custody chains, keyed by subject.
pub struct CustodyChain {
    chains: SubjectTable<Vec<CustodyEntry>>,
    anchor: Arc<dyn AnchorClient>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn ClockSource>,
}

impl CustodyChain {
    pub fn new(
        anchor: Arc<dyn AnchorClient>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            chains: SubjectTable::new(),
            anchor,
            audit,
            clock,
        }
    }

    /// Record a handoff and link it to the subject's previous entry.
    ///
    /// Any role may hand off to any role. Fails only on invalid input or
    /// when the anchor cannot be reached, in which case nothing is appended.
    pub async fn append_handoff(
        &self,
        subject_id: &str,
        sender_role: Role,
        receiver_id: &str,
        receiver_role: Role,
        handoff_type: HandoffType,
        clinical_summary: &[u8],
    ) -> CoreResult<CustodyEntry> {
        validate_subject_id(subject_id)?;
        if receiver_id.trim().is_empty() {
            return Err(CoreError::Validation("receiver id is empty".to_string()));
        }

        let mut chain = self.chains.lock(subject_id).await;

        let chain_index = chain.len() as u64;
        let previous_anchor_ref = chain.last().map(|e| e.own_anchor_ref.clone());
        let summary_fingerprint = fingerprint(clinical_summary);
        let created_at = self.clock.now();

        let digest = handoff_fingerprint(
            subject_id,
            chain_index,
            sender_role,
            receiver_id,
            receiver_role,
            handoff_type,
            &summary_fingerprint,
            previous_anchor_ref.as_ref(),
            created_at,
        );
        let index = chain_index.to_string();
        let meta = metadata([
            ("kind", "handoff"),
            ("subject_id", subject_id),
            ("chain_index", index.as_str()),
            ("handoff_type", handoff_type.as_str()),
        ]);
        let own_anchor_ref = self
            .anchor
            .submit(&digest, &meta)
            .await
            .inspect_err(|e| {
                tracing::warn!(subject_id, chain_index, error = %e, "Handoff not anchored; chain unchanged")
            })?;

        let entry = CustodyEntry {
            subject_id: subject_id.to_string(),
            chain_index,
            sender_role,
            receiver_id: receiver_id.to_string(),
            receiver_role,
            handoff_type,
            summary_fingerprint,
            previous_anchor_ref,
            own_anchor_ref,
            created_at,
        };
        chain.push(entry.clone());

        self.audit.append(
            AuditEvent::new(AuditAction::HandoffRecorded, SYSTEM_ACTOR)
                .with_subject(subject_id)
                .with_detail(json!({
                    "chain_index": chain_index,
                    "sender_role": sender_role,
                    "receiver_id": receiver_id,
                    "receiver_role": receiver_role,
                    "handoff_type": handoff_type,
                    "summary_fingerprint": entry.summary_fingerprint,
                    "anchor_ref": entry.own_anchor_ref,
                })),
        );
        tracing::info!(
            subject_id,
            chain_index,
            %sender_role,
            %receiver_role,
            handoff_type = handoff_type.as_str(),
            "Custody handoff recorded"
        );
        Ok(entry)
    }

    /// Full chain for a subject, oldest first. Empty if none exists.
    pub async fn get_chain(&self, subject_id: &str) -> Vec<CustodyEntry> {
        match self.chains.lock_existing(subject_id).await {
            Some(chain) => chain.clone(),
            None => Vec::new(),
        }
    }

    pub async fn verify_chain(&self, subject_id: &str) -> ChainVerification {
        let entries = self.get_chain(subject_id).await;
        let report = verify_entries(subject_id, &entries);
        if report.valid {
            tracing::debug!(subject_id, length = entries.len(), "Custody chain verified");
        } else {
            tracing::warn!(
                subject_id,
                issues = report.issues.len(),
                "Custody chain failed verification"
            );
        }
        report
    }

    /// Subjects with a chain, sorted.
    pub fn subjects(&self) -> Vec<String> {
        self.chains.subjects()
    }

    /// Write a subject's chain to `{root}/chains/{subject_id}.json`.
    pub async fn export_chain(&self, store: &FileStore, subject_id: &str) -> CoreResult<usize> {
        let entries = self.get_chain(subject_id).await;
        let path = store.paths().chain_file(subject_id)?;
        store.write_json(path, &entries)?;
        tracing::info!(subject_id, length = entries.len(), "Custody chain exported");
        Ok(entries.len())
    }

    /// Read an exported chain. Callers check it with [`verify_entries`].
    pub fn load_chain(store: &FileStore, subject_id: &str) -> CoreResult<Vec<CustodyEntry>> {
        let path = store.paths().chain_file(subject_id)?;
        Ok(store.read_json(path)?)
    }
}

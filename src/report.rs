// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Compliance reporting.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::consent::GrantCounts;
use crate::state::CareLedger;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainSummary {
    pub subject_id: String,
    pub length: usize,
    pub valid: bool,
}

/// Point-in-time summary of consent, custody, record and audit state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComplianceReport {
    pub generated_at: DateTime<Utc>,
    pub subjects: usize,
    pub active_subjects: usize,
    pub grants: GrantCounts,
    pub emergency_overrides: u64,
    pub chains: Vec<ChainSummary>,
    pub records: usize,
    pub integrity_failures: usize,
    pub audit_entries: usize,
    pub audit_valid: bool,
}

impl ComplianceReport {
    pub async fn collect(ledger: &CareLedger) -> Self {
        let subjects = ledger.subjects.list();

        let mut chains = Vec::new();
        for subject_id in ledger.custody.subjects() {
            let entries = ledger.custody.get_chain(&subject_id).await;
            let verification = crate::custody::verify_entries(&subject_id, &entries);
            chains.push(ChainSummary {
                subject_id,
                length: entries.len(),
                valid: verification.valid,
            });
        }

        let integrity = ledger.records.verify_all();

        Self {
            generated_at: ledger.now(),
            subjects: subjects.len(),
            active_subjects: subjects.iter().filter(|s| s.is_active()).count(),
            grants: ledger.consent().counts(),
            emergency_overrides: ledger.access.emergency_count(),
            chains,
            records: integrity.len(),
            integrity_failures: integrity.iter().filter(|r| !r.valid).count(),
            audit_entries: ledger.audit.len(),
            audit_valid: ledger.audit.verify_all(),
        }
    }

    /// True when every chain, record and audit stream verified.
    pub fn is_clean(&self) -> bool {
        self.audit_valid && self.integrity_failures == 0 && self.chains.iter().all(|c| c.valid)
    }
}

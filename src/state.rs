// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared aggregate wiring every component to one anchor, clock and audit log.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::anchor::{AnchorClient, TimeoutAnchor};
use crate::audit::AuditLog;
use crate::auth::AccessController;
use crate::cipher::{CipherService, SivCipher};
use crate::clock::ClockSource;
use crate::config::Config;
use crate::consent::ConsentLedger;
use crate::custody::CustodyChain;
use crate::error::CoreResult;
use crate::records::RecordStore;
use crate::report::ComplianceReport;
use crate::storage::FileStore;
use crate::subjects::SubjectRegistry;

/// What [`CareLedger::export_subject`] wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub audit_entries: usize,
    pub chain_entries: usize,
}

#[derive(Clone)]
pub struct CareLedger {
    pub audit: Arc<AuditLog>,
    pub subjects: Arc<SubjectRegistry>,
    pub access: Arc<AccessController>,
    pub custody: Arc<CustodyChain>,
    pub records: Arc<RecordStore>,
    clock: Arc<dyn ClockSource>,
}

impl CareLedger {
    /// Without a cipher, only `normal` records can be stored.
    pub fn new(
        anchor: Arc<dyn AnchorClient>,
        cipher: Option<Arc<dyn CipherService>>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        let audit = Arc::new(AuditLog::new(clock.clone()));
        let subjects = Arc::new(SubjectRegistry::new(audit.clone(), clock.clone()));
        let ledger = Arc::new(ConsentLedger::new(anchor.clone(), audit.clone(), clock.clone()));
        let access = Arc::new(AccessController::new(ledger, audit.clone()));
        let custody = Arc::new(CustodyChain::new(anchor.clone(), audit.clone(), clock.clone()));

        let mut records = RecordStore::new(
            access.clone(),
            subjects.clone(),
            anchor,
            audit.clone(),
            clock.clone(),
        );
        if let Some(cipher) = cipher {
            records = records.with_cipher(cipher);
        }

        Self {
            audit,
            subjects,
            access,
            custody,
            records: Arc::new(records),
            clock,
        }
    }

    /// Build from configuration: the anchor gets the configured timeout and
    /// a cipher is created when a key is set.
    pub fn from_config(
        config: &Config,
        anchor: Arc<dyn AnchorClient>,
        clock: Arc<dyn ClockSource>,
    ) -> CoreResult<Self> {
        let anchor: Arc<dyn AnchorClient> = Arc::new(TimeoutAnchor::new(anchor, config.anchor_timeout));
        let cipher = match &config.cipher_key {
            Some(key) => Some(Arc::new(SivCipher::from_hex(key)?) as Arc<dyn CipherService>),
            None => {
                tracing::warn!("No cipher key configured; only normal-sensitivity records accepted");
                None
            }
        };
        Ok(Self::new(anchor, cipher, clock))
    }

    pub fn consent(&self) -> &Arc<ConsentLedger> {
        self.access.ledger()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn compliance_report(&self) -> ComplianceReport {
        ComplianceReport::collect(self).await
    }

    /// Write a subject's audit stream and custody chain under the store root.
    pub async fn export_subject(&self, store: &FileStore, subject_id: &str) -> CoreResult<ExportSummary> {
        let audit_entries = self.audit.export_stream(store, subject_id)?;
        let chain_entries = self.custody.export_chain(store, subject_id).await?;
        tracing::info!(subject_id, audit_entries, chain_entries, "Subject exported");
        Ok(ExportSummary {
            audit_entries,
            chain_entries,
        })
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Demo driver: runs one patient through consent, records and three custody
//! handoffs, exports the results and prints a compliance report.

use std::process::ExitCode;
use std::sync::Arc;

use carechain::anchor::MemoryAnchor;
use carechain::audit::AuditLog;
use carechain::auth::{Actor, Role};
use carechain::clock::SystemClock;
use carechain::config::{Config, LogFormat};
use carechain::consent::GrantRequest;
use carechain::models::{Category, HandoffType, Sensitivity, SubjectKind};
use carechain::records::RecordUpdate;
use carechain::report::ComplianceReport;
use carechain::storage::{FileStore, StoragePaths};
use carechain::{CareLedger, CoreError, CoreResult};

const SUBJECT: &str = "PT-1";

#[tokio::main]
async fn main() -> ExitCode {
    init_logging(LogFormat::from_env());
    let config = Config::from_env();

    let report = match run(&config).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(code = e.error_code(), error = %e, "Demo failed");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render compliance report");
            return ExitCode::FAILURE;
        }
    }

    if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        tracing::error!("Compliance report shows verification failures");
        ExitCode::FAILURE
    }
}

fn init_logging(format: LogFormat) {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries the report
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn run(config: &Config) -> CoreResult<ComplianceReport> {
    let anchor = Arc::new(MemoryAnchor::new());
    let ledger = CareLedger::from_config(config, anchor.clone(), Arc::new(SystemClock))?;

    let mut store = FileStore::new(StoragePaths::new(&config.data_dir));
    store.initialize()?;

    ledger
        .subjects
        .register(SUBJECT, SubjectKind::Patient, Some("Demo Patient"))?;

    let grant = ledger
        .consent()
        .grant(
            GrantRequest::new(SUBJECT, "pcp-1", Role::PrimaryCare, &["vitals", "lab_results"])
                .with_purpose("treatment")
                .with_expiry_hours(24),
        )
        .await?;

    // Confidential records need the cipher
    let sensitivity = if config.cipher_key.is_some() {
        Sensitivity::Restricted
    } else {
        Sensitivity::Normal
    };
    let pcp = Actor::new("pcp-1", Role::PrimaryCare);
    let record = ledger
        .records
        .create(SUBJECT, Category::Vitals, b"bp=120/80 hr=72", sensitivity, &pcp)
        .await?;
    ledger
        .records
        .update(
            &record.id,
            RecordUpdate::new().with_payload(b"bp=118/79 hr=70".to_vec()),
            &pcp,
        )
        .await?;

    let handoffs = [
        (Role::Patient, "pcp-1", Role::PrimaryCare, HandoffType::Admission, "initial intake"),
        (Role::PrimaryCare, "cardio-1", Role::Specialist, HandoffType::Referral, "exertional chest pain"),
        (Role::Specialist, "er-1", Role::Emergency, HandoffType::Emergency, "unstable arrhythmia"),
    ];
    for (sender_role, receiver_id, receiver_role, handoff_type, summary) in handoffs {
        ledger
            .custody
            .append_handoff(
                SUBJECT,
                sender_role,
                receiver_id,
                receiver_role,
                handoff_type,
                summary.as_bytes(),
            )
            .await?;
    }

    let chain = ledger.custody.verify_chain(SUBJECT).await;
    if !chain.valid {
        return Err(CoreError::IntegrityViolation {
            id: format!("custody chain {SUBJECT}"),
            expected: "no issues".to_string(),
            actual: format!("{} issues", chain.issues.len()),
        });
    }
    let integrity = ledger.records.verify_integrity(&record.id)?;
    if !integrity.valid {
        return Err(CoreError::IntegrityViolation {
            id: record.id,
            expected: integrity.stored_fingerprint.to_hex(),
            actual: integrity.recomputed_fingerprint.to_hex(),
        });
    }

    ledger
        .consent()
        .revoke(SUBJECT, &grant.id, "episode closed")
        .await?;

    let summary = ledger.export_subject(&store, SUBJECT).await?;
    let exported = AuditLog::load_stream(&store, SUBJECT)?;
    let audit = AuditLog::verify_report(&exported);
    if !audit.valid {
        return Err(CoreError::IntegrityViolation {
            id: format!("audit stream {SUBJECT}"),
            expected: "no issues".to_string(),
            actual: format!("{} issues", audit.issues.len()),
        });
    }
    tracing::info!(
        subject_id = SUBJECT,
        data_dir = %config.data_dir.display(),
        audit_entries = summary.audit_entries,
        chain_entries = summary.chain_entries,
        anchored = anchor.submissions().len(),
        "Demo scenario complete"
    );

    Ok(ledger.compliance_report().await)
}

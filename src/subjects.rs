// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Subject registration.
//!
//! A subject is a patient or asset identifier. Subjects are registered once
//! and never removed; deactivation only flips their status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::{AuditAction, AuditEvent, AuditLog, GLOBAL_STREAM, SYSTEM_ACTOR};
use crate::clock::ClockSource;
use crate::error::{CoreError, CoreResult};
use crate::models::{SubjectKind, SubjectStatus};
use crate::storage::paths::safe_segment;

/// Longest accepted subject identifier.
pub const MAX_SUBJECT_ID_LEN: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subject {
    pub id: String,
    pub kind: SubjectKind,
    pub display_name: Option<String>,
    pub status: SubjectStatus,
    pub registered_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub deactivation_reason: Option<String>,
}

impl Subject {
    pub fn is_active(&self) -> bool {
        self.status == SubjectStatus::Active
    }
}

/// Subject ids double as file names in exports, so they must be a single
/// safe path segment. A leading underscore is reserved for internal streams.
pub fn validate_subject_id(subject_id: &str) -> CoreResult<()> {
    if subject_id.chars().count() > MAX_SUBJECT_ID_LEN {
        return Err(CoreError::Validation(format!(
            "subject id exceeds {MAX_SUBJECT_ID_LEN} characters"
        )));
    }
    safe_segment(subject_id)
        .map_err(|_| CoreError::Validation(format!("invalid subject id: {subject_id:?}")))?;
    if subject_id.starts_with('_') || subject_id == GLOBAL_STREAM {
        return Err(CoreError::Validation(format!(
            "subject id may not start with '_': {subject_id:?}"
        )));
    }
    Ok(())
}

pub struct SubjectRegistry {
    subjects: Mutex<HashMap<String, Subject>>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn ClockSource>,
}

impl SubjectRegistry {
    pub fn new(audit: Arc<AuditLog>, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            subjects: Mutex::new(HashMap::new()),
            audit,
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Subject>> {
        self.subjects.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(
        &self,
        subject_id: &str,
        kind: SubjectKind,
        display_name: Option<&str>,
    ) -> CoreResult<Subject> {
        validate_subject_id(subject_id)?;

        let subject = {
            let mut subjects = self.lock();
            if subjects.contains_key(subject_id) {
                return Err(CoreError::Validation(format!(
                    "subject already registered: {subject_id}"
                )));
            }
            let subject = Subject {
                id: subject_id.to_string(),
                kind,
                display_name: display_name.map(str::to_string),
                status: SubjectStatus::Active,
                registered_at: self.clock.now(),
                deactivated_at: None,
                deactivation_reason: None,
            };
            subjects.insert(subject.id.clone(), subject.clone());
            subject
        };

        self.audit.append(
            AuditEvent::new(AuditAction::SubjectRegistered, SYSTEM_ACTOR)
                .with_subject(subject_id)
                .with_detail(json!({ "kind": kind })),
        );
        tracing::info!(subject_id, ?kind, "Subject registered");
        Ok(subject)
    }

    pub fn deactivate(&self, subject_id: &str, reason: &str) -> CoreResult<Subject> {
        let subject = {
            let mut subjects = self.lock();
            let subject = subjects
                .get_mut(subject_id)
                .ok_or_else(|| CoreError::SubjectNotFound(subject_id.to_string()))?;
            if !subject.is_active() {
                return Err(CoreError::Validation(format!(
                    "subject already inactive: {subject_id}"
                )));
            }
            subject.status = SubjectStatus::Inactive;
            subject.deactivated_at = Some(self.clock.now());
            subject.deactivation_reason = Some(reason.to_string());
            subject.clone()
        };

        self.audit.append(
            AuditEvent::new(AuditAction::SubjectDeactivated, SYSTEM_ACTOR)
                .with_subject(subject_id)
                .with_detail(json!({ "reason": reason })),
        );
        tracing::info!(subject_id, reason, "Subject deactivated");
        Ok(subject)
    }

    pub fn get(&self, subject_id: &str) -> Option<Subject> {
        self.lock().get(subject_id).cloned()
    }

    pub fn is_active(&self, subject_id: &str) -> bool {
        self.lock().get(subject_id).is_some_and(Subject::is_active)
    }

    /// All subjects, ordered by id.
    pub fn list(&self) -> Vec<Subject> {
        let mut subjects: Vec<Subject> = self.lock().values().cloned().collect();
        subjects.sort_by(|a, b| a.id.cmp(&b.id));
        subjects
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

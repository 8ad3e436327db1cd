// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Consent-backed authorization.
//!
//! A request is allowed when the actor is the subject's owner (actor id equal
//! to the subject id, presenting the `patient` role) or holds an effective
//! grant for the subject under the role they present whose permissions
//! include the one requested.
//!
//! Denials carry the same shape whether or not the subject exists.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Duration;
use serde_json::json;

use crate::audit::{AuditAction, AuditEvent, AuditLog};
use crate::auth::{Permission, Role};
use crate::consent::{ConsentGrant, ConsentLedger};
use crate::error::{CoreError, CoreResult};
use crate::models::{Category, Sensitivity};

/// Lifetime of a break-glass grant.
pub const EMERGENCY_ACCESS_HOURS: i64 = 4;

/// Who is asking, and under which role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }
}

/// What allowed a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessBasis {
    /// The subject acting on their own records.
    Owner,
    Grant { grant_id: String, one_time: bool },
}

/// A passed access check, not yet committed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Authorization {
    subject_id: String,
    actor_id: String,
    role: Role,
    permission: Permission,
    basis: AccessBasis,
}

impl Authorization {
    pub fn basis(&self) -> &AccessBasis {
        &self.basis
    }

    pub fn grant_id(&self) -> Option<&str> {
        match &self.basis {
            AccessBasis::Owner => None,
            AccessBasis::Grant { grant_id, .. } => Some(grant_id),
        }
    }

    pub fn is_single_use(&self) -> bool {
        matches!(self.basis, AccessBasis::Grant { one_time: true, .. })
    }
}

pub struct AccessController {
    ledger: Arc<ConsentLedger>,
    audit: Arc<AuditLog>,
    emergency_events: AtomicU64,
}

impl AccessController {
    pub fn new(ledger: Arc<ConsentLedger>, audit: Arc<AuditLog>) -> Self {
        Self {
            ledger,
            audit,
            emergency_events: AtomicU64::new(0),
        }
    }

    pub fn ledger(&self) -> &Arc<ConsentLedger> {
        &self.ledger
    }

    /// Check `permission` for `actor_id` acting as `role` on `subject_id`,
    /// spending a one-time grant if that is what allows it.
    pub fn authorize(
        &self,
        subject_id: &str,
        actor_id: &str,
        role: Role,
        permission: Permission,
    ) -> CoreResult<()> {
        let authorization = self.check_access(subject_id, actor_id, role, permission, None)?;
        self.commit(&authorization)
    }

    /// As [`authorize`](Self::authorize), but the grant must also cover `category`.
    pub fn authorize_category(
        &self,
        subject_id: &str,
        actor_id: &str,
        role: Role,
        permission: Permission,
        category: Category,
    ) -> CoreResult<()> {
        let authorization =
            self.check_access(subject_id, actor_id, role, permission, Some(category))?;
        self.commit(&authorization)
    }

    /// Find what allows the request without spending anything.
    ///
    /// Callers that go on to do work pass the result to
    /// [`commit`](Self::commit) once that work can no longer fail. Standing
    /// grants are preferred over one-time grants. Expired grants met on the
    /// way are retired.
    pub fn check_access(
        &self,
        subject_id: &str,
        actor_id: &str,
        role: Role,
        permission: Permission,
        category: Option<Category>,
    ) -> CoreResult<Authorization> {
        if role == Role::Patient && actor_id == subject_id {
            tracing::debug!(subject_id, actor_id, %permission, "Owner access");
            return Ok(Authorization {
                subject_id: subject_id.to_string(),
                actor_id: actor_id.to_string(),
                role,
                permission,
                basis: AccessBasis::Owner,
            });
        }

        let now = self.ledger.now();
        let mut single_use = None;
        for grant in self.ledger.grants_for(subject_id, actor_id, role) {
            if grant.is_expired_at(now) {
                self.ledger.expire(subject_id, &grant.id);
                continue;
            }
            if !grant.permits(permission) || category.is_some_and(|c| !grant.covers(c)) {
                continue;
            }
            if grant.one_time {
                if single_use.is_none() {
                    single_use = Some(grant);
                }
                continue;
            }

            tracing::debug!(subject_id, actor_id, grant_id = %grant.id, %permission, "Access granted");
            return Ok(Authorization {
                subject_id: subject_id.to_string(),
                actor_id: actor_id.to_string(),
                role,
                permission,
                basis: AccessBasis::Grant {
                    grant_id: grant.id,
                    one_time: false,
                },
            });
        }

        match single_use {
            Some(grant) => {
                tracing::debug!(
                    subject_id,
                    actor_id,
                    grant_id = %grant.id,
                    %permission,
                    "Access granted by one-time grant"
                );
                Ok(Authorization {
                    subject_id: subject_id.to_string(),
                    actor_id: actor_id.to_string(),
                    role,
                    permission,
                    basis: AccessBasis::Grant {
                        grant_id: grant.id,
                        one_time: true,
                    },
                })
            }
            None => Err(self.deny(subject_id, actor_id, role, permission, category)),
        }
    }

    /// Spend the one-time grant behind `authorization`, if any.
    ///
    /// Fails with `AccessDenied` when another request spent it first.
    pub fn commit(&self, authorization: &Authorization) -> CoreResult<()> {
        let AccessBasis::Grant {
            grant_id,
            one_time: true,
        } = &authorization.basis
        else {
            return Ok(());
        };
        if self.ledger.consume(&authorization.subject_id, grant_id).is_some() {
            return Ok(());
        }
        Err(self.deny(
            &authorization.subject_id,
            &authorization.actor_id,
            authorization.role,
            authorization.permission,
            None,
        ))
    }

    /// Sensitivity gate, applied in addition to the grant check.
    ///
    /// `break_glass_only` records require the `emergency` role; below that,
    /// the role's clearance must reach the record's sensitivity.
    pub fn check_sensitivity(
        &self,
        subject_id: &str,
        actor_id: &str,
        role: Role,
        permission: Permission,
        sensitivity: Sensitivity,
    ) -> CoreResult<()> {
        if role.may_access(sensitivity) {
            return Ok(());
        }
        tracing::warn!(
            subject_id,
            actor_id,
            %role,
            sensitivity = sensitivity.as_str(),
            "Sensitivity gate refused access"
        );
        self.audit.append(
            AuditEvent::new(AuditAction::AccessDenied, actor_id)
                .with_subject(subject_id)
                .with_detail(json!({
                    "role": role,
                    "permission": permission,
                    "sensitivity": sensitivity,
                })),
        );
        Err(CoreError::access_denied(subject_id, actor_id, permission))
    }

    fn deny(
        &self,
        subject_id: &str,
        actor_id: &str,
        role: Role,
        permission: Permission,
        category: Option<Category>,
    ) -> CoreError {
        tracing::warn!(subject_id, actor_id, %role, %permission, "Access denied");
        self.audit.append(
            AuditEvent::new(AuditAction::AccessDenied, actor_id)
                .with_subject(subject_id)
                .with_detail(json!({
                    "role": role,
                    "permission": permission,
                    "category": category,
                })),
        );
        CoreError::access_denied(subject_id, actor_id, permission)
    }

    // ========== Break-glass ==========

    /// Issue a read-only, four-hour grant without the owner's consent.
    ///
    /// The grant is anchored with `sensitivity=highly_restricted`, audited,
    /// and counted. It expires on its own. The actor must present the
    /// `emergency` role to use it.
    pub async fn emergency_override(
        &self,
        subject_id: &str,
        actor_id: &str,
        reason: &str,
    ) -> CoreResult<ConsentGrant> {
        if reason.trim().is_empty() {
            return Err(CoreError::Validation(
                "emergency override requires a reason".to_string(),
            ));
        }
        if actor_id.trim().is_empty() {
            return Err(CoreError::Validation("actor id is empty".to_string()));
        }

        let grant = self
            .ledger
            .issue_break_glass(
                subject_id,
                actor_id,
                reason,
                Duration::hours(EMERGENCY_ACCESS_HOURS),
            )
            .await?;

        let count = self.emergency_events.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(
            subject_id,
            actor_id,
            grant_id = %grant.id,
            reason,
            emergency_events = count,
            "Emergency override issued"
        );
        Ok(grant)
    }

    /// Number of emergency overrides issued since startup.
    pub fn emergency_count(&self) -> u64 {
        self.emergency_events.load(Ordering::SeqCst)
    }
}

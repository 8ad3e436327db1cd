// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Consent Ledger
//!
//! Tracks owner-granted access for each subject.
//!
//! ## Lifecycle
//!
//! ```text
//! grant() ──► active ──revoke()──────────► terminal (revoked)
//!               │  └──first use, one_time─► terminal (revoked, one_time_consumed)
//!               └────expiry passed────────► terminal (expired)
//! ```
//!
//! Active and terminal grants live in separate collections. Nothing moves a
//! grant out of the terminal collection, so a revoked or expired grant can
//! never become effective again.
//!
//! `check` and `list_active` evaluate expiry lazily against the clock and do
//! not mutate anything; the transition into the terminal set happens on
//! `revoke`, or when the access controller calls `expire` / `consume` on the
//! authorization path.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::anchor::{metadata, AnchorClient, AnchorReceipt};
use crate::audit::{AuditAction, AuditEvent, AuditLog, SYSTEM_ACTOR};
use crate::auth::{Permission, Role};
use crate::clock::ClockSource;
use crate::error::{CoreError, CoreResult};
use crate::hasher::{fingerprint_parts, Digest};
use crate::locks::SubjectLocks;
use crate::models::{Category, Sensitivity};
use crate::subjects::validate_subject_id;

/// Revocation reason recorded when a one-time grant is used.
pub const ONE_TIME_CONSUMED: &str = "one_time_consumed";

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    Active,
    Revoked,
    Expired,
}

/// How a grant came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    /// Issued by the subject's owner.
    Standard,
    /// Synthesized by an emergency override.
    BreakGlass,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsentGrant {
    pub id: String,
    pub subject_id: String,
    pub grantee_id: String,
    pub role: Role,
    pub categories: BTreeSet<Category>,
    /// Taken from the role map at grant time.
    pub permissions: Vec<Permission>,
    pub purpose: String,
    pub kind: GrantKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub one_time: bool,
    pub status: GrantStatus,
    pub anchor_ref: AnchorReceipt,
}

impl ConsentGrant {
    /// Effective iff active and not past its expiry.
    pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active && !self.is_expired_at(now)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }

    pub fn permits(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn covers(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }

    /// Fingerprint submitted for anchoring when the grant is issued.
    pub fn fingerprint(&self) -> Digest {
        let categories = self
            .categories
            .iter()
            .map(Category::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let created = self.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let expires = self
            .expires_at
            .map(|e| e.to_rfc3339_opts(SecondsFormat::Nanos, true))
            .unwrap_or_default();
        fingerprint_parts(&[
            self.id.as_bytes(),
            self.subject_id.as_bytes(),
            self.grantee_id.as_bytes(),
            self.role.as_str().as_bytes(),
            categories.as_bytes(),
            self.purpose.as_bytes(),
            created.as_bytes(),
            expires.as_bytes(),
            &[self.one_time as u8],
        ])
    }
}

/// Result of [`ConsentLedger::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Active,
    Revoked,
    Expired,
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevocationRecord {
    pub grant_id: String,
    pub subject_id: String,
    pub reason: String,
    pub revoked_at: DateTime<Utc>,
    /// Absent for one-time consumption, which is not anchored separately.
    pub anchor_ref: Option<AnchorReceipt>,
}

/// Parameters for [`ConsentLedger::grant`].
#[derive(Debug, Clone)]
pub struct GrantRequest {
    pub subject_id: String,
    pub grantee_id: String,
    pub role: Role,
    /// Raw category names, validated against [`Category`].
    pub categories: Vec<String>,
    pub purpose: String,
    pub expiry_hours: Option<i64>,
    pub one_time: bool,
}

impl GrantRequest {
    pub fn new<S: AsRef<str>>(
        subject_id: impl Into<String>,
        grantee_id: impl Into<String>,
        role: Role,
        categories: &[S],
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            grantee_id: grantee_id.into(),
            role,
            categories: categories.iter().map(|c| c.as_ref().to_string()).collect(),
            purpose: String::new(),
            expiry_hours: None,
            one_time: false,
        }
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    pub fn with_expiry_hours(mut self, hours: i64) -> Self {
        self.expiry_hours = Some(hours);
        self
    }

    pub fn one_time(mut self) -> Self {
        self.one_time = true;
        self
    }
}

/// Grant counts across all subjects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GrantCounts {
    pub active: usize,
    pub revoked: usize,
    pub expired: usize,
}

/// Parse a category list. Any unknown name rejects the whole list.
pub fn parse_categories<S: AsRef<str>>(names: &[S]) -> CoreResult<BTreeSet<Category>> {
    if names.is_empty() {
        return Err(CoreError::InvalidCategory("no categories given".to_string()));
    }
    names
        .iter()
        .map(|name| name.as_ref().parse::<Category>().map_err(CoreError::from))
        .collect()
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Default)]
struct SubjectConsents {
    active: Vec<ConsentGrant>,
    terminal: Vec<ConsentGrant>,
    revocations: Vec<RevocationRecord>,
}

impl SubjectConsents {
    fn take_active(&mut self, grant_id: &str) -> Option<ConsentGrant> {
        let pos = self.active.iter().position(|g| g.id == grant_id)?;
        Some(self.active.remove(pos))
    }
}

#[derive(Default)]
struct LedgerState {
    subjects: HashMap<String, SubjectConsents>,
    /// grant id -> subject id
    owners: HashMap<String, String>,
}

pub struct ConsentLedger {
    state: Mutex<LedgerState>,
    locks: SubjectLocks,
    anchor: Arc<dyn AnchorClient>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn ClockSource>,
}

impl ConsentLedger {
    pub fn new(
        anchor: Arc<dyn AnchorClient>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            locks: SubjectLocks::new(),
            anchor,
            audit,
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ========== Mutations ==========

    /// Issue a grant. The grant is anchored before it becomes visible.
    pub async fn grant(&self, request: GrantRequest) -> CoreResult<ConsentGrant> {
        validate_subject_id(&request.subject_id)?;
        let categories = parse_categories(&request.categories)?;
        if request.grantee_id.trim().is_empty() {
            return Err(CoreError::Validation("grantee id is empty".to_string()));
        }

        let now = self.clock.now();
        let expires_at = match request.expiry_hours {
            None => None,
            Some(hours) if hours <= 0 => {
                return Err(CoreError::Validation(format!(
                    "expiry must be positive, got {hours} hours"
                )));
            }
            Some(hours) => Some(
                Duration::try_hours(hours)
                    .and_then(|d| now.checked_add_signed(d))
                    .ok_or_else(|| {
                        CoreError::Validation(format!("expiry of {hours} hours is out of range"))
                    })?,
            ),
        };

        let grant = ConsentGrant {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id: request.subject_id,
            grantee_id: request.grantee_id,
            role: request.role,
            categories,
            permissions: request.role.permissions().to_vec(),
            purpose: request.purpose,
            kind: GrantKind::Standard,
            created_at: now,
            expires_at,
            one_time: request.one_time,
            status: GrantStatus::Active,
            anchor_ref: AnchorReceipt::new(""),
        };

        let actor = grant.subject_id.clone();
        self.issue(grant, "consent_grant", None, AuditAction::ConsentGranted, &actor)
            .await
    }

    /// Synthesize a read-only break-glass grant for `actor_id`.
    ///
    /// Callers go through `AccessController::emergency_override`, which
    /// also counts the event.
    pub(crate) async fn issue_break_glass(
        &self,
        subject_id: &str,
        actor_id: &str,
        reason: &str,
        valid_for: Duration,
    ) -> CoreResult<ConsentGrant> {
        validate_subject_id(subject_id)?;
        let now = self.clock.now();
        let grant = ConsentGrant {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id: subject_id.to_string(),
            grantee_id: actor_id.to_string(),
            role: Role::Emergency,
            categories: Category::ALL.into_iter().collect(),
            permissions: vec![Permission::Read],
            purpose: reason.to_string(),
            kind: GrantKind::BreakGlass,
            created_at: now,
            expires_at: Some(now + valid_for),
            one_time: false,
            status: GrantStatus::Active,
            anchor_ref: AnchorReceipt::new(""),
        };

        self.issue(
            grant,
            "emergency_override",
            Some(Sensitivity::HighlyRestricted),
            AuditAction::EmergencyOverride,
            actor_id,
        )
        .await
    }

    async fn issue(
        &self,
        mut grant: ConsentGrant,
        kind: &str,
        sensitivity: Option<Sensitivity>,
        action: AuditAction,
        actor: &str,
    ) -> CoreResult<ConsentGrant> {
        let _guard = self.locks.lock(&grant.subject_id).await;

        let mut meta = metadata([("kind", kind), ("subject_id", grant.subject_id.as_str())]);
        if let Some(sensitivity) = sensitivity {
            meta.insert("sensitivity".to_string(), sensitivity.as_str().to_string());
        }
        grant.anchor_ref = self
            .anchor
            .submit(&grant.fingerprint(), &meta)
            .await
            .inspect_err(|e| {
                tracing::warn!(subject_id = %grant.subject_id, error = %e, kind, "Grant anchoring failed")
            })?;

        {
            let mut state = self.lock();
            state
                .owners
                .insert(grant.id.clone(), grant.subject_id.clone());
            state
                .subjects
                .entry(grant.subject_id.clone())
                .or_default()
                .active
                .push(grant.clone());
        }

        let mut detail = json!({
            "grant_id": grant.id,
            "grantee_id": grant.grantee_id,
            "role": grant.role,
            "categories": grant.categories,
            "purpose": grant.purpose,
            "expires_at": grant.expires_at,
            "one_time": grant.one_time,
            "anchor_ref": grant.anchor_ref,
        });
        if let Some(sensitivity) = sensitivity {
            detail["sensitivity"] = json!(sensitivity);
        }
        self.audit.append(
            AuditEvent::new(action, actor)
                .with_subject(&grant.subject_id)
                .with_detail(detail),
        );

        tracing::info!(
            subject_id = %grant.subject_id,
            grant_id = %grant.id,
            grantee_id = %grant.grantee_id,
            role = %grant.role,
            kind,
            "Consent grant issued"
        );
        Ok(grant)
    }

    /// Revoke an active grant. Succeeds at most once per grant.
    pub async fn revoke(
        &self,
        subject_id: &str,
        grant_id: &str,
        reason: &str,
    ) -> CoreResult<RevocationRecord> {
        let _guard = self.locks.lock(subject_id).await;
        let now = self.clock.now();

        let grant = {
            let state = self.lock();
            state
                .subjects
                .get(subject_id)
                .and_then(|s| s.active.iter().find(|g| g.id == grant_id))
                .cloned()
        }
        .ok_or_else(|| CoreError::GrantNotFound(grant_id.to_string()))?;

        if grant.is_expired_at(now) {
            self.expire(subject_id, grant_id);
            return Err(CoreError::GrantNotFound(grant_id.to_string()));
        }

        let revoked_at = now.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let digest = fingerprint_parts(&[
            grant.fingerprint().as_bytes(),
            reason.as_bytes(),
            revoked_at.as_bytes(),
        ]);
        let meta = metadata([("kind", "consent_revoke"), ("subject_id", subject_id)]);
        let receipt = self
            .anchor
            .submit(&digest, &meta)
            .await
            .inspect_err(|e| tracing::warn!(subject_id, grant_id, error = %e, "Revocation anchoring failed"))?;

        let record = RevocationRecord {
            grant_id: grant_id.to_string(),
            subject_id: subject_id.to_string(),
            reason: reason.to_string(),
            revoked_at: now,
            anchor_ref: Some(receipt),
        };

        // The authorization path may have consumed or expired the grant
        // while the anchor call was in flight.
        self.retire(subject_id, grant_id, GrantStatus::Revoked, Some(record.clone()))
            .ok_or_else(|| CoreError::GrantNotFound(grant_id.to_string()))?;

        self.audit.append(
            AuditEvent::new(AuditAction::ConsentRevoked, subject_id)
                .with_subject(subject_id)
                .with_detail(json!({
                    "grant_id": grant_id,
                    "reason": reason,
                    "anchor_ref": record.anchor_ref,
                })),
        );
        tracing::info!(subject_id, grant_id, reason, "Consent grant revoked");
        Ok(record)
    }

    /// Move an active grant into the terminal set as expired.
    ///
    /// Returns `None` if the grant was no longer active.
    pub fn expire(&self, subject_id: &str, grant_id: &str) -> Option<ConsentGrant> {
        let grant = self.retire(subject_id, grant_id, GrantStatus::Expired, None)?;
        self.audit.append(
            AuditEvent::new(AuditAction::ConsentExpired, SYSTEM_ACTOR)
                .with_subject(subject_id)
                .with_detail(json!({ "grant_id": grant_id, "expired_at": grant.expires_at })),
        );
        tracing::info!(subject_id, grant_id, "Consent grant expired");
        Some(grant)
    }

    /// Retire a one-time grant after its single use.
    ///
    /// Returns `None` if another caller got there first.
    pub fn consume(&self, subject_id: &str, grant_id: &str) -> Option<ConsentGrant> {
        let record = RevocationRecord {
            grant_id: grant_id.to_string(),
            subject_id: subject_id.to_string(),
            reason: ONE_TIME_CONSUMED.to_string(),
            revoked_at: self.clock.now(),
            anchor_ref: None,
        };
        let grant = self.retire(subject_id, grant_id, GrantStatus::Revoked, Some(record))?;
        self.audit.append(
            AuditEvent::new(AuditAction::ConsentConsumed, &grant.grantee_id)
                .with_subject(subject_id)
                .with_detail(json!({ "grant_id": grant_id })),
        );
        tracing::info!(subject_id, grant_id, "One-time consent grant consumed");
        Some(grant)
    }

    fn retire(
        &self,
        subject_id: &str,
        grant_id: &str,
        status: GrantStatus,
        revocation: Option<RevocationRecord>,
    ) -> Option<ConsentGrant> {
        let mut state = self.lock();
        let consents = state.subjects.get_mut(subject_id)?;
        let mut grant = consents.take_active(grant_id)?;
        grant.status = status;
        consents.terminal.push(grant.clone());
        if let Some(record) = revocation {
            consents.revocations.push(record);
        }
        Some(grant)
    }

    // ========== Queries ==========

    /// Status of a grant, with expiry evaluated against the clock. Read-only.
    pub fn check(&self, grant_id: &str) -> ConsentStatus {
        let now = self.clock.now();
        let state = self.lock();
        let Some(consents) = state
            .owners
            .get(grant_id)
            .and_then(|subject| state.subjects.get(subject))
        else {
            return ConsentStatus::NotFound;
        };

        if let Some(grant) = consents.active.iter().find(|g| g.id == grant_id) {
            return if grant.is_expired_at(now) {
                ConsentStatus::Expired
            } else {
                ConsentStatus::Active
            };
        }

        match consents.terminal.iter().find(|g| g.id == grant_id) {
            Some(grant) if grant.status == GrantStatus::Expired => ConsentStatus::Expired,
            Some(_) => ConsentStatus::Revoked,
            None => ConsentStatus::NotFound,
        }
    }

    pub fn get(&self, grant_id: &str) -> Option<ConsentGrant> {
        let state = self.lock();
        let consents = state.subjects.get(state.owners.get(grant_id)?)?;
        consents
            .active
            .iter()
            .chain(consents.terminal.iter())
            .find(|g| g.id == grant_id)
            .cloned()
    }

    /// Effective grants for a subject, in issue order.
    ///
    /// The returned iterator owns a snapshot; clone it to walk it again.
    pub fn list_active(
        &self,
        subject_id: &str,
    ) -> impl Iterator<Item = ConsentGrant> + Clone {
        let now = self.clock.now();
        let snapshot: Vec<ConsentGrant> = self
            .lock()
            .subjects
            .get(subject_id)
            .map(|s| {
                s.active
                    .iter()
                    .filter(|g| g.is_effective_at(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        snapshot.into_iter()
    }

    /// Grants in the active set held by `grantee_id` under `role`.
    ///
    /// May include grants whose expiry has passed but which have not yet been
    /// moved to the terminal set.
    pub fn grants_for(&self, subject_id: &str, grantee_id: &str, role: Role) -> Vec<ConsentGrant> {
        self.lock()
            .subjects
            .get(subject_id)
            .map(|s| {
                s.active
                    .iter()
                    .filter(|g| g.grantee_id == grantee_id && g.role == role)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn revocations(&self, subject_id: &str) -> Vec<RevocationRecord> {
        self.lock()
            .subjects
            .get(subject_id)
            .map(|s| s.revocations.clone())
            .unwrap_or_default()
    }

    /// Counts with expiry evaluated lazily.
    pub fn counts(&self) -> GrantCounts {
        let now = self.clock.now();
        let state = self.lock();
        let mut counts = GrantCounts::default();
        for consents in state.subjects.values() {
            for grant in &consents.active {
                if grant.is_expired_at(now) {
                    counts.expired += 1;
                } else {
                    counts.active += 1;
                }
            }
            for grant in &consents.terminal {
                match grant.status {
                    GrantStatus::Expired => counts.expired += 1,
                    _ => counts.revoked += 1,
                }
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::MemoryAnchor;
    use crate::clock::ManualClock;

    struct Fixture {
        anchor: Arc<MemoryAnchor>,
        audit: Arc<AuditLog>,
        clock: Arc<ManualClock>,
        ledger: ConsentLedger,
    }

    fn fixture() -> Fixture {
        let anchor = Arc::new(MemoryAnchor::new());
        let clock = Arc::new(ManualClock::default());
        let audit = Arc::new(AuditLog::new(clock.clone()));
        let ledger = ConsentLedger::new(anchor.clone(), audit.clone(), clock.clone());
        Fixture {
            anchor,
            audit,
            clock,
            ledger,
        }
    }

    fn request() -> GrantRequest {
        GrantRequest::new("PT-1", "dr-smith", Role::PrimaryCare, &["vitals", "lab_results"])
            .with_purpose("treatment")
    }

    #[tokio::test]
    async fn grant_is_anchored_and_audited() {
        let f = fixture();
        let grant = f.ledger.grant(request()).await.unwrap();

        assert_eq!(grant.status, GrantStatus::Active);
        assert_eq!(grant.categories.len(), 2);
        assert!(grant.permits(Permission::Delete));
        assert!(f.anchor.is_anchored(&grant.anchor_ref));
        assert_eq!(f.ledger.check(&grant.id), ConsentStatus::Active);

        let entries = f.audit.entries("PT-1");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::ConsentGranted);
        assert_eq!(entries[0].detail["grant_id"], json!(grant.id));
    }

    #[tokio::test]
    async fn unknown_category_rejects_grant() {
        let f = fixture();
        let err = f
            .ledger
            .grant(GrantRequest::new("PT-1", "dr", Role::Nurse, &["nonexistent_category"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCategory(_)));

        // One bad name spoils the list
        let err = f
            .ledger
            .grant(GrantRequest::new("PT-1", "dr", Role::Nurse, &["vitals", "bogus"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCategory(ref v) if v == "bogus"));

        let empty: [&str; 0] = [];
        assert!(matches!(
            f.ledger.grant(GrantRequest::new("PT-1", "dr", Role::Nurse, &empty)).await,
            Err(CoreError::InvalidCategory(_))
        ));
        assert!(f.anchor.submissions().is_empty());
        assert!(f.audit.is_empty());
    }

    #[tokio::test]
    async fn non_positive_expiry_is_rejected() {
        let f = fixture();
        let err = f
            .ledger
            .grant(request().with_expiry_hours(0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn out_of_range_expiry_is_rejected() {
        let f = fixture();
        for hours in [i64::MAX, i64::MAX / 2, 24 * 365 * 300_000] {
            let err = f
                .ledger
                .grant(request().with_expiry_hours(hours))
                .await
                .unwrap_err();
            assert!(matches!(err, CoreError::Validation(_)), "{hours}");
        }
        assert!(f.anchor.submissions().is_empty());

        let grant = f.ledger.grant(request().with_expiry_hours(24 * 365)).await.unwrap();
        assert_eq!(grant.expires_at, Some(grant.created_at + Duration::days(365)));
    }

    #[tokio::test]
    async fn revoke_is_not_idempotent() {
        let f = fixture();
        let grant = f.ledger.grant(request()).await.unwrap();

        let record = f.ledger.revoke("PT-1", &grant.id, "patient request").await.unwrap();
        assert_eq!(record.reason, "patient request");
        assert!(record.anchor_ref.is_some());
        assert_eq!(f.ledger.check(&grant.id), ConsentStatus::Revoked);

        let err = f.ledger.revoke("PT-1", &grant.id, "again").await.unwrap_err();
        assert!(matches!(err, CoreError::GrantNotFound(_)));
        assert_eq!(f.ledger.revocations("PT-1").len(), 1);
        assert_eq!(f.ledger.list_active("PT-1").count(), 0);
    }

    #[tokio::test]
    async fn revoke_under_wrong_subject_is_not_found() {
        let f = fixture();
        let grant = f.ledger.grant(request()).await.unwrap();
        assert!(matches!(
            f.ledger.revoke("PT-2", &grant.id, "x").await,
            Err(CoreError::GrantNotFound(_))
        ));
        assert_eq!(f.ledger.check(&grant.id), ConsentStatus::Active);
    }

    #[tokio::test]
    async fn grant_expires_lazily_without_revoke() {
        let f = fixture();
        let grant = f.ledger.grant(request().with_expiry_hours(1)).await.unwrap();
        assert_eq!(f.ledger.check(&grant.id), ConsentStatus::Active);

        f.clock.advance(Duration::minutes(61));
        assert_eq!(f.ledger.check(&grant.id), ConsentStatus::Expired);
        // check() is read-only
        assert_eq!(f.ledger.get(&grant.id).unwrap().status, GrantStatus::Active);
        assert_eq!(f.ledger.list_active("PT-1").count(), 0);
        assert_eq!(f.ledger.counts().expired, 1);

        let expired = f.ledger.expire("PT-1", &grant.id).unwrap();
        assert_eq!(expired.status, GrantStatus::Expired);
        assert_eq!(f.ledger.check(&grant.id), ConsentStatus::Expired);
        assert!(f.ledger.expire("PT-1", &grant.id).is_none());
    }

    #[tokio::test]
    async fn revoking_an_expired_grant_fails() {
        let f = fixture();
        let grant = f.ledger.grant(request().with_expiry_hours(2)).await.unwrap();
        f.clock.advance(Duration::hours(3));

        assert!(matches!(
            f.ledger.revoke("PT-1", &grant.id, "late").await,
            Err(CoreError::GrantNotFound(_))
        ));
        assert_eq!(f.ledger.check(&grant.id), ConsentStatus::Expired);
        assert!(f.ledger.revocations("PT-1").is_empty());
    }

    #[tokio::test]
    async fn consume_retires_once() {
        let f = fixture();
        let grant = f.ledger.grant(request().one_time()).await.unwrap();

        assert!(f.ledger.consume("PT-1", &grant.id).is_some());
        assert!(f.ledger.consume("PT-1", &grant.id).is_none());
        assert_eq!(f.ledger.check(&grant.id), ConsentStatus::Revoked);
        assert_eq!(f.ledger.revocations("PT-1")[0].reason, ONE_TIME_CONSUMED);
    }

    #[tokio::test]
    async fn anchor_failure_leaves_no_grant() {
        let f = fixture();
        f.anchor.set_available(false);
        let err = f.ledger.grant(request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.ledger.counts(), GrantCounts::default());
        assert!(f.audit.is_empty());
    }

    #[tokio::test]
    async fn anchor_failure_leaves_grant_active() {
        let f = fixture();
        let grant = f.ledger.grant(request()).await.unwrap();
        f.anchor.reject_next("malformed");
        assert!(matches!(
            f.ledger.revoke("PT-1", &grant.id, "x").await,
            Err(CoreError::AnchorUnavailable(_))
        ));
        assert_eq!(f.ledger.check(&grant.id), ConsentStatus::Active);
    }

    #[tokio::test]
    async fn list_active_is_restartable() {
        let f = fixture();
        for grantee in ["a", "b", "c"] {
            f.ledger
                .grant(GrantRequest::new("PT-1", grantee, Role::Nurse, &["vitals"]))
                .await
                .unwrap();
        }

        let grants = f.ledger.list_active("PT-1");
        let first: Vec<String> = grants.clone().map(|g| g.grantee_id).collect();
        let second: Vec<String> = grants.map(|g| g.grantee_id).collect();
        assert_eq!(first, vec!["a", "b", "c"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn counts_track_every_set() {
        let f = fixture();
        let a = f.ledger.grant(request()).await.unwrap();
        f.ledger.grant(request().with_expiry_hours(1)).await.unwrap();
        f.ledger.grant(request()).await.unwrap();
        f.ledger.revoke("PT-1", &a.id, "done").await.unwrap();
        f.clock.advance(Duration::hours(2));

        assert_eq!(
            f.ledger.counts(),
            GrantCounts {
                active: 1,
                revoked: 1,
                expired: 1
            }
        );
        assert_eq!(f.ledger.check("missing"), ConsentStatus::NotFound);
    }
}

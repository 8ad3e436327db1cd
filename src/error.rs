// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Core error taxonomy.
//!
//! State-mutating operations return these as typed results and never log and
//! swallow them. Verification operations return reports instead.

use crate::anchor::AnchorError;
use crate::auth::Permission;
use crate::cipher::CipherError;
use crate::models::UnknownVariant;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("subject not found: {0}")]
    SubjectNotFound(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("consent grant not found: {0}")]
    GrantNotFound(String),

    /// Identical shape whether or not the subject exists.
    #[error("access denied: {actor_id} may not {permission} records of {subject_id}")]
    AccessDenied {
        subject_id: String,
        actor_id: String,
        permission: Permission,
    },

    #[error("invalid category: {0}")]
    InvalidCategory(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("integrity violation on {id}: expected {expected}, found {actual}")]
    IntegrityViolation {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("anchor unavailable: {0}")]
    AnchorUnavailable(#[from] AnchorError),

    #[error("cipher failure: {0}")]
    Cipher(#[from] CipherError),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn access_denied(
        subject_id: impl Into<String>,
        actor_id: impl Into<String>,
        permission: Permission,
    ) -> Self {
        CoreError::AccessDenied {
            subject_id: subject_id.into(),
            actor_id: actor_id.into(),
            permission,
        }
    }

    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::SubjectNotFound(_) => "subject_not_found",
            CoreError::RecordNotFound(_) => "record_not_found",
            CoreError::GrantNotFound(_) => "grant_not_found",
            CoreError::AccessDenied { .. } => "access_denied",
            CoreError::InvalidCategory(_) => "invalid_category",
            CoreError::Validation(_) => "validation_error",
            CoreError::IntegrityViolation { .. } => "integrity_violation",
            CoreError::AnchorUnavailable(_) => "anchor_unavailable",
            CoreError::Cipher(_) => "cipher_error",
            CoreError::Storage(_) => "storage_error",
        }
    }

    /// Only anchor outages are worth retrying, and only by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::AnchorUnavailable(AnchorError::Unreachable(_)))
    }
}

impl From<UnknownVariant> for CoreError {
    fn from(e: UnknownVariant) -> Self {
        if e.kind == "category" {
            CoreError::InvalidCategory(e.value)
        } else {
            CoreError::Validation(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    #[test]
    fn unknown_category_maps_to_invalid_category() {
        let err: CoreError = "nonexistent_category"
            .parse::<Category>()
            .unwrap_err()
            .into();
        assert!(matches!(err, CoreError::InvalidCategory(ref v) if v == "nonexistent_category"));
        assert_eq!(err.error_code(), "invalid_category");
    }

    #[test]
    fn unknown_role_maps_to_validation() {
        let err: CoreError = "wizard".parse::<crate::auth::Role>().unwrap_err().into();
        assert_eq!(err.error_code(), "validation_error");
    }

    #[test]
    fn only_unreachable_anchor_is_retryable() {
        assert!(CoreError::from(AnchorError::Unreachable("down".into())).is_retryable());
        assert!(!CoreError::from(AnchorError::Rejected("bad".into())).is_retryable());
        assert!(!CoreError::access_denied("PT-1", "dr-x", Permission::Read).is_retryable());
    }

    #[test]
    fn access_denied_message_names_actor_and_permission() {
        let err = CoreError::access_denied("PT-9", "dr-x", Permission::Write);
        assert_eq!(err.to_string(), "access denied: dr-x may not write records of PT-9");
    }
}

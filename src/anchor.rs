// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger anchoring collaborator.
//!
//! The core never speaks a ledger protocol. It hands a fingerprint plus a
//! small metadata map to an [`AnchorClient`] and receives an opaque
//! [`AnchorReceipt`] (the ledger transaction id in production). A failed
//! anchor call is a first-class outcome: callers must not commit the state
//! change it was meant to witness.
//!
//! Retries are the client's business. Resubmitting the same fingerprint and
//! metadata must yield the same receipt.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::hasher::{fingerprint_parts, Digest};

/// Metadata attached to an anchor submission. Ordered so receipts are stable.
pub type AnchorMetadata = BTreeMap<String, String>;

/// Opaque, comparable confirmation token returned by the anchor service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorReceipt(String);

impl AnchorReceipt {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnchorReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Anchor submission failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnchorError {
    #[error("anchor service unreachable: {0}")]
    Unreachable(String),

    #[error("anchor service rejected submission: {0}")]
    Rejected(String),
}

/// External ledger anchoring service.
#[async_trait]
pub trait AnchorClient: Send + Sync {
    async fn submit(
        &self,
        fingerprint: &Digest,
        metadata: &AnchorMetadata,
    ) -> Result<AnchorReceipt, AnchorError>;
}

/// Build the metadata map for a submission.
pub fn metadata<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> AnchorMetadata {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// =============================================================================
// Timeout wrapper
// =============================================================================

/// Bounds every submission of the wrapped client by a fixed timeout.
///
/// An elapsed timeout is reported as [`AnchorError::Unreachable`].
pub struct TimeoutAnchor {
    inner: Arc<dyn AnchorClient>,
    timeout: Duration,
}

impl TimeoutAnchor {
    pub fn new(inner: Arc<dyn AnchorClient>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl AnchorClient for TimeoutAnchor {
    async fn submit(
        &self,
        fingerprint: &Digest,
        metadata: &AnchorMetadata,
    ) -> Result<AnchorReceipt, AnchorError> {
        match tokio::time::timeout(self.timeout, self.inner.submit(fingerprint, metadata)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Anchor submission timed out"
                );
                Err(AnchorError::Unreachable(format!(
                    "no confirmation within {} ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

// =============================================================================
// In-memory ledger
// =============================================================================

/// A submission accepted by [`MemoryAnchor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorSubmission {
    pub fingerprint: Digest,
    pub metadata: AnchorMetadata,
    pub receipt: AnchorReceipt,
}

#[derive(Default)]
struct MemoryAnchorState {
    unavailable: bool,
    reject_next: Option<String>,
    latency: Option<Duration>,
    receipts: HashMap<Digest, AnchorReceipt>,
    submissions: Vec<AnchorSubmission>,
}

/// In-process stand-in for the ledger, used by tests and the demo binary.
///
/// Receipts are `tx-` followed by the hex digest of the fingerprint and its
/// sorted metadata, so resubmissions are idempotent.
#[derive(Default)]
pub struct MemoryAnchor {
    state: Mutex<MemoryAnchorState>,
}

impl MemoryAnchor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the ledger going offline (or coming back).
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Reject the next submission with the given reason.
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.lock().reject_next = Some(reason.into());
    }

    /// Delay every submission, forcing interleaving in concurrency tests.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Distinct submissions accepted so far, in acceptance order.
    pub fn submissions(&self) -> Vec<AnchorSubmission> {
        self.lock().submissions.clone()
    }

    pub fn is_anchored(&self, receipt: &AnchorReceipt) -> bool {
        self.lock().receipts.values().any(|r| r == receipt)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryAnchorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn receipt_key(fingerprint: &Digest, metadata: &AnchorMetadata) -> Digest {
        let mut parts: Vec<&[u8]> = vec![fingerprint.as_bytes()];
        for (k, v) in metadata {
            parts.push(k.as_bytes());
            parts.push(v.as_bytes());
        }
        fingerprint_parts(&parts)
    }
}

#[async_trait]
impl AnchorClient for MemoryAnchor {
    async fn submit(
        &self,
        fingerprint: &Digest,
        metadata: &AnchorMetadata,
    ) -> Result<AnchorReceipt, AnchorError> {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if state.unavailable {
            return Err(AnchorError::Unreachable("memory ledger offline".to_string()));
        }
        if let Some(reason) = state.reject_next.take() {
            return Err(AnchorError::Rejected(reason));
        }

        let key = Self::receipt_key(fingerprint, metadata);
        if let Some(existing) = state.receipts.get(&key) {
            return Ok(existing.clone());
        }

        let receipt = AnchorReceipt::new(format!("tx-{}", key.to_hex()));
        state.receipts.insert(key, receipt.clone());
        state.submissions.push(AnchorSubmission {
            fingerprint: *fingerprint,
            metadata: metadata.clone(),
            receipt: receipt.clone(),
        });
        Ok(receipt)
    }
}

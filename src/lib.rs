// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! CareChain - Chain-of-Custody, Consent and Access-Control Core
//!
//! Records custody handoffs of patients and assets as hash-linked chains,
//! gates record access behind a consent ledger, and audits every operation
//! in a hash-chained log. Fingerprints are anchored to an external ledger
//! through the [`anchor::AnchorClient`] trait.
//!
//! ## Modules
//!
//! - `anchor` - Anchor client trait, in-memory ledger, timeout wrapper
//! - `audit` - Hash-chained audit streams
//! - `auth` - Roles, permissions and consent-backed authorization
//! - `consent` - Consent grants, revocation and expiry
//! - `custody` - Per-subject custody chains
//! - `records` - Versioned, encrypted record store
//! - `storage` - JSON/JSONL exports of audit streams and chains
//! - `state` - `CareLedger` aggregate

pub mod anchor;
pub mod audit;
pub mod auth;
pub mod cipher;
pub mod clock;
pub mod config;
pub mod consent;
pub mod custody;
pub mod error;
pub mod hasher;
pub mod locks;
pub mod models;
pub mod records;
pub mod report;
pub mod state;
pub mod storage;
pub mod subjects;

pub use error::{CoreError, CoreResult};
pub use state::CareLedger;

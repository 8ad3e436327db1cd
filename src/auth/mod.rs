// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authorization Module
//!
//! Role-based permissions backed by the consent ledger.
//!
//! ## Authorization Flow
//!
//! 1. Caller presents `(subject_id, actor_id, role, permission)`
//! 2. Record operations first pass the sensitivity gate: the role's
//!    clearance must reach the record's sensitivity, and `break_glass_only`
//!    records require the `emergency` role
//! 3. Owner shortcut: `actor_id == subject_id` with role `patient`
//! 4. Otherwise the actor needs an effective consent grant issued to them
//!    under that role, whose permissions include the one requested
//! 5. A one-time grant is spent only when the operation commits
//!
//! Break-glass overrides synthesize a short-lived grant. Each one is
//! anchored and audited, and counted for compliance reporting.

pub mod access;
pub mod roles;

pub use access::{AccessBasis, AccessController, Actor, Authorization};
pub use roles::{Permission, Role};

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Actor roles, permissions and the static role→permission map.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::{Sensitivity, UnknownVariant};

/// Operation a grant may permit on a subject's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Delete,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Delete => "delete",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actor roles for authorization.
///
/// ## Role Map
///
/// | Role | Permissions | Clearance |
/// |------|-------------|-----------|
/// | `patient` | read, write, delete | highly_restricted |
/// | `primary_care` | read, write, delete | highly_restricted |
/// | `specialist` | read, write | highly_restricted |
/// | `nurse` | read, write | restricted |
/// | `lab_technician` | read, write | restricted |
/// | `pharmacist` | read | restricted |
/// | `emergency` | read | break_glass_only |
/// | `caregiver` | read | normal |
/// | `researcher` | read | normal |
/// | `auditor` | read | restricted |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The subject themself (or their legal proxy)
    Patient,
    PrimaryCare,
    Specialist,
    Nurse,
    LabTechnician,
    Pharmacist,
    /// Emergency responders; the only role cleared for break-glass records
    Emergency,
    Caregiver,
    Researcher,
    Auditor,
}

impl Role {
    pub const ALL: [Role; 10] = [
        Role::Patient,
        Role::PrimaryCare,
        Role::Specialist,
        Role::Nurse,
        Role::LabTechnician,
        Role::Pharmacist,
        Role::Emergency,
        Role::Caregiver,
        Role::Researcher,
        Role::Auditor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::PrimaryCare => "primary_care",
            Role::Specialist => "specialist",
            Role::Nurse => "nurse",
            Role::LabTechnician => "lab_technician",
            Role::Pharmacist => "pharmacist",
            Role::Emergency => "emergency",
            Role::Caregiver => "caregiver",
            Role::Researcher => "researcher",
            Role::Auditor => "auditor",
        }
    }

    /// Permissions a grant issued to this role confers.
    pub fn permissions(&self) -> &'static [Permission] {
        use Permission::*;
        match self {
            Role::Patient | Role::PrimaryCare => &[Read, Write, Delete],
            Role::Specialist | Role::Nurse | Role::LabTechnician => &[Read, Write],
            Role::Pharmacist
            | Role::Emergency
            | Role::Caregiver
            | Role::Researcher
            | Role::Auditor => &[Read],
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    /// Highest record sensitivity this role may touch.
    pub fn clearance(&self) -> Sensitivity {
        match self {
            Role::Emergency => Sensitivity::BreakGlassOnly,
            Role::Patient | Role::PrimaryCare | Role::Specialist => Sensitivity::HighlyRestricted,
            Role::Nurse | Role::LabTechnician | Role::Pharmacist | Role::Auditor => {
                Sensitivity::Restricted
            }
            Role::Caregiver | Role::Researcher => Sensitivity::Normal,
        }
    }

    /// Sensitivity gate, independent of any grant.
    ///
    /// `break_glass_only` records are reachable by the emergency role alone.
    pub fn may_access(&self, sensitivity: Sensitivity) -> bool {
        if sensitivity == Sensitivity::BreakGlassOnly {
            return *self == Role::Emergency;
        }
        sensitivity <= self.clearance()
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    /// Parse role from string (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == wanted)
            .ok_or_else(|| UnknownVariant {
                kind: "role",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

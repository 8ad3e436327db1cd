// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Domain Enumerations
//!
//! Closed vocabularies shared by the consent ledger, record store and custody
//! chain. Values arriving as strings are parsed at the boundary and unknown
//! values are rejected; nothing falls back to a default variant.
//!
//! - [`Category`]: record / consent scope
//! - [`Sensitivity`]: ordered record classification
//! - [`HandoffType`]: kind of custody transfer
//! - [`RecordStatus`], [`SubjectKind`], [`SubjectStatus`]: lifecycles

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when a string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

fn parse_variant<T: Copy>(
    kind: &'static str,
    all: &[T],
    name: impl Fn(&T) -> &'static str,
    s: &str,
) -> Result<T, UnknownVariant> {
    let wanted = s.trim().to_lowercase();
    all.iter()
        .find(|v| name(*v) == wanted)
        .copied()
        .ok_or_else(|| UnknownVariant {
            kind,
            value: s.to_string(),
        })
}

// =============================================================================
// Category
// =============================================================================

/// Record category. Consent grants are scoped to a set of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Vitals,
    LabResults,
    Medications,
    Diagnoses,
    Imaging,
    ClinicalNotes,
    Allergies,
    Immunizations,
    Procedures,
    MentalHealth,
    Genomics,
    CarePlans,
}

impl Category {
    pub const ALL: [Category; 12] = [
        Category::Vitals,
        Category::LabResults,
        Category::Medications,
        Category::Diagnoses,
        Category::Imaging,
        Category::ClinicalNotes,
        Category::Allergies,
        Category::Immunizations,
        Category::Procedures,
        Category::MentalHealth,
        Category::Genomics,
        Category::CarePlans,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Vitals => "vitals",
            Category::LabResults => "lab_results",
            Category::Medications => "medications",
            Category::Diagnoses => "diagnoses",
            Category::Imaging => "imaging",
            Category::ClinicalNotes => "clinical_notes",
            Category::Allergies => "allergies",
            Category::Immunizations => "immunizations",
            Category::Procedures => "procedures",
            Category::MentalHealth => "mental_health",
            Category::Genomics => "genomics",
            Category::CarePlans => "care_plans",
        }
    }
}

impl FromStr for Category {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_variant("category", &Category::ALL, Category::as_str, s)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Sensitivity
// =============================================================================

/// Ordered record classification: `Normal < Restricted < HighlyRestricted <
/// BreakGlassOnly`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    #[default]
    Normal,
    Restricted,
    HighlyRestricted,
    BreakGlassOnly,
}

impl Sensitivity {
    pub const ALL: [Sensitivity; 4] = [
        Sensitivity::Normal,
        Sensitivity::Restricted,
        Sensitivity::HighlyRestricted,
        Sensitivity::BreakGlassOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sensitivity::Normal => "normal",
            Sensitivity::Restricted => "restricted",
            Sensitivity::HighlyRestricted => "highly_restricted",
            Sensitivity::BreakGlassOnly => "break_glass_only",
        }
    }

    /// Whether payloads at this level must be encrypted before storage.
    pub fn requires_encryption(&self) -> bool {
        *self != Sensitivity::Normal
    }
}

impl FromStr for Sensitivity {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_variant("sensitivity", &Sensitivity::ALL, Sensitivity::as_str, s)
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Handoff type
// =============================================================================

/// Kind of custody transfer recorded in a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffType {
    Referral,
    Transfer,
    Admission,
    Discharge,
    ShiftChange,
    Consultation,
    Emergency,
}

impl HandoffType {
    pub const ALL: [HandoffType; 7] = [
        HandoffType::Referral,
        HandoffType::Transfer,
        HandoffType::Admission,
        HandoffType::Discharge,
        HandoffType::ShiftChange,
        HandoffType::Consultation,
        HandoffType::Emergency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffType::Referral => "referral",
            HandoffType::Transfer => "transfer",
            HandoffType::Admission => "admission",
            HandoffType::Discharge => "discharge",
            HandoffType::ShiftChange => "shift_change",
            HandoffType::Consultation => "consultation",
            HandoffType::Emergency => "emergency",
        }
    }
}

impl FromStr for HandoffType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_variant("handoff type", &HandoffType::ALL, HandoffType::as_str, s)
    }
}

impl fmt::Display for HandoffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Lifecycles
// =============================================================================

/// Record lifecycle. Deletion is soft; payloads are retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Active,
    Deleted,
}

/// What a subject identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Patient,
    Asset,
}

/// Subjects are never removed, only marked inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectStatus {
    Active,
    Inactive,
}

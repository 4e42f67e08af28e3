//! Lifecycle phases and the rule for deriving one from a status document.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::AppDocument;

/// Coarse lifecycle state of a submitted application.
///
/// Mirrors the pod lifecycle phases plus two synthetic values:
/// - `Empty`: no status sub-document at all (the operator has not observed the resource yet)
/// - `Initiating`: freshly created, status not assigned yet (only ever a caller-supplied default)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Empty,
    Initiating,
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Empty,
        Phase::Initiating,
        Phase::Pending,
        Phase::Running,
        Phase::Succeeded,
        Phase::Failed,
        Phase::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Empty => "EMPTY",
            Phase::Initiating => "INITIATING",
            Phase::Pending => "PENDING",
            Phase::Running => "RUNNING",
            Phase::Succeeded => "SUCCEEDED",
            Phase::Failed => "FAILED",
            Phase::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhaseError {
    #[error("unrecognized phase: {0:?}")]
    Unrecognized(String),
    #[error("status present but has no phase")]
    MissingPhase,
}

impl FromStr for Phase {
    type Err = PhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Phase::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| PhaseError::Unrecognized(s.to_string()))
    }
}

/// Derive the phase of a document.
///
/// - status with a `phase` field: parsed case-insensitively, unknown strings fail
/// - no status at all: `default`, or `Empty` when none is given
/// - status without `phase`: `default` when given, otherwise `MissingPhase`
pub fn derive_phase(doc: &AppDocument, default: Option<Phase>) -> Result<Phase, PhaseError> {
    match &doc.status {
        None => Ok(default.unwrap_or(Phase::Empty)),
        Some(status) => match status.phase.as_deref() {
            Some(raw) => raw.parse(),
            None => default.ok_or(PhaseError::MissingPhase),
        },
    }
}

//! Per-record failure taxonomy

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an address did not reach `joined`
///
/// Ordering is stable so per-reason breakdowns serialize identically
/// across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Empty or malformed address, no request issued
    InvalidInput,
    /// Service returned no match
    NotFound,
    /// Several candidates, none clearly best
    Ambiguous,
    /// Transient service errors on every permitted attempt
    TransientExhausted,
    /// Geocoded position outside the valid degree ranges
    InvalidCoordinate,
    /// Point and polygons are in different reference systems
    ReprojectionMismatch,
}

impl FailureReason {
    pub const ALL: [FailureReason; 6] = [
        FailureReason::InvalidInput,
        FailureReason::NotFound,
        FailureReason::Ambiguous,
        FailureReason::TransientExhausted,
        FailureReason::InvalidCoordinate,
        FailureReason::ReprojectionMismatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InvalidInput => "invalid_input",
            FailureReason::NotFound => "not_found",
            FailureReason::Ambiguous => "ambiguous",
            FailureReason::TransientExhausted => "transient_exhausted",
            FailureReason::InvalidCoordinate => "invalid_coordinate",
            FailureReason::ReprojectionMismatch => "reprojection_mismatch",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure captured on an address record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub reason: FailureReason,
    pub detail: String,
}

impl RecordFailure {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.detail)
    }
}

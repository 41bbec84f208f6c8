//! Result of resolving one address

use super::{Coordinate, FailureReason, RecordFailure};

/// Accepted geocoder candidate
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeMatch {
    pub coordinate: Coordinate,
    pub matched_address: String,
    /// Similarity of query to matched address (0.0-1.0)
    pub confidence: f64,
    /// Distinct candidates the service returned
    pub candidates: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeOutcome {
    Matched(GeocodeMatch),
    Failed(RecordFailure),
}

/// Created per address by the geocoder client, consumed by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeResult {
    /// Normalized query string
    pub address: String,
    pub outcome: GeocodeOutcome,
    /// Requests issued (0 when rejected before any network call)
    pub attempts: u32,
    /// The service refused the request itself (4xx or an error body)
    pub service_rejected: bool,
}

impl GeocodeResult {
    pub fn matched(address: impl Into<String>, matched: GeocodeMatch, attempts: u32) -> Self {
        Self {
            address: address.into(),
            outcome: GeocodeOutcome::Matched(matched),
            attempts,
            service_rejected: false,
        }
    }

    pub fn failed(
        address: impl Into<String>,
        reason: FailureReason,
        detail: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            address: address.into(),
            outcome: GeocodeOutcome::Failed(RecordFailure::new(reason, detail)),
            attempts,
            service_rejected: false,
        }
    }

    /// Request refused by the service; recorded as `not_found`
    pub fn rejected(address: impl Into<String>, detail: impl Into<String>, attempts: u32) -> Self {
        Self {
            service_rejected: true,
            ..Self::failed(address, FailureReason::NotFound, detail, attempts)
        }
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match &self.outcome {
            GeocodeOutcome::Matched(_) => None,
            GeocodeOutcome::Failed(failure) => Some(failure.reason),
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self.outcome, GeocodeOutcome::Matched(_))
    }
}

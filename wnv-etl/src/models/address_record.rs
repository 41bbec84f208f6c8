//! Address record lifecycle
//!
//! Status progresses PENDING → GEOCODED → JOINED, or moves to the terminal
//! FAILED state from any non-terminal state. Status never regresses.

use super::{Coordinate, ProjectedPoint, RecordFailure};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Processing status of one address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Not yet geocoded (or never attempted because the run aborted)
    Pending,
    /// Coordinate resolved, spatial join outstanding
    Geocoded,
    /// Terminal: a stage failed, reason recorded
    Failed,
    /// Terminal: spatial join done, category or no match recorded
    Joined,
}

impl RecordStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Failed | RecordStatus::Joined)
    }

    /// Whether moving to `next` keeps the lifecycle monotonic
    pub fn can_transition_to(&self, next: RecordStatus) -> bool {
        match (self, next) {
            (RecordStatus::Pending, RecordStatus::Geocoded) => true,
            (RecordStatus::Geocoded, RecordStatus::Joined) => true,
            (current, RecordStatus::Failed) => !current.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Geocoded => "geocoded",
            RecordStatus::Failed => "failed",
            RecordStatus::Joined => "joined",
        }
    }
}

/// Rejected status change
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Illegal status transition for record {id}: {from:?} -> {to:?}")]
pub struct StatusTransitionError {
    pub id: String,
    pub from: RecordStatus,
    pub to: RecordStatus,
}

/// One address carried through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressRecord {
    /// Row key from the address source
    pub id: String,
    /// Address exactly as supplied by the source
    pub raw_address: String,
    /// Normalized query string sent to the geocoder
    pub address: String,
    pub status: RecordStatus,
    pub coordinate: Option<Coordinate>,
    pub point: Option<ProjectedPoint>,
    /// Category of the containing risk polygon; `None` on a joined record means no match
    pub risk_category: Option<String>,
    /// Identifier of the containing risk polygon
    pub polygon_id: Option<String>,
    pub matched_address: Option<String>,
    /// Similarity of query to matched address (0.0-1.0)
    pub match_confidence: Option<f64>,
    /// Geocode requests issued for this record
    pub attempts: u32,
    pub failure: Option<RecordFailure>,
}

impl AddressRecord {
    /// Create a pending record; the query string is the normalized raw address
    pub fn new(id: impl Into<String>, raw_address: impl Into<String>) -> Self {
        let raw_address = raw_address.into();
        let address = normalize_address(&raw_address);
        Self {
            id: id.into(),
            raw_address,
            address,
            status: RecordStatus::Pending,
            coordinate: None,
            point: None,
            risk_category: None,
            polygon_id: None,
            matched_address: None,
            match_confidence: None,
            attempts: 0,
            failure: None,
        }
    }

    fn transition(&mut self, next: RecordStatus) -> Result<(), StatusTransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(StatusTransitionError {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// PENDING → GEOCODED
    pub fn mark_geocoded(
        &mut self,
        coordinate: Coordinate,
        matched_address: impl Into<String>,
        confidence: f64,
    ) -> Result<(), StatusTransitionError> {
        self.transition(RecordStatus::Geocoded)?;
        self.coordinate = Some(coordinate);
        self.matched_address = Some(matched_address.into());
        self.match_confidence = Some(confidence);
        Ok(())
    }

    /// GEOCODED → JOINED
    pub fn mark_joined(
        &mut self,
        point: ProjectedPoint,
        containing: Option<(String, String)>,
    ) -> Result<(), StatusTransitionError> {
        self.transition(RecordStatus::Joined)?;
        self.point = Some(point);
        if let Some((polygon_id, category)) = containing {
            self.polygon_id = Some(polygon_id);
            self.risk_category = Some(category);
        }
        Ok(())
    }

    /// Any non-terminal state → FAILED
    pub fn mark_failed(&mut self, failure: RecordFailure) -> Result<(), StatusTransitionError> {
        self.transition(RecordStatus::Failed)?;
        self.failure = Some(failure);
        Ok(())
    }

    /// Joined inside some risk polygon
    pub fn is_matched(&self) -> bool {
        self.status == RecordStatus::Joined && self.risk_category.is_some()
    }
}

/// Trim and collapse internal whitespace runs to single spaces
pub fn normalize_address(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

//! Data models for wnv-etl
//!
//! - Address record lifecycle (pending → geocoded → joined | failed)
//! - Risk polygon reference data
//! - Per-address geocode results
//! - Pipeline run with aggregate counts

pub mod address_record;
pub mod coordinate;
pub mod crs;
pub mod failure;
pub mod geocode_result;
pub mod pipeline_run;
pub mod risk_polygon;

pub use address_record::{normalize_address, AddressRecord, RecordStatus, StatusTransitionError};
pub use coordinate::{Coordinate, ProjectedPoint};
pub use crs::Crs;
pub use failure::{FailureReason, RecordFailure};
pub use geocode_result::{GeocodeMatch, GeocodeOutcome, GeocodeResult};
pub use pipeline_run::{records_digest, FailureEntry, PipelineRun, RunStats, RunStatus, RunSummary};
pub use risk_polygon::{PolygonSet, RiskPolygon};

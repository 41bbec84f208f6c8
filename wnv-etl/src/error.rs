//! Run-level error types for wnv-etl
//!
//! Per-record problems never surface here; they are captured on the
//! `AddressRecord` as a `RecordFailure`. These errors stop a run.

use crate::models::StatusTransitionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EtlError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Address source could not be read
    #[error("Address source error: {0}")]
    Source(String),

    /// Risk polygon layer could not be loaded
    #[error("Polygon layer error: {0}")]
    PolygonLoad(String),

    /// Converter target and polygon layer disagree on reference system
    #[error("Reference system mismatch: {0}")]
    ReprojectionMismatch(String),

    /// Geocoding service failed the initial probe
    #[error("Geocoding service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Report files could not be written
    #[error("Report output error: {0}")]
    Output(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// wnv-common error
    #[error("Common error: {0}")]
    Common(#[from] wnv_common::Error),
}

impl From<StatusTransitionError> for EtlError {
    fn from(err: StatusTransitionError) -> Self {
        EtlError::Internal(err.to_string())
    }
}

/// Result type for pipeline operations
pub type EtlResult<T> = Result<T, EtlError>;

//! Pipeline services
//!
//! Leaf first: geocoding (client + Census adapter), point conversion,
//! polygon containment, then the orchestrator. Address source, polygon
//! loader and report writer sit at the edges of a run.

pub mod address_source;
pub mod census_geocoder;
pub mod containment_engine;
pub mod geocoder_client;
pub mod pipeline_orchestrator;
pub mod polygon_loader;
pub mod report_writer;
pub mod spatial_converter;

pub use address_source::{
    parse_address_csv, source_from_config, AddressRow, AddressSource, CsvFileSource, CsvLayout,
    RemoteCsvSource,
};
pub use census_geocoder::{parse_census_body, CensusGeocoder};
pub use containment_engine::{linear_scan, Containment, ContainmentEngine};
pub use geocoder_client::{match_confidence, AttemptOutcome, Candidate, GeocodeService, GeocoderClient};
pub use pipeline_orchestrator::{
    PipelineOptions, PipelineOrchestrator, ABORT_CANCELLED, ABORT_EXCESSIVE_FAILURES,
};
pub use polygon_loader::{load_polygons, parse_polygons};
pub use report_writer::{ReportPaths, ReportWriter};
pub use spatial_converter::{
    ConversionError, LambertConformalConic, SpatialConverter, TransverseMercator,
};

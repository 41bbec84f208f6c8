//! Run report files
//!
//! Written into `proj_dir` after a run:
//! - `all_addresses.csv`: every input row with its final status
//! - `spraying_addresses.csv`: joined rows in a high-risk category
//! - `run_summary.json`: run metadata, counts and per-row failures

use crate::error::{EtlError, EtlResult};
use crate::models::{AddressRecord, PipelineRun};
use serde::Serialize;
use std::path::{Path, PathBuf};
use wnv_common::config::TomlConfig;

/// Output file locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub all_csv: PathBuf,
    pub high_risk_csv: PathBuf,
    pub summary_json: PathBuf,
}

impl ReportPaths {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            all_csv: config.output_path(&config.output.all_csv),
            high_risk_csv: config.output_path(&config.output.high_risk_csv),
            summary_json: config.output_path(&config.output.summary_json),
        }
    }

    /// Default file names inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            all_csv: dir.join("all_addresses.csv"),
            high_risk_csv: dir.join("spraying_addresses.csv"),
            summary_json: dir.join("run_summary.json"),
        }
    }
}

/// Flat CSV row for one record
#[derive(Debug, Serialize)]
struct RecordRow<'a> {
    id: &'a str,
    raw_address: &'a str,
    address: &'a str,
    status: &'static str,
    latitude: Option<f64>,
    longitude: Option<f64>,
    x: Option<f64>,
    y: Option<f64>,
    crs: Option<String>,
    risk_category: Option<&'a str>,
    polygon_id: Option<&'a str>,
    matched_address: Option<&'a str>,
    match_confidence: Option<f64>,
    attempts: u32,
    failure_reason: Option<&'static str>,
    failure_detail: Option<&'a str>,
}

impl<'a> From<&'a AddressRecord> for RecordRow<'a> {
    fn from(record: &'a AddressRecord) -> Self {
        Self {
            id: &record.id,
            raw_address: &record.raw_address,
            address: &record.address,
            status: record.status.as_str(),
            latitude: record.coordinate.map(|c| c.latitude),
            longitude: record.coordinate.map(|c| c.longitude),
            x: record.point.map(|p| p.x),
            y: record.point.map(|p| p.y),
            crs: record.point.map(|p| p.crs.to_string()),
            risk_category: record.risk_category.as_deref(),
            polygon_id: record.polygon_id.as_deref(),
            matched_address: record.matched_address.as_deref(),
            match_confidence: record.match_confidence,
            attempts: record.attempts,
            failure_reason: record.failure.as_ref().map(|f| f.reason.as_str()),
            failure_detail: record.failure.as_ref().map(|f| f.detail.as_str()),
        }
    }
}

pub struct ReportWriter {
    paths: ReportPaths,
}

impl ReportWriter {
    pub fn new(paths: ReportPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ReportPaths {
        &self.paths
    }

    /// Write all three report files, creating parent directories as needed
    pub fn write(&self, run: &PipelineRun) -> EtlResult<()> {
        for path in [
            &self.paths.all_csv,
            &self.paths.high_risk_csv,
            &self.paths.summary_json,
        ] {
            ensure_parent(path)?;
        }

        write_records(&self.paths.all_csv, run.records.iter())?;
        let high_risk = run.high_risk_records();
        write_records(&self.paths.high_risk_csv, high_risk.iter().copied())?;

        let summary = serde_json::to_string_pretty(&run.summary())
            .map_err(|e| EtlError::Output(format!("Failed to encode run summary: {}", e)))?;
        std::fs::write(&self.paths.summary_json, summary).map_err(|e| {
            EtlError::Output(format!(
                "Write {} failed: {}",
                self.paths.summary_json.display(),
                e
            ))
        })?;

        tracing::info!(
            all = %self.paths.all_csv.display(),
            high_risk = %self.paths.high_risk_csv.display(),
            summary = %self.paths.summary_json.display(),
            records = run.records.len(),
            high_risk_records = high_risk.len(),
            "Reports written"
        );

        Ok(())
    }
}

fn ensure_parent(path: &Path) -> EtlResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|e| EtlError::Output(format!("Create {} failed: {}", parent.display(), e))),
        _ => Ok(()),
    }
}

fn write_records<'a>(
    path: &Path,
    records: impl Iterator<Item = &'a AddressRecord>,
) -> EtlResult<()> {
    let output_error = |e: csv::Error| EtlError::Output(format!("Write {} failed: {}", path.display(), e));

    let mut writer = csv::Writer::from_path(path).map_err(output_error)?;
    let mut wrote_any = false;
    for record in records {
        writer.serialize(RecordRow::from(record)).map_err(output_error)?;
        wrote_any = true;
    }

    // Header-only file for an empty subset
    if !wrote_any {
        writer.write_record(RECORD_COLUMNS).map_err(output_error)?;
    }

    writer
        .flush()
        .map_err(|e| EtlError::Output(format!("Write {} failed: {}", path.display(), e)))
}

const RECORD_COLUMNS: [&str; 16] = [
    "id",
    "raw_address",
    "address",
    "status",
    "latitude",
    "longitude",
    "x",
    "y",
    "crs",
    "risk_category",
    "polygon_id",
    "matched_address",
    "match_confidence",
    "attempts",
    "failure_reason",
    "failure_detail",
];

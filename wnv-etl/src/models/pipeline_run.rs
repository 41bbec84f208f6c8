//! Pipeline run: ordered records plus aggregate counts
//!
//! This is the unit handed to the export collaborators. Aggregates are
//! computed once from the ordered records, never incrementally from
//! concurrent workers.

use super::{AddressRecord, Crs, FailureReason, RecordStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Run lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    /// Stopped issuing geocode calls; unissued records remain pending
    Aborted { reason: String },
}

/// Aggregate counts over a run's records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total: usize,
    /// Records that received a coordinate (including those failing later stages)
    pub geocoded: usize,
    pub joined: usize,
    pub failed: usize,
    /// Never attempted (run aborted)
    pub pending: usize,
    /// Joined inside some polygon
    pub matched: usize,
    /// Joined outside all polygons
    pub no_match: usize,
    pub failed_by_reason: BTreeMap<FailureReason, usize>,
    pub matched_by_category: BTreeMap<String, usize>,
}

impl RunStats {
    pub fn from_records(records: &[AddressRecord]) -> Self {
        let mut stats = RunStats {
            total: records.len(),
            ..Default::default()
        };

        for record in records {
            if record.coordinate.is_some() {
                stats.geocoded += 1;
            }
            match record.status {
                RecordStatus::Pending | RecordStatus::Geocoded => stats.pending += 1,
                RecordStatus::Failed => {
                    stats.failed += 1;
                    if let Some(failure) = &record.failure {
                        *stats.failed_by_reason.entry(failure.reason).or_insert(0) += 1;
                    }
                }
                RecordStatus::Joined => {
                    stats.joined += 1;
                    match &record.risk_category {
                        Some(category) => {
                            stats.matched += 1;
                            *stats.matched_by_category.entry(category.clone()).or_insert(0) += 1;
                        }
                        None => stats.no_match += 1,
                    }
                }
            }
        }

        stats
    }

    pub fn failed_with(&self, reason: FailureReason) -> usize {
        self.failed_by_reason.get(&reason).copied().unwrap_or(0)
    }

    pub fn matched_in(&self, category: &str) -> usize {
        self.matched_by_category.get(category).copied().unwrap_or(0)
    }

    /// `reason=count` pairs for log lines, in stable order
    pub fn failure_breakdown(&self) -> String {
        self.failed_by_reason
            .iter()
            .map(|(reason, count)| format!("{}={}", reason, count))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// One execution of the pipeline over an address batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    /// Operator-supplied label (map subtitle)
    pub label: Option<String>,
    pub status: RunStatus,
    /// Reference system of every projected point in the run
    pub crs: Crs,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Categories that select the high-risk subset
    pub high_risk_categories: Vec<String>,
    /// Input order preserved
    pub records: Vec<AddressRecord>,
    pub stats: RunStats,
    /// SHA-256 over the ordered records (hex)
    pub digest: String,
}

impl PipelineRun {
    pub fn new(crs: Crs, high_risk_categories: Vec<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            label: None,
            status: RunStatus::Running,
            crs,
            started_at: Utc::now(),
            finished_at: None,
            high_risk_categories,
            records: Vec::new(),
            stats: RunStats::default(),
            digest: String::new(),
        }
    }

    /// Attach processed records, compute aggregates and digest, stamp the end time
    pub fn finalize(&mut self, records: Vec<AddressRecord>, label: Option<String>, status: RunStatus) {
        self.records = records;
        self.label = label;
        self.status = status;
        self.stats = RunStats::from_records(&self.records);
        self.digest = records_digest(&self.records);
        self.finished_at = Some(Utc::now());
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.status, RunStatus::Aborted { .. })
    }

    /// Joined records whose category is high-risk, in input order
    pub fn high_risk_records(&self) -> Vec<&AddressRecord> {
        self.records
            .iter()
            .filter(|r| {
                r.status == RecordStatus::Joined
                    && r
                        .risk_category
                        .as_ref()
                        .is_some_and(|c| self.high_risk_categories.iter().any(|h| h == c))
            })
            .collect()
    }

    pub fn failed_records(&self) -> Vec<&AddressRecord> {
        self.records
            .iter()
            .filter(|r| r.status == RecordStatus::Failed)
            .collect()
    }

    /// Run metadata and counts without the record list
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            label: self.label.clone(),
            status: self.status.clone(),
            crs: self.crs,
            started_at: self.started_at,
            finished_at: self.finished_at,
            high_risk_categories: self.high_risk_categories.clone(),
            high_risk_count: self.high_risk_records().len(),
            stats: self.stats.clone(),
            digest: self.digest.clone(),
            failures: self
                .failed_records()
                .into_iter()
                .filter_map(|r| {
                    r.failure.as_ref().map(|f| FailureEntry {
                        id: r.id.clone(),
                        address: r.raw_address.clone(),
                        reason: f.reason,
                        detail: f.detail.clone(),
                    })
                })
                .collect(),
        }
    }
}

/// Serializable run overview for operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub label: Option<String>,
    pub status: RunStatus,
    pub crs: Crs,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub high_risk_categories: Vec<String>,
    pub high_risk_count: usize,
    pub stats: RunStats,
    pub digest: String,
    pub failures: Vec<FailureEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEntry {
    pub id: String,
    pub address: String,
    pub reason: FailureReason,
    pub detail: String,
}

/// Hex SHA-256 of the records' JSON encoding
pub fn records_digest(records: &[AddressRecord]) -> String {
    let mut hasher = Sha256::new();
    for record in records {
        // Serializing plain data structs with string keys cannot fail
        if let Ok(bytes) = serde_json::to_vec(record) {
            hasher.update(&bytes);
        }
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

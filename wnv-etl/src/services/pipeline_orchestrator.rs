//! Pipeline orchestrator
//!
//! Drives one run over an ordered address batch:
//!
//! ```text
//! rows → probe (sequential) → geocode pool (buffer_unordered) → convert → contain → PipelineRun
//! ```
//!
//! # Concurrency
//! Only geocoding is concurrent. Workers return `(index, result)` pairs and
//! the orchestrator applies them to its own record list afterwards, so the
//! records are never shared between tasks. Conversion and containment run
//! in index order on the single orchestrator task.
//!
//! # Cancellation
//! The caller's token is wrapped in a child token. Cancelling either stops
//! new geocode calls; calls already in flight complete. Records never
//! issued stay `pending` and the run ends `aborted`. The child token is
//! also cancelled by the failure-rate monitor.

use super::address_source::AddressRow;
use super::containment_engine::ContainmentEngine;
use super::geocoder_client::GeocoderClient;
use super::spatial_converter::SpatialConverter;
use crate::error::{EtlError, EtlResult};
use crate::models::{
    AddressRecord, FailureReason, GeocodeOutcome, GeocodeResult, PipelineRun, PolygonSet,
    RecordFailure, RecordStatus, RunStatus,
};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wnv_common::config::TomlConfig;

/// Abort reason when the caller cancels the run
pub const ABORT_CANCELLED: &str = "cancelled";

/// Abort reason when the failure-rate monitor trips
pub const ABORT_EXCESSIVE_FAILURES: &str = "excessive_failure_rate";

/// Run tuning, usually taken from `[geocoder]`, `[pipeline]` and `[output]`
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub concurrency: usize,
    pub probe_size: usize,
    pub max_failure_ratio: Option<f64>,
    pub min_sample: usize,
    pub high_risk_categories: Vec<String>,
}

impl PipelineOptions {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            concurrency: config.geocoder.concurrency.max(1),
            probe_size: config.pipeline.probe_size,
            max_failure_ratio: config.pipeline.max_failure_ratio,
            min_sample: config.pipeline.min_sample,
            high_risk_categories: config.output.high_risk_categories.clone(),
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&TomlConfig::default())
    }
}

/// Tracks geocode failures across workers and trips the run token
struct FailureMonitor {
    max_ratio: Option<f64>,
    min_sample: usize,
    attempted: AtomicUsize,
    failed: AtomicUsize,
    tripped: AtomicBool,
}

impl FailureMonitor {
    fn new(options: &PipelineOptions) -> Self {
        Self {
            max_ratio: options.max_failure_ratio,
            min_sample: options.min_sample.max(1),
            attempted: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            tripped: AtomicBool::new(false),
        }
    }

    /// Count one result; cancels `token` the first time the ratio is exceeded
    ///
    /// Rows that never reached the service (blank input) are not counted.
    fn observe(&self, result: &GeocodeResult, token: &CancellationToken) {
        if result.attempts == 0 {
            return;
        }
        let attempted = self.attempted.fetch_add(1, Ordering::SeqCst) + 1;
        let failed = if result.is_matched() {
            self.failed.load(Ordering::SeqCst)
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst) + 1
        };

        let Some(max_ratio) = self.max_ratio else {
            return;
        };
        if attempted < self.min_sample {
            return;
        }

        let ratio = failed as f64 / attempted as f64;
        if ratio > max_ratio
            && self
                .tripped
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            tracing::error!(
                attempted,
                failed,
                ratio,
                max_ratio,
                "Geocode failure rate exceeded, aborting run"
            );
            token.cancel();
        }
    }

    fn tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }
}

/// Geocode + spatial join pipeline
pub struct PipelineOrchestrator {
    geocoder: Arc<GeocoderClient>,
    converter: SpatialConverter,
    engine: ContainmentEngine,
    options: PipelineOptions,
}

impl PipelineOrchestrator {
    /// Orchestrator converting into the polygon layer's own reference system
    pub fn new(
        geocoder: Arc<GeocoderClient>,
        polygons: Arc<PolygonSet>,
        options: PipelineOptions,
    ) -> EtlResult<Self> {
        let converter = SpatialConverter::for_polygons(&polygons);
        Self::with_converter(geocoder, polygons, converter, options)
    }

    /// Orchestrator with an explicit converter; refuses a mismatched layer
    pub fn with_converter(
        geocoder: Arc<GeocoderClient>,
        polygons: Arc<PolygonSet>,
        converter: SpatialConverter,
        options: PipelineOptions,
    ) -> EtlResult<Self> {
        converter
            .ensure_compatible(&polygons)
            .map_err(|e| EtlError::ReprojectionMismatch(e.to_string()))?;

        Ok(Self {
            geocoder,
            converter,
            engine: ContainmentEngine::new(polygons),
            options,
        })
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Process `rows` into a finalized run
    ///
    /// Per-record failures are captured on the records. Errors are returned
    /// only for run-level problems (the service probe failing outright).
    pub async fn run(
        &self,
        rows: Vec<AddressRow>,
        label: Option<String>,
        cancel_token: CancellationToken,
    ) -> EtlResult<PipelineRun> {
        let start_time = std::time::Instant::now();
        let mut run = PipelineRun::new(
            self.engine.crs(),
            self.options.high_risk_categories.clone(),
        );

        let mut records: Vec<AddressRecord> = rows
            .into_iter()
            .map(|row| AddressRecord::new(row.id, row.address))
            .collect();
        let total = records.len();

        tracing::info!(
            run_id = %run.run_id,
            rows = total,
            crs = %run.crs,
            service = self.geocoder.service_name(),
            concurrency = self.options.concurrency,
            polygons = self.engine.polygons().len(),
            "Starting pipeline run"
        );

        let run_token = cancel_token.child_token();
        let monitor = FailureMonitor::new(&self.options);
        let mut results: Vec<Option<GeocodeResult>> = vec![None; total];

        // Probe: sequential, fails the run if the service is plainly down
        let probe_count = self.options.probe_size.min(total);
        for index in 0..probe_count {
            if run_token.is_cancelled() {
                break;
            }
            let result = self.geocoder.geocode(&records[index].address).await;
            monitor.observe(&result, &run_token);
            results[index] = Some(result);
        }
        check_probe(&results[..probe_count])?;

        // Pool: remaining rows, results keyed by index
        let pending: Vec<(usize, String)> = records
            .iter()
            .enumerate()
            .skip(probe_count)
            .map(|(index, record)| (index, record.address.clone()))
            .collect();

        let geocoder = &self.geocoder;
        let monitor_ref = &monitor;
        let token_ref = &run_token;

        let pooled: Vec<(usize, Option<GeocodeResult>)> = stream::iter(pending)
            .map(|(index, address)| async move {
                // Check cancellation before issuing
                if token_ref.is_cancelled() {
                    return (index, None);
                }

                tracing::debug!(row_index = index, "Worker geocoding address");
                let result = geocoder.geocode(&address).await;
                monitor_ref.observe(&result, token_ref);
                (index, Some(result))
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        for (index, result) in pooled {
            results[index] = result;
        }

        // Apply geocode outcomes in index order
        for (record, result) in records.iter_mut().zip(results) {
            let Some(result) = result else {
                continue;
            };
            record.attempts = result.attempts;
            match result.outcome {
                GeocodeOutcome::Matched(m) => {
                    record.mark_geocoded(m.coordinate, m.matched_address, m.confidence)?
                }
                GeocodeOutcome::Failed(failure) => record.mark_failed(failure)?,
            }
        }

        tracing::debug!(run_id = %run.run_id, "Geocoding stage finished, starting spatial join");
        for record in records.iter_mut() {
            self.join_record(record)?;
        }

        let status = if monitor.tripped() {
            RunStatus::Aborted {
                reason: ABORT_EXCESSIVE_FAILURES.to_string(),
            }
        } else if run_token.is_cancelled() {
            RunStatus::Aborted {
                reason: ABORT_CANCELLED.to_string(),
            }
        } else {
            RunStatus::Completed
        };

        run.finalize(records, label, status);

        let stats = &run.stats;
        tracing::info!(
            run_id = %run.run_id,
            status = ?run.status,
            total = stats.total,
            joined = stats.joined,
            matched = stats.matched,
            no_match = stats.no_match,
            failed = stats.failed,
            pending = stats.pending,
            failures = %stats.failure_breakdown(),
            high_risk = run.high_risk_records().len(),
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Pipeline run finished"
        );

        Ok(run)
    }

    /// Convert and contain one geocoded record; other states pass through
    fn join_record(&self, record: &mut AddressRecord) -> EtlResult<()> {
        if record.status != RecordStatus::Geocoded {
            return Ok(());
        }
        let Some(coordinate) = record.coordinate else {
            record.mark_failed(RecordFailure::new(
                FailureReason::InvalidCoordinate,
                "geocoded record has no coordinate",
            ))?;
            return Ok(());
        };

        let joined = self
            .converter
            .convert(coordinate)
            .and_then(|point| self.engine.contain(&point).map(|c| (point, c)));

        match joined {
            Ok((point, containment)) => {
                tracing::debug!(
                    row_id = %record.id,
                    x = point.x,
                    y = point.y,
                    category = ?containment.risk_category(),
                    "Record joined"
                );
                record.mark_joined(point, containment.into_match())?;
            }
            Err(e) => {
                tracing::warn!(row_id = %record.id, error = %e, "Spatial join failed");
                record.mark_failed(RecordFailure::new(e.reason(), e.to_string()))?;
            }
        }
        Ok(())
    }
}

/// Fail when no probe that reached the service got a usable answer
///
/// Every issued probe must have exhausted its retries or been refused by the
/// service. A plain "no match" still shows the service is reachable.
fn check_probe(probe: &[Option<GeocodeResult>]) -> EtlResult<()> {
    let issued: Vec<&GeocodeResult> = probe
        .iter()
        .flatten()
        .filter(|r| r.attempts > 0)
        .collect();

    let unreachable = |r: &&GeocodeResult| {
        r.service_rejected || r.failure_reason() == Some(FailureReason::TransientExhausted)
    };

    if !issued.is_empty() && issued.iter().all(unreachable) {
        let last = issued
            .last()
            .and_then(|r| match &r.outcome {
                GeocodeOutcome::Failed(f) => Some(f.detail.clone()),
                GeocodeOutcome::Matched(_) => None,
            })
            .unwrap_or_default();
        let rejected = issued.iter().filter(|r| r.service_rejected).count();
        tracing::error!(
            probes = issued.len(),
            rejected,
            last_error = %last,
            "Service probe failed"
        );
        return Err(EtlError::ServiceUnavailable(format!(
            "all {} probe addresses failed ({} rejected by the service): {}",
            issued.len(),
            rejected,
            last
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Coordinate;

    fn options(max_failure_ratio: Option<f64>, min_sample: usize) -> PipelineOptions {
        PipelineOptions {
            max_failure_ratio,
            min_sample,
            ..PipelineOptions::default()
        }
    }

    fn failed() -> GeocodeResult {
        GeocodeResult::failed("x", FailureReason::NotFound, "none", 1)
    }

    #[test]
    fn test_monitor_waits_for_min_sample() {
        let monitor = FailureMonitor::new(&options(Some(0.5), 3));
        let token = CancellationToken::new();

        monitor.observe(&failed(), &token);
        monitor.observe(&failed(), &token);
        assert!(!token.is_cancelled());

        monitor.observe(&failed(), &token);
        assert!(token.is_cancelled());
        assert!(monitor.tripped());
    }

    #[test]
    fn test_monitor_disabled_without_ratio() {
        let monitor = FailureMonitor::new(&options(None, 1));
        let token = CancellationToken::new();
        for _ in 0..20 {
            monitor.observe(&failed(), &token);
        }
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_probe_ignores_requests_never_issued() {
        let probe = vec![
            Some(GeocodeResult::failed("", FailureReason::InvalidInput, "empty", 0)),
            None,
        ];
        assert!(check_probe(&probe).is_ok());
    }

    #[test]
    fn test_probe_fails_when_all_exhausted() {
        let probe = vec![
            Some(GeocodeResult::failed("a", FailureReason::TransientExhausted, "503", 3)),
            Some(GeocodeResult::failed("b", FailureReason::TransientExhausted, "503", 3)),
        ];
        assert!(matches!(check_probe(&probe), Err(EtlError::ServiceUnavailable(_))));
    }

    #[test]
    fn test_service_refusing_every_request_fails_run_start() {
        let probe = vec![
            Some(GeocodeResult::rejected("a", "HTTP 404 Not Found", 1)),
            Some(GeocodeResult::failed("b", FailureReason::TransientExhausted, "503", 3)),
            Some(GeocodeResult::rejected("c", "HTTP 404 Not Found", 1)),
        ];
        assert!(matches!(check_probe(&probe), Err(EtlError::ServiceUnavailable(_))));
    }

    #[test]
    fn test_no_match_answers_keep_run_going() {
        let probe = vec![
            Some(GeocodeResult::rejected("a", "HTTP 404 Not Found", 1)),
            Some(GeocodeResult::failed("b", FailureReason::NotFound, "no matches", 1)),
        ];
        assert!(check_probe(&probe).is_ok());
    }

    #[test]
    fn test_monitor_skips_rows_never_sent() {
        let monitor = FailureMonitor::new(&options(Some(0.5), 2));
        let token = CancellationToken::new();
        let blank = GeocodeResult::failed("", FailureReason::InvalidInput, "empty", 0);

        for _ in 0..10 {
            monitor.observe(&blank, &token);
        }
        assert!(!token.is_cancelled());

        monitor.observe(&failed(), &token);
        monitor.observe(&failed(), &token);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_probe_passes_with_one_answer() {
        let probe = vec![
            Some(GeocodeResult::failed("a", FailureReason::TransientExhausted, "503", 3)),
            Some(GeocodeResult::matched(
                "b",
                crate::models::GeocodeMatch {
                    coordinate: Coordinate::new(40.0, -105.0),
                    matched_address: "B".to_string(),
                    confidence: 1.0,
                    candidates: 1,
                },
                1,
            )),
        ];
        assert!(check_probe(&probe).is_ok());
    }
}

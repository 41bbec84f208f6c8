//! Shared test utilities
//!
//! - `ScriptedService`: in-memory `GeocodeService` with per-address outcome queues
//! - Polygon layer builders
//! - Fast geocoder configuration (millisecond backoff, no effective rate limit)

#![allow(dead_code)]

use async_trait::async_trait;
use geo::{LineString, MultiPolygon, Polygon};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wnv_common::config::GeocoderConfig;
use wnv_etl::models::{Crs, PolygonSet, RiskPolygon};
use wnv_etl::services::{
    AddressRow, AttemptOutcome, Candidate, GeocodeService, GeocoderClient, PipelineOptions,
};

pub const BOULDER_ADDRESS: &str = "1100 Arapahoe Ave, Boulder, CO";
pub const BOULDER_LAT: f64 = 40.0176;
pub const BOULDER_LON: f64 = -105.2797;

/// One scripted reply
#[derive(Debug, Clone)]
struct Step {
    outcome: AttemptOutcome,
    delay: Duration,
}

/// Mock geocoding service
///
/// Each address has a queue of replies; the last reply repeats once the
/// queue is drained. Unknown addresses get `NoMatch`.
#[derive(Default)]
pub struct ScriptedService {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<String>>,
    default_delay: Duration,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to addresses without a scripted delay
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Append a reply for `address`
    pub fn on(self, address: &str, outcome: AttemptOutcome) -> Self {
        let delay = self.default_delay;
        self.on_delayed(address, outcome, delay)
    }

    pub fn on_delayed(self, address: &str, outcome: AttemptOutcome, delay: Duration) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .push_back(Step { outcome, delay });
        self
    }

    pub fn calls_for(&self, address: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.as_str() == address)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next_step(&self, address: &str) -> Step {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(address) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if queue.len() == 1 => queue.front().cloned().unwrap(),
            _ => Step {
                outcome: AttemptOutcome::NoMatch,
                delay: self.default_delay,
            },
        }
    }
}

#[async_trait]
impl GeocodeService for ScriptedService {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn lookup(&self, address: &str) -> AttemptOutcome {
        self.calls.lock().unwrap().push(address.to_string());
        let step = self.next_step(address);
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.outcome
    }
}

/// Single-candidate match
pub fn matched(latitude: f64, longitude: f64, matched_address: &str) -> AttemptOutcome {
    AttemptOutcome::Matched(vec![Candidate::new(latitude, longitude, matched_address)])
}

pub fn transient() -> AttemptOutcome {
    AttemptOutcome::Transient("HTTP 503 Service Unavailable".to_string())
}

/// Geocoder settings that keep tests fast
pub fn fast_geocoder_config() -> GeocoderConfig {
    GeocoderConfig {
        timeout_ms: 2_000,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
        requests_per_second: 10_000,
        concurrency: 4,
        ..Default::default()
    }
}

pub fn client(service: Arc<ScriptedService>) -> Arc<GeocoderClient> {
    Arc::new(GeocoderClient::new(service, &fast_geocoder_config()))
}

/// Default options without the sequential probe
pub fn pool_only_options() -> PipelineOptions {
    PipelineOptions {
        probe_size: 0,
        ..PipelineOptions::default()
    }
}

pub fn rows(entries: &[(&str, &str)]) -> Vec<AddressRow> {
    entries
        .iter()
        .map(|(id, address)| AddressRow::new(*id, *address))
        .collect()
}

/// Axis-aligned rectangle as a one-part polygon
pub fn rectangle(id: &str, category: &str, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> RiskPolygon {
    let ring = LineString::from(vec![
        (min_x, min_y),
        (max_x, min_y),
        (max_x, max_y),
        (min_x, max_y),
        (min_x, min_y),
    ]);
    RiskPolygon::new(id, category, MultiPolygon(vec![Polygon::new(ring, vec![])]))
}

/// WGS84 layer: "high" around central Boulder, "low" to the east
pub fn boulder_layer() -> Arc<PolygonSet> {
    Arc::new(PolygonSet::new(
        Crs::Wgs84,
        vec![
            rectangle("central", "high", -105.30, 40.00, -105.25, 40.03),
            rectangle("east", "low", -105.25, 40.00, -105.20, 40.03),
        ],
    ))
}

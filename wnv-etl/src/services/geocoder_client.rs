//! Geocoder client
//!
//! Resolves one postal address to a coordinate. The upstream wire format is
//! hidden behind [`GeocodeService`]; this client adds normalization, the
//! per-call timeout, the shared courtesy rate limit, transient-error retry,
//! and candidate selection.
//!
//! # Failure classification
//! - empty address → `invalid_input` (no request issued)
//! - no candidates, or request rejected by the service → `not_found`
//! - several distinct candidates, none clearly best → `ambiguous`
//! - network/5xx/timeout on every permitted attempt → `transient_exhausted`
//!
//! `not_found` and `ambiguous` are never retried.

use crate::models::{normalize_address, Coordinate, FailureReason, GeocodeMatch, GeocodeResult};
use crate::utils::{retry_with_backoff, Attempt, RetryOutcome, RetryPolicy};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use wnv_common::config::GeocoderConfig;

/// Candidates closer than this (degrees) are the same location
const DUPLICATE_TOLERANCE_DEG: f64 = 1e-7;

/// One candidate location returned by the service
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub coordinate: Coordinate,
    pub matched_address: String,
}

impl Candidate {
    pub fn new(latitude: f64, longitude: f64, matched_address: impl Into<String>) -> Self {
        Self {
            coordinate: Coordinate::new(latitude, longitude),
            matched_address: matched_address.into(),
        }
    }
}

/// Outcome of a single request to the upstream service
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// At least one candidate, in service order
    Matched(Vec<Candidate>),
    /// Service answered, nothing matched
    NoMatch,
    /// Service refused the request (client error); not retried
    Rejected(String),
    /// Network failure, server error, throttling, undecodable body
    Transient(String),
}

/// Upstream geocoding service, one request per call
///
/// Implementations map their wire schema onto [`AttemptOutcome`] and must
/// not retry internally.
#[async_trait]
pub trait GeocodeService: Send + Sync {
    /// Service name for logging
    fn name(&self) -> &'static str;

    /// Issue one lookup for an already normalized address
    async fn lookup(&self, address: &str) -> AttemptOutcome;
}

/// Geocoder client with retry and rate limiting
pub struct GeocoderClient {
    service: Arc<dyn GeocodeService>,
    policy: RetryPolicy,
    timeout: Duration,
    ambiguity_margin: f64,
    /// Shared by every worker holding this client
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl GeocoderClient {
    pub fn new(service: Arc<dyn GeocodeService>, config: &GeocoderConfig) -> Self {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Self {
            service,
            policy: RetryPolicy::from_config(config),
            timeout: Duration::from_millis(config.timeout_ms),
            ambiguity_margin: config.ambiguity_margin,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn service_name(&self) -> &'static str {
        self.service.name()
    }

    /// Resolve an address to a coordinate
    ///
    /// Never returns an error: every outcome is a `GeocodeResult`.
    pub async fn geocode(&self, raw_address: &str) -> GeocodeResult {
        let address = normalize_address(raw_address);

        if address.is_empty() {
            tracing::debug!("Empty address, skipping geocode request");
            return GeocodeResult::failed(
                address,
                FailureReason::InvalidInput,
                "address is empty after normalization",
                0,
            );
        }

        let query = address.as_str();
        let outcome = retry_with_backoff("geocode", &self.policy, move |attempt| async move {
            match self.attempt_once(query, attempt).await {
                AttemptOutcome::Transient(detail) => Attempt::Retry(detail),
                other => Attempt::Done(other),
            }
        })
        .await;

        match outcome {
            RetryOutcome::Completed { value, attempts } => match value {
                AttemptOutcome::Matched(candidates) => {
                    self.select_candidate(&address, candidates, attempts)
                }
                AttemptOutcome::NoMatch => {
                    tracing::info!(address = %address, "No match found");
                    GeocodeResult::failed(
                        address,
                        FailureReason::NotFound,
                        "service returned no matches",
                        attempts,
                    )
                }
                AttemptOutcome::Rejected(detail) => {
                    tracing::warn!(address = %address, detail = %detail, "Geocode request rejected");
                    GeocodeResult::rejected(address, detail, attempts)
                }
                // Transient outcomes are converted to Attempt::Retry above
                AttemptOutcome::Transient(detail) => GeocodeResult::failed(
                    address,
                    FailureReason::TransientExhausted,
                    detail,
                    attempts,
                ),
            },
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => {
                tracing::warn!(
                    address = %address,
                    attempts,
                    error = %last_error,
                    "Geocoding gave up after transient failures"
                );
                GeocodeResult::failed(
                    address,
                    FailureReason::TransientExhausted,
                    format!("{} attempts failed, last error: {}", attempts, last_error),
                    attempts,
                )
            }
        }
    }

    /// One rate-limited, time-bounded request
    async fn attempt_once(&self, address: &str, attempt: u32) -> AttemptOutcome {
        self.rate_limiter.until_ready().await;

        tracing::debug!(
            service = self.service.name(),
            address = %address,
            attempt,
            "Issuing geocode request"
        );

        match tokio::time::timeout(self.timeout, self.service.lookup(address)).await {
            Ok(outcome) => outcome,
            Err(_) => AttemptOutcome::Transient(format!(
                "request timed out after {} ms",
                self.timeout.as_millis()
            )),
        }
    }

    /// Collapse duplicate locations, then pick a clear winner or report ambiguity
    fn select_candidate(
        &self,
        address: &str,
        candidates: Vec<Candidate>,
        attempts: u32,
    ) -> GeocodeResult {
        let mut distinct: Vec<Candidate> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let duplicate = distinct.iter().any(|d| {
                d.coordinate
                    .approx_eq(&candidate.coordinate, DUPLICATE_TOLERANCE_DEG)
            });
            if !duplicate {
                distinct.push(candidate);
            }
        }

        let mut scored: Vec<(f64, Candidate)> = distinct
            .into_iter()
            .map(|c| (match_confidence(address, &c.matched_address), c))
            .collect();
        let candidate_count = scored.len();

        if candidate_count == 0 {
            return GeocodeResult::failed(
                address,
                FailureReason::NotFound,
                "service returned an empty match list",
                attempts,
            );
        }

        // Stable sort keeps service order among equal scores
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        if candidate_count > 1 {
            let lead = scored[0].0 - scored[1].0;
            if lead < self.ambiguity_margin {
                tracing::info!(
                    address = %address,
                    candidates = candidate_count,
                    lead,
                    "Ambiguous geocode result"
                );
                let listed = scored
                    .iter()
                    .map(|(_, c)| c.matched_address.as_str())
                    .collect::<Vec<_>>()
                    .join(" | ");
                return GeocodeResult::failed(
                    address,
                    FailureReason::Ambiguous,
                    format!("{} candidates: {}", candidate_count, listed),
                    attempts,
                );
            }
        }

        let (confidence, best) = scored.swap_remove(0);
        tracing::info!(
            address = %address,
            latitude = best.coordinate.latitude,
            longitude = best.coordinate.longitude,
            confidence,
            "Geocoded"
        );

        GeocodeResult::matched(
            address,
            GeocodeMatch {
                coordinate: best.coordinate,
                matched_address: best.matched_address,
                confidence,
                candidates: candidate_count,
            },
            attempts,
        )
    }
}

/// Jaro–Winkler similarity of query and matched address, ignoring case and punctuation
pub fn match_confidence(query: &str, matched_address: &str) -> f64 {
    strsim::jaro_winkler(&comparable(query), &comparable(matched_address))
}

fn comparable(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

//! Census geocoder HTTP adapter tests
//!
//! A local axum server stands in for the Census one-line address endpoint.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wnv_common::config::GeocoderConfig;
use wnv_etl::models::{FailureReason, GeocodeOutcome};
use wnv_etl::services::{AttemptOutcome, CensusGeocoder, GeocodeService, GeocoderClient};

const PATH: &str = "/geocoder/locations/onelineaddress";

#[derive(Clone, Default)]
struct MockState {
    hits: Arc<AtomicUsize>,
    busy_hits: Arc<AtomicUsize>,
}

async fn onelineaddress(
    State(state): State<MockState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let address = params.get("address").cloned().unwrap_or_default();
    if params.get("format").map(String::as_str) != Some("json") {
        return (StatusCode::BAD_REQUEST, "format required").into_response();
    }

    match address.as_str() {
        "1100 Arapahoe Ave, Boulder, CO" => Json(json!({
            "result": {
                "input": {"address": {"address": address}},
                "addressMatches": [{
                    "matchedAddress": "1100 ARAPAHOE AVE, BOULDER, CO, 80302",
                    "coordinates": {"x": -105.2797, "y": 40.0176},
                    "tigerLine": {"tigerLineId": "123", "side": "L"}
                }]
            }
        }))
        .into_response(),
        "100 Main St" => Json(json!({
            "result": {"addressMatches": [
                {"matchedAddress": "100 MAIN ST, LONGMONT, CO, 80501",
                 "coordinates": {"x": -105.10, "y": 40.16}},
                {"matchedAddress": "100 MAIN ST, LYONS, CO, 80540",
                 "coordinates": {"x": -105.27, "y": 40.22}}
            ]}
        }))
        .into_response(),
        "Busy Blvd" => {
            // Two 503s, then an answer
            let n = state.busy_hits.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response()
            } else {
                Json(json!({"result": {"addressMatches": [
                    {"matchedAddress": "BUSY BLVD, BOULDER, CO",
                     "coordinates": {"x": -105.25, "y": 40.01}}
                ]}}))
                .into_response()
            }
        }
        "Down Dr" => (StatusCode::BAD_GATEWAY, "upstream down").into_response(),
        "Slow Ct" => {
            tokio::time::sleep(Duration::from_millis(1_000)).await;
            Json(json!({"result": {"addressMatches": []}})).into_response()
        }
        "Throttled Ter" => (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response(),
        "Garbage Gdns" => (StatusCode::OK, "<html>maintenance</html>").into_response(),
        "Bad Request Rd" => (
            StatusCode::BAD_REQUEST,
            Json(json!({"errors": ["Address cannot be parsed"], "status": "400"})),
        )
            .into_response(),
        _ => Json(json!({"result": {"addressMatches": []}})).into_response(),
    }
}

/// Start the mock server on an ephemeral port
async fn start_mock() -> (SocketAddr, MockState) {
    let state = MockState::default();
    let app = Router::new()
        .route(PATH, get(onelineaddress))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

fn config_for(addr: SocketAddr) -> GeocoderConfig {
    GeocoderConfig {
        prefix_url: format!("http://{}{}?address=", addr, PATH),
        suffix_url: "&benchmark=Public_AR_Current&format=json".to_string(),
        timeout_ms: 300,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
        requests_per_second: 1_000,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_single_match_decoded() {
    // Given: Mock endpoint with a known address
    let (addr, state) = start_mock().await;
    let geocoder = CensusGeocoder::new(&config_for(addr)).unwrap();

    // When
    let outcome = geocoder.lookup("1100 Arapahoe Ave, Boulder, CO").await;

    // Then: x/y mapped onto longitude/latitude
    match outcome {
        AttemptOutcome::Matched(candidates) => {
            assert_eq!(candidates.len(), 1);
            assert_eq!(candidates[0].coordinate.latitude, 40.0176);
            assert_eq!(candidates[0].coordinate.longitude, -105.2797);
            assert_eq!(candidates[0].matched_address, "1100 ARAPAHOE AVE, BOULDER, CO, 80302");
        }
        other => panic!("expected match, got {:?}", other),
    }
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_http_status_classification() {
    let (addr, _state) = start_mock().await;
    let geocoder = CensusGeocoder::new(&config_for(addr)).unwrap();

    assert_eq!(geocoder.lookup("Unknown Way").await, AttemptOutcome::NoMatch);
    assert!(matches!(geocoder.lookup("Down Dr").await, AttemptOutcome::Transient(_)));
    assert!(matches!(geocoder.lookup("Throttled Ter").await, AttemptOutcome::Transient(_)));
    assert!(matches!(geocoder.lookup("Garbage Gdns").await, AttemptOutcome::Transient(_)));
    assert!(matches!(geocoder.lookup("Bad Request Rd").await, AttemptOutcome::Rejected(_)));
}

#[tokio::test]
async fn test_client_retries_through_server_errors() {
    // Given: Endpoint returns 503 twice before answering
    let (addr, state) = start_mock().await;
    let config = config_for(addr);
    let service = Arc::new(CensusGeocoder::new(&config).unwrap());
    let client = GeocoderClient::new(service, &config);

    // When
    let result = client.geocode("Busy Blvd").await;

    // Then
    assert!(result.is_matched(), "got {:?}", result.outcome);
    assert_eq!(result.attempts, 3);
    assert_eq!(state.busy_hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_persistent_server_errors_exhaust_retries() {
    let (addr, state) = start_mock().await;
    let config = config_for(addr);
    let client = GeocoderClient::new(Arc::new(CensusGeocoder::new(&config).unwrap()), &config);

    let result = client.geocode("Down Dr").await;

    assert_eq!(result.failure_reason(), Some(FailureReason::TransientExhausted));
    assert_eq!(result.attempts, 3);
    assert_eq!(state.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_slow_response_times_out_as_transient() {
    // Given: Handler sleeps past the 300 ms timeout
    let (addr, _state) = start_mock().await;
    let config = GeocoderConfig {
        max_attempts: 2,
        ..config_for(addr)
    };
    let client = GeocoderClient::new(Arc::new(CensusGeocoder::new(&config).unwrap()), &config);

    // When
    let result = client.geocode("Slow Ct").await;

    // Then
    assert_eq!(result.failure_reason(), Some(FailureReason::TransientExhausted));
    assert_eq!(result.attempts, 2);
}

#[tokio::test]
async fn test_rejected_request_is_not_found_without_retry() {
    let (addr, state) = start_mock().await;
    let config = config_for(addr);
    let client = GeocoderClient::new(Arc::new(CensusGeocoder::new(&config).unwrap()), &config);

    let result = client.geocode("Bad Request Rd").await;

    assert_eq!(result.failure_reason(), Some(FailureReason::NotFound));
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_two_towns_same_street_is_ambiguous() {
    // Given: The service returns the same street in two towns
    let (addr, _state) = start_mock().await;
    let config = config_for(addr);
    let client = GeocoderClient::new(Arc::new(CensusGeocoder::new(&config).unwrap()), &config);

    // When
    let result = client.geocode("100 Main St").await;

    // Then
    match result.outcome {
        GeocodeOutcome::Failed(failure) => {
            assert_eq!(failure.reason, FailureReason::Ambiguous);
            assert!(failure.detail.contains("LONGMONT"));
            assert!(failure.detail.contains("LYONS"));
        }
        other => panic!("expected ambiguous, got {:?}", other),
    }
}

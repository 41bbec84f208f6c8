//! US Census one-line address geocoder
//!
//! Request: `{prefix_url}{form-urlencoded address}{suffix_url}`
//! Response (fields used):
//! ```json
//! {"result": {"addressMatches": [
//!     {"matchedAddress": "1100 ARAPAHOE AVE, BOULDER, CO, 80302",
//!      "coordinates": {"x": -105.2797, "y": 40.0176}}
//! ]}}
//! ```
//! `x` is longitude, `y` is latitude.

use super::geocoder_client::{AttemptOutcome, Candidate, GeocodeService};
use crate::error::{EtlError, EtlResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use wnv_common::config::GeocoderConfig;

#[derive(Debug, Deserialize)]
struct CensusResponse {
    result: Option<CensusResult>,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CensusResult {
    #[serde(rename = "addressMatches", default)]
    address_matches: Vec<CensusMatch>,
}

#[derive(Debug, Deserialize)]
struct CensusMatch {
    #[serde(rename = "matchedAddress", default)]
    matched_address: String,
    coordinates: CensusCoordinates,
}

#[derive(Debug, Deserialize)]
struct CensusCoordinates {
    x: f64,
    y: f64,
}

/// HTTP adapter for the Census geocoder
pub struct CensusGeocoder {
    client: Client,
    prefix_url: String,
    suffix_url: String,
}

impl CensusGeocoder {
    pub fn new(config: &GeocoderConfig) -> EtlResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_millis(config.timeout_ms.min(5_000)))
            .build()
            .map_err(|e| EtlError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            prefix_url: config.prefix_url.clone(),
            suffix_url: config.suffix_url.clone(),
        })
    }

    /// Full request URL for an address
    pub fn request_url(&self, address: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(address.as_bytes()).collect();
        format!("{}{}{}", self.prefix_url, encoded, self.suffix_url)
    }
}

#[async_trait]
impl GeocodeService for CensusGeocoder {
    fn name(&self) -> &'static str {
        "census"
    }

    async fn lookup(&self, address: &str) -> AttemptOutcome {
        let url = self.request_url(address);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return AttemptOutcome::Transient(format!("request timed out: {}", e))
            }
            Err(e) => return AttemptOutcome::Transient(format!("network error: {}", e)),
        };

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return AttemptOutcome::Transient(format!("HTTP {}", status));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return AttemptOutcome::Transient(format!("failed to read body: {}", e)),
        };

        if !status.is_success() {
            return AttemptOutcome::Rejected(format!("HTTP {}: {}", status, first_line(&body)));
        }

        parse_census_body(&body)
    }
}

/// Map a Census response body onto an attempt outcome
///
/// A body that does not decode is treated as transient (truncated or
/// maintenance pages are the usual cause).
pub fn parse_census_body(body: &str) -> AttemptOutcome {
    let response: CensusResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) => return AttemptOutcome::Transient(format!("undecodable response: {}", e)),
    };

    if !response.errors.is_empty() {
        return AttemptOutcome::Rejected(response.errors.join("; "));
    }

    let matches = response
        .result
        .map(|r| r.address_matches)
        .unwrap_or_default();

    if matches.is_empty() {
        return AttemptOutcome::NoMatch;
    }

    AttemptOutcome::Matched(
        matches
            .into_iter()
            .map(|m| Candidate::new(m.coordinates.y, m.coordinates.x, m.matched_address))
            .collect(),
    )
}

fn first_line(body: &str) -> &str {
    body.lines().next().unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url_encodes_like_quote_plus() {
        let geocoder = CensusGeocoder::new(&GeocoderConfig {
            prefix_url: "https://example.test/onelineaddress?address=".to_string(),
            suffix_url: "&benchmark=Public_AR_Current&format=json".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            geocoder.request_url("1100 Arapahoe Ave, Boulder, CO"),
            "https://example.test/onelineaddress?address=1100+Arapahoe+Ave%2C+Boulder%2C+CO&benchmark=Public_AR_Current&format=json"
        );
    }

    #[test]
    fn test_parse_single_match_swaps_axes() {
        let body = r#"{"result":{"input":{},"addressMatches":[
            {"matchedAddress":"1100 ARAPAHOE AVE, BOULDER, CO, 80302",
             "coordinates":{"x":-105.2797,"y":40.0176},
             "tigerLine":{"side":"L","tigerLineId":"1"}}]}}"#;

        match parse_census_body(body) {
            AttemptOutcome::Matched(candidates) => {
                assert_eq!(candidates.len(), 1);
                assert_eq!(candidates[0].coordinate.latitude, 40.0176);
                assert_eq!(candidates[0].coordinate.longitude, -105.2797);
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_empty_matches_is_no_match() {
        let body = r#"{"result":{"input":{},"addressMatches":[]}}"#;
        assert_eq!(parse_census_body(body), AttemptOutcome::NoMatch);
    }

    #[test]
    fn test_parse_errors_member_is_rejected() {
        let body = r#"{"errors":["Address cannot be empty and cannot exceed 100 characters"],"status":"400"}"#;
        assert!(matches!(parse_census_body(body), AttemptOutcome::Rejected(_)));
    }

    #[test]
    fn test_parse_garbage_is_transient() {
        assert!(matches!(
            parse_census_body("<html>Service Unavailable</html>"),
            AttemptOutcome::Transient(_)
        ));
    }
}

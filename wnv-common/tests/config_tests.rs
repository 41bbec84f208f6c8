//! Unit tests for configuration loading and resolution
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate WNV_* variables are marked with #[serial]
//! to ensure they run sequentially, not in parallel.

use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use wnv_common::config::{
    resolve_config_path, TomlConfig, CONFIG_ENV_VAR, GEOCODER_PREFIX_ENV_VAR,
    REMOTE_URL_ENV_VAR,
};
use wnv_common::Error;

const FULL_CONFIG: &str = r#"
proj_dir = "/srv/wnv/"

[logging]
level = "debug"
file = "/srv/wnv/wnv.log"

[source]
remote_url = "https://docs.google.com/spreadsheets/d/e/abc/pub?output=csv"
address_column = "Street Address"
address_suffix = ", Boulder, CO"
cache_file = "addresses.csv"

[geocoder]
timeout_ms = 5000
max_attempts = 4
initial_backoff_ms = 100
max_backoff_ms = 800
requests_per_second = 2
concurrency = 2

[polygons]
path = "/srv/wnv/final_analysis.json"
category_property = "risk_level"

[output]
high_risk_csv = "WNV_spraying_addresses.csv"
high_risk_categories = ["high", "extreme"]

[pipeline]
probe_size = 5
max_failure_ratio = 0.5
min_sample = 20
"#;

#[test]
fn test_full_config_round_trips_all_sections() {
    let config = TomlConfig::from_toml_str(FULL_CONFIG).unwrap();

    assert_eq!(config.proj_dir, PathBuf::from("/srv/wnv/"));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.file, Some(PathBuf::from("/srv/wnv/wnv.log")));
    assert_eq!(config.source.cache_file.as_deref(), Some("addresses.csv"));
    assert_eq!(config.geocoder.max_attempts, 4);
    assert_eq!(config.geocoder.concurrency, 2);
    // Unspecified geocoder fields keep their defaults
    assert!(config.geocoder.prefix_url.contains("onelineaddress"));
    assert_eq!(config.polygons.category_property, "risk_level");
    assert_eq!(config.polygons.default_crs, "EPSG:4326");
    assert_eq!(config.output.all_csv, "all_addresses.csv");
    assert_eq!(config.output.high_risk_csv, "WNV_spraying_addresses.csv");
    assert_eq!(config.output.high_risk_categories.len(), 2);
    assert_eq!(config.pipeline.max_failure_ratio, Some(0.5));
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(FULL_CONFIG.as_bytes()).unwrap();

    let config = TomlConfig::load(file.path()).unwrap();
    assert_eq!(config.pipeline.probe_size, 5);
}

#[test]
fn test_load_missing_file_is_config_error() {
    let err = TomlConfig::load(Path::new("/nonexistent/wnv-etl.toml")).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_malformed_toml_is_config_error() {
    let err = TomlConfig::from_toml_str("[geocoder\nmax_attempts = ").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
#[serial]
fn test_cli_path_beats_env() {
    env::set_var(CONFIG_ENV_VAR, "/from/env.toml");

    let resolved = resolve_config_path(Some(Path::new("/from/cli.toml"))).unwrap();
    assert_eq!(resolved, PathBuf::from("/from/cli.toml"));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_path_used_without_cli() {
    env::set_var(CONFIG_ENV_VAR, "/from/env.toml");

    let resolved = resolve_config_path(None).unwrap();
    assert_eq!(resolved, PathBuf::from("/from/env.toml"));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_overrides_replace_endpoints() {
    env::set_var(REMOTE_URL_ENV_VAR, "http://127.0.0.1:9/sheet.csv");
    env::set_var(GEOCODER_PREFIX_ENV_VAR, "http://127.0.0.1:9/geocode?address=");

    let mut config = TomlConfig::from_toml_str(FULL_CONFIG).unwrap();
    config.apply_env_overrides();

    assert_eq!(
        config.source.remote_url.as_deref(),
        Some("http://127.0.0.1:9/sheet.csv")
    );
    assert_eq!(config.geocoder.prefix_url, "http://127.0.0.1:9/geocode?address=");

    env::remove_var(REMOTE_URL_ENV_VAR);
    env::remove_var(GEOCODER_PREFIX_ENV_VAR);
}

#[test]
#[serial]
fn test_blank_env_override_ignored() {
    env::set_var(REMOTE_URL_ENV_VAR, "   ");

    let mut config = TomlConfig::from_toml_str(FULL_CONFIG).unwrap();
    config.apply_env_overrides();
    assert!(config
        .source
        .remote_url
        .as_deref()
        .unwrap()
        .starts_with("https://docs.google.com"));

    env::remove_var(REMOTE_URL_ENV_VAR);
}

//! Configuration loading and config file resolution
//!
//! Bootstrap configuration lives in a single TOML file. Every field except
//! the address source location has a built-in default, so a minimal file
//! only needs `[source]`.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments
//! 2. Environment variables (`WNV_CONFIG`, `WNV_REMOTE_URL`, `WNV_GEOCODER_PREFIX_URL`)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "WNV_CONFIG";

/// Environment variable overriding `source.remote_url`
pub const REMOTE_URL_ENV_VAR: &str = "WNV_REMOTE_URL";

/// Environment variable overriding `geocoder.prefix_url`
pub const GEOCODER_PREFIX_ENV_VAR: &str = "WNV_GEOCODER_PREFIX_URL";

/// US Census one-line address endpoint (address is appended, url-encoded)
pub const DEFAULT_GEOCODER_PREFIX_URL: &str =
    "https://geocoding.geo.census.gov/geocoder/locations/onelineaddress?address=";

/// Benchmark and format selectors appended after the address
pub const DEFAULT_GEOCODER_SUFFIX_URL: &str = "&benchmark=Public_AR_Current&format=json";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Project directory for cached inputs and all outputs
    #[serde(default = "default_proj_dir")]
    pub proj_dir: PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub geocoder: GeocoderConfig,

    #[serde(default)]
    pub polygons: PolygonConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            proj_dir: default_proj_dir(),
            logging: LoggingConfig::default(),
            source: SourceConfig::default(),
            geocoder: GeocoderConfig::default(),
            polygons: PolygonConfig::default(),
            output: OutputConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr only if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Address source configuration
///
/// Exactly one of `remote_url` / `path` is expected. When both are set the
/// local file wins.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Published spreadsheet CSV URL
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Local CSV file
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Column holding the street address
    #[serde(default = "default_address_column")]
    pub address_column: String,

    /// Column holding the row key; 1-based row number when absent
    #[serde(default)]
    pub id_column: Option<String>,

    /// Locality appended to every street address before geocoding
    #[serde(default = "default_address_suffix")]
    pub address_suffix: String,

    /// File name (inside `proj_dir`) where a fetched remote CSV is cached
    #[serde(default)]
    pub cache_file: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            path: None,
            address_column: default_address_column(),
            id_column: None,
            address_suffix: default_address_suffix(),
            cache_file: None,
        }
    }
}

/// Geocoding service and retry policy configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeocoderConfig {
    #[serde(default = "default_prefix_url")]
    pub prefix_url: String,

    #[serde(default = "default_suffix_url")]
    pub suffix_url: String,

    /// Per-request timeout, distinct from the retry budget
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Total attempts per address, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Token-bucket rate shared by all workers
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Maximum in-flight geocode requests
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Lead the best candidate needs over the runner-up to break ambiguity
    #[serde(default = "default_ambiguity_margin")]
    pub ambiguity_margin: f64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            prefix_url: default_prefix_url(),
            suffix_url: default_suffix_url(),
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            requests_per_second: default_requests_per_second(),
            concurrency: default_concurrency(),
            ambiguity_margin: default_ambiguity_margin(),
            user_agent: default_user_agent(),
        }
    }
}

/// Risk polygon layer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolygonConfig {
    /// FeatureCollection JSON file
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Feature property holding the risk category
    #[serde(default = "default_category_property")]
    pub category_property: String,

    /// Reference system used when the file declares none
    #[serde(default = "default_polygon_crs")]
    pub default_crs: String,
}

impl Default for PolygonConfig {
    fn default() -> Self {
        Self {
            path: None,
            category_property: default_category_property(),
            default_crs: default_polygon_crs(),
        }
    }
}

/// Output file names (relative to `proj_dir`) and the high-risk filter
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_all_csv")]
    pub all_csv: String,

    #[serde(default = "default_high_risk_csv")]
    pub high_risk_csv: String,

    #[serde(default = "default_summary_json")]
    pub summary_json: String,

    /// Categories that place an address in the high-risk subset
    #[serde(default = "default_high_risk_categories")]
    pub high_risk_categories: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            all_csv: default_all_csv(),
            high_risk_csv: default_high_risk_csv(),
            summary_json: default_summary_json(),
            high_risk_categories: default_high_risk_categories(),
        }
    }
}

/// Run-level abort policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Addresses geocoded sequentially before the worker pool starts
    #[serde(default = "default_probe_size")]
    pub probe_size: usize,

    /// Abort once failed/attempted exceeds this ratio (disabled when absent)
    #[serde(default)]
    pub max_failure_ratio: Option<f64>,

    /// Attempted geocodes required before `max_failure_ratio` applies
    #[serde(default = "default_min_sample")]
    pub min_sample: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            probe_size: default_probe_size(),
            max_failure_ratio: None,
            min_sample: default_min_sample(),
        }
    }
}

fn default_proj_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_address_column() -> String {
    "Street Address".to_string()
}

fn default_address_suffix() -> String {
    ", Boulder, CO".to_string()
}

fn default_prefix_url() -> String {
    DEFAULT_GEOCODER_PREFIX_URL.to_string()
}

fn default_suffix_url() -> String {
    DEFAULT_GEOCODER_SUFFIX_URL.to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    4_000
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_concurrency() -> usize {
    4
}

fn default_ambiguity_margin() -> f64 {
    0.05
}

fn default_user_agent() -> String {
    format!("wnv-etl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_category_property() -> String {
    "risk".to_string()
}

fn default_polygon_crs() -> String {
    "EPSG:4326".to_string()
}

fn default_all_csv() -> String {
    "all_addresses.csv".to_string()
}

fn default_high_risk_csv() -> String {
    "spraying_addresses.csv".to_string()
}

fn default_summary_json() -> String {
    "run_summary.json".to_string()
}

fn default_high_risk_categories() -> Vec<String> {
    vec!["high".to_string()]
}

fn default_probe_size() -> usize {
    3
}

fn default_min_sample() -> usize {
    10
}

impl TomlConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Apply `WNV_REMOTE_URL` / `WNV_GEOCODER_PREFIX_URL` on top of file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(REMOTE_URL_ENV_VAR) {
            if !url.trim().is_empty() {
                tracing::info!("source.remote_url overridden from {}", REMOTE_URL_ENV_VAR);
                self.source.remote_url = Some(url);
            }
        }

        if let Ok(url) = std::env::var(GEOCODER_PREFIX_ENV_VAR) {
            if !url.trim().is_empty() {
                tracing::info!("geocoder.prefix_url overridden from {}", GEOCODER_PREFIX_ENV_VAR);
                self.geocoder.prefix_url = url;
            }
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let g = &self.geocoder;
        if g.max_attempts == 0 {
            return Err(Error::Config("geocoder.max_attempts must be at least 1".to_string()));
        }
        if g.concurrency == 0 {
            return Err(Error::Config("geocoder.concurrency must be at least 1".to_string()));
        }
        if g.requests_per_second == 0 {
            return Err(Error::Config(
                "geocoder.requests_per_second must be at least 1".to_string(),
            ));
        }
        if g.timeout_ms == 0 {
            return Err(Error::Config("geocoder.timeout_ms must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&g.ambiguity_margin) {
            return Err(Error::Config(format!(
                "geocoder.ambiguity_margin must be within [0, 1], got {}",
                g.ambiguity_margin
            )));
        }
        if let Some(ratio) = self.pipeline.max_failure_ratio {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(Error::Config(format!(
                    "pipeline.max_failure_ratio must be within (0, 1], got {}",
                    ratio
                )));
            }
        }
        if self.source.address_column.trim().is_empty() {
            return Err(Error::Config("source.address_column must not be empty".to_string()));
        }
        Ok(())
    }

    /// Resolve an output file name against `proj_dir`
    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.proj_dir.join(file_name)
    }
}

/// Config file resolution:
/// 1. Command-line argument (highest priority)
/// 2. `WNV_CONFIG` environment variable
/// 3. Platform config directory (`~/.config/wnv/wnv-etl.toml`), if it exists
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    match default_config_path() {
        Some(path) if path.exists() => Ok(path),
        Some(path) => Err(Error::Config(format!(
            "No config file given and default not found: {}",
            path.display()
        ))),
        None => Err(Error::Config(
            "Could not determine config directory".to_string(),
        )),
    }
}

/// Platform default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("wnv").join("wnv-etl.toml"))
}

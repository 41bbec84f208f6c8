//! Configuration resolution for wnv-etl
//!
//! **Priority:** CLI → ENV → TOML → built-in default
//!
//! The config file location resolves the same way (see
//! [`wnv_common::config::resolve_config_path`]).

use std::path::{Path, PathBuf};
use tracing::{debug, info};
use wnv_common::config::{resolve_config_path, TomlConfig};
use wnv_common::Result;

/// Values given on the command line for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    /// Address CSV: an `http(s)://` URL or a local path
    pub source: Option<String>,
    /// Risk polygon layer file
    pub polygons: Option<PathBuf>,
}

/// Resolve, read, and apply environment overrides
pub fn load_config(cli_path: Option<&Path>) -> Result<TomlConfig> {
    let path = resolve_config_path(cli_path)?;
    debug!(path = %path.display(), "Resolved config file");

    let mut config = TomlConfig::load(&path)?;
    config.apply_env_overrides();
    Ok(config)
}

/// Apply command-line values; they beat both environment and file
pub fn apply_cli_overrides(config: &mut TomlConfig, overrides: &CliOverrides) {
    if let Some(source) = overrides.source.as_deref().map(str::trim) {
        if is_remote(source) {
            info!(url = source, "Address source taken from command line");
            config.source.remote_url = Some(source.to_string());
            config.source.path = None;
        } else if !source.is_empty() {
            info!(path = source, "Address source taken from command line");
            config.source.path = Some(PathBuf::from(source));
        }
    }

    if let Some(polygons) = &overrides.polygons {
        info!(path = %polygons.display(), "Polygon layer taken from command line");
        config.polygons.path = Some(polygons.clone());
    }
}

fn is_remote(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

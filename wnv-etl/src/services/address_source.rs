//! Address sources
//!
//! Rows come from a CSV with a header line, either a local file or a
//! published spreadsheet fetched over HTTP. The street column is joined with
//! the configured locality suffix (", Boulder, CO" by default) to form the
//! address handed to the geocoder.

use crate::error::{EtlError, EtlResult};
use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wnv_common::config::{SourceConfig, TomlConfig};

const REMOTE_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One input row, in source order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRow {
    pub id: String,
    pub address: String,
}

impl AddressRow {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// Supplier of the ordered address list for a run
#[async_trait]
pub trait AddressSource: Send + Sync {
    /// Human-readable location for logs
    fn describe(&self) -> String;

    async fn fetch(&self) -> EtlResult<Vec<AddressRow>>;
}

/// How rows are read out of the CSV
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvLayout {
    pub address_column: String,
    pub id_column: Option<String>,
    pub address_suffix: String,
}

impl CsvLayout {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            address_column: config.address_column.clone(),
            id_column: config.id_column.clone(),
            address_suffix: config.address_suffix.clone(),
        }
    }

    /// Street plus locality; blank streets stay blank
    fn full_address(&self, street: &str) -> String {
        let street = street.trim();
        let suffix = self.address_suffix.trim();
        if street.is_empty()
            || suffix.is_empty()
            || street
                .to_ascii_lowercase()
                .ends_with(&suffix.trim_start_matches(',').trim().to_ascii_lowercase())
        {
            street.to_string()
        } else {
            format!("{}{}", street, self.address_suffix)
        }
    }
}

/// Parse CSV text into rows
///
/// The id falls back to the 1-based data row number when the id column is
/// not configured or the cell is blank.
pub fn parse_address_csv(content: &str, layout: &CsvLayout) -> EtlResult<Vec<AddressRow>> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| EtlError::Source(format!("Failed to read CSV header: {}", e)))?
        .clone();

    let address_index = headers
        .iter()
        .position(|h| h == layout.address_column)
        .ok_or_else(|| {
            EtlError::Source(format!(
                "Column '{}' not found in CSV header ({})",
                layout.address_column,
                headers.iter().collect::<Vec<_>>().join(", ")
            ))
        })?;

    let id_index = match &layout.id_column {
        Some(column) => Some(headers.iter().position(|h| h == column).ok_or_else(|| {
            EtlError::Source(format!("Id column '{}' not found in CSV header", column))
        })?),
        None => None,
    };

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| EtlError::Source(format!("Failed to read CSV record {}: {}", index + 1, e)))?;

        let street = record.get(address_index).unwrap_or("");
        let id = id_index
            .and_then(|i| record.get(i))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| (index + 1).to_string());

        rows.push(AddressRow::new(id, layout.full_address(street)));
    }

    Ok(rows)
}

/// Local CSV file
pub struct CsvFileSource {
    path: PathBuf,
    layout: CsvLayout,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>, layout: CsvLayout) -> Self {
        Self {
            path: path.into(),
            layout,
        }
    }
}

#[async_trait]
impl AddressSource for CsvFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> EtlResult<Vec<AddressRow>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            EtlError::Source(format!("Read {} failed: {}", self.path.display(), e))
        })?;

        let rows = parse_address_csv(&content, &self.layout)?;
        tracing::info!(path = %self.path.display(), rows = rows.len(), "Addresses read");
        Ok(rows)
    }
}

/// Published spreadsheet CSV over HTTP, optionally cached on disk
pub struct RemoteCsvSource {
    url: String,
    layout: CsvLayout,
    client: Client,
    cache_path: Option<PathBuf>,
}

impl RemoteCsvSource {
    pub fn new(
        url: impl Into<String>,
        layout: CsvLayout,
        user_agent: &str,
        cache_path: Option<PathBuf>,
    ) -> EtlResult<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(REMOTE_FETCH_TIMEOUT)
            .build()
            .map_err(|e| EtlError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            layout,
            client,
            cache_path,
        })
    }

    async fn download(&self) -> Result<String, String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }

        response
            .text()
            .await
            .map_err(|e| format!("failed to read body: {}", e))
    }

    async fn write_cache(path: &Path, content: &str) -> EtlResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl AddressSource for RemoteCsvSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self) -> EtlResult<Vec<AddressRow>> {
        tracing::debug!(url = %self.url, "Fetching remote address sheet");

        let content = match self.download().await {
            Ok(content) => {
                if let Some(cache) = &self.cache_path {
                    match Self::write_cache(cache, &content).await {
                        Ok(()) => tracing::debug!(path = %cache.display(), "Address sheet cached"),
                        Err(e) => tracing::warn!(
                            path = %cache.display(),
                            error = %e,
                            "Failed to cache address sheet"
                        ),
                    }
                }
                content
            }
            Err(e) => match &self.cache_path {
                Some(cache) if cache.exists() => {
                    tracing::warn!(
                        url = %self.url,
                        error = %e,
                        path = %cache.display(),
                        "Remote fetch failed, using cached address sheet"
                    );
                    tokio::fs::read_to_string(cache).await.map_err(|read_err| {
                        EtlError::Source(format!(
                            "Fetch {} failed ({}) and cache {} unreadable: {}",
                            self.url,
                            e,
                            cache.display(),
                            read_err
                        ))
                    })?
                }
                _ => return Err(EtlError::Source(format!("Fetch {} failed: {}", self.url, e))),
            },
        };

        let rows = parse_address_csv(&content, &self.layout)?;
        tracing::info!(url = %self.url, rows = rows.len(), "Addresses fetched");
        Ok(rows)
    }
}

/// Build the configured source; a local path takes precedence over a URL
pub fn source_from_config(config: &TomlConfig) -> EtlResult<Box<dyn AddressSource>> {
    let layout = CsvLayout::from_config(&config.source);

    if let Some(path) = &config.source.path {
        return Ok(Box::new(CsvFileSource::new(path.clone(), layout)));
    }

    if let Some(url) = &config.source.remote_url {
        let cache_path = config
            .source
            .cache_file
            .as_deref()
            .map(|name| config.output_path(name));
        return Ok(Box::new(RemoteCsvSource::new(
            url.clone(),
            layout,
            &config.geocoder.user_agent,
            cache_path,
        )?));
    }

    Err(EtlError::Config(
        "No address source configured: set source.path or source.remote_url".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> CsvLayout {
        CsvLayout::from_config(&SourceConfig::default())
    }

    #[test]
    fn test_suffix_appended_once() {
        let layout = layout();
        assert_eq!(layout.full_address("1100 Arapahoe Ave"), "1100 Arapahoe Ave, Boulder, CO");
        assert_eq!(
            layout.full_address("1100 Arapahoe Ave, Boulder, CO"),
            "1100 Arapahoe Ave, Boulder, CO"
        );
        assert_eq!(layout.full_address("   "), "");
    }

    #[test]
    fn test_row_numbers_used_without_id_column() {
        let csv = "Timestamp,Street Address\n2024-01-01,1100 Arapahoe Ave\n2024-01-02,\n";
        let rows = parse_address_csv(csv, &layout()).unwrap();

        assert_eq!(
            rows,
            vec![
                AddressRow::new("1", "1100 Arapahoe Ave, Boulder, CO"),
                AddressRow::new("2", ""),
            ]
        );
    }

    #[test]
    fn test_bom_and_quoted_fields() {
        let csv = "\u{feff}Street Address,Name\n\"2800 Pearl St, Unit 4\",x\n";
        let rows = parse_address_csv(csv, &layout()).unwrap();
        assert_eq!(rows[0].address, "2800 Pearl St, Unit 4, Boulder, CO");
    }

    #[test]
    fn test_missing_column_is_source_error() {
        let err = parse_address_csv("Address\n1 Main St\n", &layout()).unwrap_err();
        assert!(matches!(err, EtlError::Source(_)));
    }
}

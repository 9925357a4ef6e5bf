//! Configuration parsing and validation.
//!
//! Handles loading configuration from YAML files. Every bucket, endpoint and
//! credential the pipeline touches comes from here; components receive the
//! pieces they need at construction.

mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{
    ConfigError, EmptyDatabaseSnafu, EmptyEndpointSnafu, EmptyEnrichedUrlSnafu,
    EmptyOutputLocationSnafu, EmptyRawUrlSnafu, EmptyTableNameSnafu, EnvInterpolationSnafu,
    InvalidPollPolicySnafu, InvalidUtcOffsetSnafu, ReadFileSnafu, YamlParseSnafu,
};
use crate::query::PollPolicy;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub partition: PartitionConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    pub query_engine: QueryEngineConfig,
    #[serde(default)]
    pub table: TableConfig,
    /// Analytical queries run by the `query` command, in order.
    #[serde(default)]
    pub queries: Vec<String>,
    /// Metrics configuration (optional, disabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// The two object stores the pipeline reads from and writes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Landing store for raw updates files.
    pub raw: StoreConfig,
    /// Store for the enriched Parquet files.
    pub enriched: StoreConfig,
}

/// A single object store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store URL, e.g. "s3://my-raw-bucket" or "/var/lib/chatlake/raw".
    pub url: String,

    /// Storage options (credentials, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// Partition layout shared by raw and enriched stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Top-level key segment (default: "telegram").
    #[serde(default = "default_partition_root")]
    pub root: String,

    /// Fixed UTC offset, in hours, of the business day (default: -3).
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,

    /// How many business days behind "today" the ETL processes (default: 1).
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            root: default_partition_root(),
            utc_offset_hours: default_utc_offset_hours(),
            lookback_days: default_lookback_days(),
        }
    }
}

fn default_partition_root() -> String {
    "telegram".to_string()
}

fn default_utc_offset_hours() -> i32 {
    -3
}

fn default_lookback_days() -> u32 {
    1
}

/// Parquet writer settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Parquet compression codec.
    #[serde(default)]
    pub compression: ParquetCompression,

    /// Directory for local staging files (default: the system temp dir).
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    Uncompressed,
    #[default]
    Snappy,
    Gzip,
    Zstd,
    Lz4,
}

/// Remote query engine settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct QueryEngineConfig {
    /// Engine endpoint, e.g. "https://athena.us-east-1.amazonaws.com".
    pub endpoint: String,

    /// Bearer token sent with each request (optional).
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Catalog database queries run against.
    #[serde(default = "default_database")]
    pub database: String,

    /// Where the engine writes result sets.
    pub output_location: String,

    /// Engine workgroup (optional).
    #[serde(default)]
    pub workgroup: Option<String>,

    /// HTTP request timeout in seconds (default: 30).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub poll: PollConfig,
}

impl std::fmt::Debug for QueryEngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngineConfig")
            .field("endpoint", &self.endpoint)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("output_location", &self.output_location)
            .field("workgroup", &self.workgroup)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("poll", &self.poll)
            .finish()
    }
}

fn default_database() -> String {
    "default".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Backoff settings for waiting on a query execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// First wait between status checks, in milliseconds (default: 1000).
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Upper bound on the wait between status checks (default: 10000).
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Growth factor applied after each non-terminal status (default: 2.0).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Give up waiting after this many seconds (default: 900).
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            multiplier: default_multiplier(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

fn default_initial_interval_ms() -> u64 {
    1000
}

fn default_max_interval_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_deadline_secs() -> u64 {
    900
}

impl PollConfig {
    /// Build the runtime poll policy.
    pub fn policy(&self) -> PollPolicy {
        PollPolicy {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            multiplier: self.multiplier,
            deadline: Duration::from_secs(self.deadline_secs),
        }
    }
}

/// Analytical table definition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Table name in the engine catalog (default: "telegram").
    #[serde(default = "default_table_name")]
    pub name: String,

    /// Table storage location. Defaults to `<enriched url>/<partition root>/`.
    #[serde(default)]
    pub location: Option<String>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            name: default_table_name(),
            location: None,
        }
    }
}

fn default_table_name() -> String {
    "telegram".to_string()
}

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the metrics endpoint is served (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml_with_options(&content, interpolate_env)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml_with_options(
        content: &str,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = if interpolate_env {
            let result = vars::interpolate(content);
            if !result.is_ok() {
                let error_msg = result.errors.join("\n");
                return EnvInterpolationSnafu { message: error_msg }.fail();
            }
            result.text
        } else {
            content.to_string()
        };

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.storage.raw.url.is_empty(), EmptyRawUrlSnafu);
        ensure!(!self.storage.enriched.url.is_empty(), EmptyEnrichedUrlSnafu);
        ensure!(!self.query_engine.endpoint.is_empty(), EmptyEndpointSnafu);
        ensure!(!self.query_engine.database.is_empty(), EmptyDatabaseSnafu);
        ensure!(
            !self.query_engine.output_location.is_empty(),
            EmptyOutputLocationSnafu
        );
        ensure!(!self.table.name.is_empty(), EmptyTableNameSnafu);

        let hours = self.partition.utc_offset_hours;
        ensure!((-23..=23).contains(&hours), InvalidUtcOffsetSnafu { hours });

        let poll = &self.query_engine.poll;
        ensure!(
            poll.initial_interval_ms > 0,
            InvalidPollPolicySnafu {
                message: "initial_interval_ms must be positive"
            }
        );
        ensure!(
            poll.max_interval_ms >= poll.initial_interval_ms,
            InvalidPollPolicySnafu {
                message: "max_interval_ms must be >= initial_interval_ms"
            }
        );
        ensure!(
            poll.multiplier >= 1.0,
            InvalidPollPolicySnafu {
                message: "multiplier must be >= 1.0"
            }
        );
        ensure!(
            poll.deadline_secs > 0,
            InvalidPollPolicySnafu {
                message: "deadline_secs must be positive"
            }
        );
        Ok(())
    }

    /// Storage location registered for the analytical table.
    pub fn table_location(&self) -> String {
        match &self.table.location {
            Some(location) => location.clone(),
            None => format!(
                "{}/{}/",
                self.storage.enriched.url.trim_end_matches('/'),
                self.partition.root
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
storage:
  raw:
    url: "s3://raw-bucket"
  enriched:
    url: "s3://enriched-bucket"
query_engine:
  endpoint: "https://athena.us-east-1.amazonaws.com"
  output_location: "s3://enriched-bucket/athena-query-results/"
"#;

    #[test]
    fn test_config_defaults() {
        let config = Config::from_yaml_with_options(MINIMAL, false).unwrap();

        assert_eq!(config.partition.root, "telegram");
        assert_eq!(config.partition.utc_offset_hours, -3);
        assert_eq!(config.partition.lookback_days, 1);
        assert_eq!(config.query_engine.database, "default");
        assert_eq!(config.table.name, "telegram");
        assert_eq!(config.writer.compression, ParquetCompression::Snappy);
        assert!(config.queries.is_empty());
        assert!(!config.metrics.enabled);

        let policy = config.query_engine.poll.policy();
        assert_eq!(policy.initial_interval, Duration::from_secs(1));
        assert_eq!(policy.max_interval, Duration::from_secs(10));
        assert_eq!(policy.deadline, Duration::from_secs(900));
    }

    #[test]
    fn test_table_location_defaults_to_partition_root() {
        let config = Config::from_yaml_with_options(MINIMAL, false).unwrap();
        assert_eq!(config.table_location(), "s3://enriched-bucket/telegram/");
    }

    #[test]
    fn test_explicit_table_location_wins() {
        let yaml = format!("{MINIMAL}table:\n  name: chats\n  location: s3://elsewhere/chats/\n");
        let config = Config::from_yaml_with_options(&yaml, false).unwrap();
        assert_eq!(config.table.name, "chats");
        assert_eq!(config.table_location(), "s3://elsewhere/chats/");
    }

    #[test]
    fn test_empty_raw_url_rejected() {
        let yaml = MINIMAL.replace("s3://raw-bucket", "");
        let err = Config::from_yaml_with_options(&yaml, false).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyRawUrl));
    }

    #[test]
    fn test_bad_poll_policy_rejected() {
        let yaml = format!(
            "{MINIMAL}  poll:\n    initial_interval_ms: 5000\n    max_interval_ms: 1000\n"
        );
        let err = Config::from_yaml_with_options(&yaml, false).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPollPolicy { .. }));
    }

    #[test]
    fn test_queries_keep_order() {
        let yaml = format!("{MINIMAL}queries:\n  - SELECT 1\n  - SELECT 2\n");
        let config = Config::from_yaml_with_options(&yaml, false).unwrap();
        assert_eq!(config.queries, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_auth_token_redacted_in_debug() {
        let yaml = MINIMAL.replace(
            "  output_location",
            "  auth_token: super-secret\n  output_location",
        );
        let config = Config::from_yaml_with_options(&yaml, false).unwrap();
        let rendered = format!("{:?}", config.query_engine);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}

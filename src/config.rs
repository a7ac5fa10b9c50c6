//! Configuration types and builders for acled-sync.

use crate::engine::{DedupPolicy, PageRange};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;
use validator::{Validate, ValidationError};

/// Main configuration for a sync session.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SyncConfig {
    /// PostgreSQL connection configuration
    #[validate(nested)]
    pub postgres: PostgresConfig,

    /// Event API configuration
    #[validate(nested)]
    pub api: ApiConfig,

    /// Target table configuration
    #[validate(nested)]
    #[serde(default)]
    pub target: TargetConfig,

    /// Sync behavior configuration
    #[validate(nested)]
    #[serde(default)]
    pub sync: SyncBehaviorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SyncConfig {
    /// Create a new configuration builder.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let postgres_url = lookup("DATABASE_URL")
            .or_else(|| lookup("POSTGRES_URL"))
            .ok_or_else(|| Error::config("DATABASE_URL or POSTGRES_URL not set"))?;

        let api_key = lookup("ACLED_API_KEY").ok_or_else(|| Error::config("ACLED_API_KEY not set"))?;
        let api_email = lookup("ACLED_EMAIL").ok_or_else(|| Error::config("ACLED_EMAIL not set"))?;

        let mut builder = Self::builder()
            .postgres_url(postgres_url)
            .api_key(api_key)
            .api_email(api_email);

        if let Some(base) = lookup("ACLED_BASE_URL") {
            builder = builder.api_base_url(base);
        }
        if let Some(schema) = lookup("ACLED_SCHEMA") {
            builder = builder.schema(schema);
        }
        if let Some(table) = lookup("ACLED_TABLE") {
            builder = builder.table(table);
        }
        if let Some(mirrors) = lookup("ACLED_MIRROR_SCHEMAS") {
            for s in mirrors.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                builder = builder.mirror_schema(s);
            }
        }
        if let Some(size) = lookup("ACLED_PAGE_SIZE") {
            let size = size
                .parse()
                .map_err(|e| Error::config_with_source("ACLED_PAGE_SIZE is not a number", e))?;
            builder = builder.page_size(size);
        }

        builder.build()
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read {}: {}", path, e)))?;

        Self::from_toml(&content).map_err(|e| match e {
            Error::Config { message, source } => Error::Config {
                message: format!("{}: {}", path, message),
                source,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::config_with_source("Failed to parse config", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)
            .map_err(|e| Error::validation(format!("Config validation failed: {}", e)))
    }
}

/// PostgreSQL connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PostgresConfig {
    /// Connection URL
    #[validate(length(min = 1))]
    pub url: String,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_secs: default_timeout_secs(),
        }
    }
}

impl PostgresConfig {
    /// Get connect timeout duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Event API configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApiConfig {
    /// Base URL; `read` is appended to form the endpoint
    #[validate(custom(function = "validate_base_url"))]
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Access key
    #[validate(length(min = 1))]
    #[serde(skip_serializing)]
    pub key: String,

    /// Registered account email
    #[validate(length(min = 1))]
    pub email: String,

    /// Records requested per page
    #[validate(range(min = 1, max = 100000))]
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Request timeout, e.g. `60s` or `2m`
    #[validate(custom(function = "validate_duration"))]
    #[serde(default = "default_request_timeout")]
    pub timeout: String,

    /// Skip TLS certificate verification
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            key: String::new(),
            email: String::new(),
            page_size: default_page_size(),
            timeout: default_request_timeout(),
            accept_invalid_certs: false,
        }
    }
}

impl ApiConfig {
    /// Get request timeout duration.
    pub fn request_timeout(&self) -> Result<Duration> {
        humantime::parse_duration(&self.timeout)
            .map_err(|e| Error::config_with_source(format!("Invalid timeout '{}'", self.timeout), e))
    }
}

/// Target table configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TargetConfig {
    /// Schema holding the event table
    #[validate(custom(function = "validate_identifier"))]
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Event table name
    #[validate(custom(function = "validate_identifier"))]
    #[serde(default = "default_table")]
    pub table: String,

    /// Natural identifier column
    #[validate(custom(function = "validate_identifier"))]
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Additional schemas that receive a copy of each new batch
    #[validate(custom(function = "validate_identifiers"))]
    #[serde(default)]
    pub mirror_schemas: Vec<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            table: default_table(),
            id_column: default_id_column(),
            mirror_schemas: Vec::new(),
        }
    }
}

impl TargetConfig {
    /// Fully qualified table name.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// Sync behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_page_bounds"))]
pub struct SyncBehaviorConfig {
    /// First page to fetch
    #[validate(range(min = 1))]
    #[serde(default = "default_page_start")]
    pub page_start: u32,

    /// Last page to fetch (inclusive); unbounded when absent
    #[serde(default)]
    pub page_end: Option<u32>,

    /// Baseline update policy
    #[serde(default)]
    pub dedup: DedupPolicy,

    /// Rows per INSERT statement
    #[validate(range(min = 1, max = 100000))]
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Recompute the derived date column after appending
    #[serde(default = "default_true")]
    pub refresh_date_column: bool,
}

impl Default for SyncBehaviorConfig {
    fn default() -> Self {
        Self {
            page_start: default_page_start(),
            page_end: None,
            dedup: DedupPolicy::default(),
            batch_size: default_batch_size(),
            refresh_date_column: true,
        }
    }
}

impl SyncBehaviorConfig {
    /// Page range for the engine.
    pub fn page_range(&self) -> PageRange {
        PageRange {
            start: self.page_start,
            end: self.page_end,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text format (default)
    #[default]
    Text,
    /// JSON format
    Json,
}

/// Builder for SyncConfig.
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    postgres_url: Option<String>,
    api_base_url: Option<String>,
    api_key: Option<String>,
    api_email: Option<String>,
    page_size: Option<u32>,
    accept_invalid_certs: bool,
    schema: Option<String>,
    table: Option<String>,
    id_column: Option<String>,
    mirror_schemas: Vec<String>,
    page_start: Option<u32>,
    page_end: Option<u32>,
    dedup: Option<DedupPolicy>,
    batch_size: Option<usize>,
    log_level: Option<String>,
}

impl SyncConfigBuilder {
    /// Set PostgreSQL connection URL.
    pub fn postgres_url(mut self, url: impl Into<String>) -> Self {
        self.postgres_url = Some(url.into());
        self
    }

    /// Set the event API base URL.
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Set the event API access key.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the event API account email.
    pub fn api_email(mut self, email: impl Into<String>) -> Self {
        self.api_email = Some(email.into());
        self
    }

    /// Set records per page.
    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Skip TLS certificate verification for the event API.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Set target schema.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Set target table.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Set identifier column.
    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = Some(column.into());
        self
    }

    /// Add a mirror schema.
    pub fn mirror_schema(mut self, schema: impl Into<String>) -> Self {
        self.mirror_schemas.push(schema.into());
        self
    }

    /// Set the page range.
    pub fn page_range(mut self, start: u32, end: Option<u32>) -> Self {
        self.page_start = Some(start);
        self.page_end = end;
        self
    }

    /// Set dedup policy.
    pub fn dedup(mut self, policy: DedupPolicy) -> Self {
        self.dedup = Some(policy);
        self
    }

    /// Set rows per INSERT statement.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Build the SyncConfig.
    pub fn build(self) -> Result<SyncConfig> {
        let pg_url = self
            .postgres_url
            .ok_or_else(|| Error::config("postgres_url required"))?;
        Url::parse(&pg_url).map_err(|e| Error::config(format!("Invalid PostgreSQL URL: {}", e)))?;

        let key = self.api_key.ok_or_else(|| Error::config("api_key required"))?;
        let email = self
            .api_email
            .ok_or_else(|| Error::config("api_email required"))?;

        let config = SyncConfig {
            postgres: PostgresConfig {
                url: pg_url,
                ..Default::default()
            },
            api: ApiConfig {
                base_url: self.api_base_url.unwrap_or_else(default_base_url),
                key,
                email,
                page_size: self.page_size.unwrap_or_else(default_page_size),
                accept_invalid_certs: self.accept_invalid_certs,
                ..Default::default()
            },
            target: TargetConfig {
                schema: self.schema.unwrap_or_else(default_schema),
                table: self.table.unwrap_or_else(default_table),
                id_column: self.id_column.unwrap_or_else(default_id_column),
                mirror_schemas: self.mirror_schemas,
            },
            sync: SyncBehaviorConfig {
                page_start: self.page_start.unwrap_or_else(default_page_start),
                page_end: self.page_end,
                dedup: self.dedup.unwrap_or_default(),
                batch_size: self.batch_size.unwrap_or_else(default_batch_size),
                ..Default::default()
            },
            logging: LoggingConfig {
                level: self.log_level.unwrap_or_else(default_log_level),
                ..Default::default()
            },
        };

        config.validate()?;
        Ok(config)
    }
}

fn validate_base_url(url: &str) -> std::result::Result<(), ValidationError> {
    match Url::parse(url) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => Ok(()),
        _ => Err(ValidationError::new("base_url")),
    }
}

fn validate_duration(value: &str) -> std::result::Result<(), ValidationError> {
    humantime::parse_duration(value)
        .map(|_| ())
        .map_err(|_| ValidationError::new("duration"))
}

fn validate_identifier(value: &str) -> std::result::Result<(), ValidationError> {
    let mut chars = value.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && value.len() <= 63;
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("identifier"))
    }
}

fn validate_identifiers(values: &[String]) -> std::result::Result<(), ValidationError> {
    values.iter().try_for_each(|v| validate_identifier(v))
}

fn validate_page_bounds(cfg: &SyncBehaviorConfig) -> std::result::Result<(), ValidationError> {
    match cfg.page_end {
        Some(end) if end < cfg.page_start => Err(ValidationError::new("page_end_before_start")),
        _ => Ok(()),
    }
}

// Defaults
fn default_timeout_secs() -> u64 {
    30
}
fn default_base_url() -> String {
    "https://api.acleddata.com/acled/".into()
}
fn default_page_size() -> u32 {
    5000
}
fn default_request_timeout() -> String {
    "60s".into()
}
fn default_schema() -> String {
    "public".into()
}
fn default_table() -> String {
    "acled".into()
}
fn default_id_column() -> String {
    "event_id_cnty".into()
}
fn default_page_start() -> u32 {
    1
}
fn default_batch_size() -> usize {
    1000
}
fn default_log_level() -> String {
    "info".into()
}
fn default_true() -> bool {
    true
}

//! Event API client: fetches one page of event records at a time.

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// One event as returned by the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventRecord {
    fields: HashMap<String, JsonValue>,
}

impl EventRecord {
    /// Create a record from its fields.
    pub fn new(fields: HashMap<String, JsonValue>) -> Self {
        Self { fields }
    }

    /// Get a field value.
    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.fields.get(name)
    }

    /// Set a field value.
    pub fn insert(&mut self, name: impl Into<String>, value: JsonValue) {
        self.fields.insert(name.into(), value);
    }

    /// Identifier held in `column`, normalized to a string.
    ///
    /// Returns `None` for missing, null, empty or non-scalar identifiers.
    pub fn id(&self, column: &str) -> Option<String> {
        match self.fields.get(column)? {
            JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// All fields.
    pub fn fields(&self) -> &HashMap<String, JsonValue> {
        &self.fields
    }
}

/// One page of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Page number
    pub number: u32,
    /// Records on the page
    pub records: Vec<EventRecord>,
}

impl Page {
    /// Create a page.
    pub fn new(number: u32, records: Vec<EventRecord>) -> Self {
        Self { number, records }
    }

    /// An empty page marks the end of the source.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// A paginated source of event records.
///
/// `Ok` with an empty page means the source is exhausted; `Err` means the page
/// could not be retrieved.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch page `page` holding at most `limit` records.
    async fn fetch_page(&self, page: u32, limit: u32) -> Result<Page>;
}

/// Response envelope of the `read` endpoint.
#[derive(Debug, Deserialize)]
struct ReadResponse {
    success: bool,
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    data: JsonValue,
    #[serde(default)]
    error: Option<JsonValue>,
}

/// HTTP client for the ACLED `read` endpoint.
pub struct AcledClient {
    http: reqwest::Client,
    config: ApiConfig,
}

impl AcledClient {
    /// Build a client from configuration.
    pub fn new(config: ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout()?)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .user_agent(concat!("acled-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config_with_source("Failed to build HTTP client", e))?;

        if config.accept_invalid_certs {
            warn!("TLS certificate verification disabled for the event API");
        }

        Ok(Self { http, config })
    }

    /// URL of one page: `{base}read?key=..&email=..&limit=..&page=..`.
    pub fn page_url(&self, page: u32, limit: u32) -> Result<Url> {
        let mut url = Url::parse(&format!("{}read", self.config.base_url))
            .map_err(|e| Error::config_with_source("Invalid API base URL", e))?;
        url.query_pairs_mut()
            .append_pair("key", &self.config.key)
            .append_pair("email", &self.config.email)
            .append_pair("limit", &limit.to_string())
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    /// Configured page size.
    pub fn page_size(&self) -> u32 {
        self.config.page_size
    }
}

#[async_trait]
impl EventSource for AcledClient {
    #[instrument(skip(self))]
    async fn fetch_page(&self, page: u32, limit: u32) -> Result<Page> {
        let url = self.page_url(page, limit)?;
        info!("Querying {} records from page {}", limit, page);
        debug!("GET {}", mask_key(&url));

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::transport(page, "Request failed", e))?;

        let body: ReadResponse = response
            .json()
            .await
            .map_err(|e| Error::transport(page, "Malformed response body", e))?;

        if !body.success {
            let message = body
                .error
                .as_ref()
                .and_then(|e| e.get("message").and_then(JsonValue::as_str).map(str::to_string))
                .unwrap_or_else(|| "query reported failure".to_string());
            return Err(Error::api(page, message));
        }

        if body.count == Some(0) || body.data.is_null() {
            info!("Page {} returned no records", page);
            return Ok(Page::new(page, Vec::new()));
        }

        let records: Vec<EventRecord> = serde_json::from_value(body.data)
            .map_err(|e| Error::serialization(format!("Page {} data is not a record list", page), e))?;

        info!("Page {} returned {} records", page, records.len());
        Ok(Page::new(page, records))
    }
}

/// Replace the access key in a URL for logging.
fn mask_key(url: &Url) -> String {
    let mut masked = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "key" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked.to_string()
}

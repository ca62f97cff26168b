//! Paginated client for Solr-style search cores.
//!
//! The pipeline only needs three capabilities from a source, captured by the
//! [`DocumentSource`] trait: a liveness probe, a document count and ordered
//! batches of identifiers. [`SolrClient`] implements them over HTTP:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | count | `GET {base}/select?q={id}:*&rows=0&wt=json` |
//! | batch | `GET {base}/select?q={id}:*&fl={id},{date}&start=&rows=&sort={id} asc&wt=json` |
//! | ping  | `GET {base}/admin/ping?wt=json` |
//!
//! Every request goes through the source's [`CircuitBreaker`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::SourceConfig;
use crate::types::Record;
use crate::{ConnectionKind, Error, Result};

/// Document budget per source when test mode is on.
pub const TEST_MODE_LIMIT: u64 = 10;

/// Remote capability the pipeline extracts records from.
///
/// Implemented by [`SolrClient`]; tests drive the orchestrator with in-memory
/// implementations.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Probe liveness. `Ok(())` means the source answered healthy.
    async fn health_check(&self) -> Result<()>;

    /// Number of documents that carry `id_field`.
    async fn total_count(&self, id_field: &str) -> Result<u64>;

    /// Up to `limit` records starting at `offset`, ordered by ascending id.
    ///
    /// An empty batch means the source is exhausted.
    async fn fetch_batch(
        &self,
        id_field: &str,
        date_field: &str,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Record>>;
}

/// Creates a [`DocumentSource`] for a configured source.
pub trait SourceConnector: Send + Sync {
    /// Build the client for `source`, protected by `breaker`.
    fn connect(
        &self,
        source: &SourceConfig,
        breaker: Arc<CircuitBreaker>,
        test_mode: bool,
    ) -> Result<Arc<dyn DocumentSource>>;
}

/// Connector producing [`SolrClient`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

impl SourceConnector for HttpConnector {
    fn connect(
        &self,
        source: &SourceConfig,
        breaker: Arc<CircuitBreaker>,
        test_mode: bool,
    ) -> Result<Arc<dyn DocumentSource>> {
        let client = SolrClient::new(&source.url, source.request_timeout(), breaker)?
            .with_test_mode(test_mode);
        Ok(Arc::new(client))
    }
}

#[derive(Debug, Deserialize)]
struct SelectResponse {
    response: SelectBody,
}

#[derive(Debug, Deserialize)]
struct SelectBody {
    #[serde(rename = "numFound")]
    num_found: u64,
    #[serde(default)]
    docs: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct PingResponse {
    #[serde(default)]
    status: String,
}

/// HTTP client for one search core.
pub struct SolrClient {
    client: Client,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
    test_mode: bool,
}

impl SolrClient {
    /// Create a client for the core at `base_url`.
    pub fn new(base_url: &str, timeout: Duration, breaker: Arc<CircuitBreaker>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sitemapper/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            breaker,
            test_mode: false,
        })
    }

    /// Limit every count and batch to [`TEST_MODE_LIMIT`] documents.
    #[must_use]
    pub const fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// Whether the test budget applies.
    pub const fn is_test_mode(&self) -> bool {
        self.test_mode
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{path}", self.base_url);
        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::connection(
                ConnectionKind::Protocol,
                format!("{url} returned HTTP {status}"),
            ));
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| {
            Error::connection(
                ConnectionKind::Protocol,
                format!("{url} returned an unexpected body: {e}"),
            )
        })
    }
}

#[async_trait]
impl DocumentSource for SolrClient {
    #[instrument(skip(self), fields(source = %self.breaker.name()))]
    async fn health_check(&self) -> Result<()> {
        let query = [("wt", "json".to_string())];
        let ping: PingResponse = self
            .breaker
            .call(|| self.get_json("admin/ping", &query))
            .await?;
        if ping.status.eq_ignore_ascii_case("ok") {
            Ok(())
        } else {
            Err(Error::connection(
                ConnectionKind::Protocol,
                format!("ping reported status '{}'", ping.status),
            ))
        }
    }

    #[instrument(skip(self), fields(source = %self.breaker.name()))]
    async fn total_count(&self, id_field: &str) -> Result<u64> {
        let query = [
            ("q", format!("{id_field}:*")),
            ("rows", "0".to_string()),
            ("wt", "json".to_string()),
        ];
        let select: SelectResponse = self.breaker.call(|| self.get_json("select", &query)).await?;
        let count = select.response.num_found;
        if self.test_mode {
            debug!(count, limit = TEST_MODE_LIMIT, "Test mode caps document count");
            return Ok(count.min(TEST_MODE_LIMIT));
        }
        Ok(count)
    }

    #[instrument(skip(self), fields(source = %self.breaker.name()))]
    async fn fetch_batch(
        &self,
        id_field: &str,
        date_field: &str,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Record>> {
        let mut rows = limit as u64;
        if self.test_mode {
            if offset >= TEST_MODE_LIMIT {
                return Ok(Vec::new());
            }
            rows = rows.min(TEST_MODE_LIMIT - offset);
        }
        if rows == 0 {
            return Ok(Vec::new());
        }

        let query = [
            ("q", format!("{id_field}:*")),
            ("fl", format!("{id_field},{date_field}")),
            ("start", offset.to_string()),
            ("rows", rows.to_string()),
            ("sort", format!("{id_field} asc")),
            ("wt", "json".to_string()),
        ];
        let select: SelectResponse = self.breaker.call(|| self.get_json("select", &query)).await?;

        let records: Vec<Record> = select
            .response
            .docs
            .iter()
            .filter_map(|doc| parse_document(doc, id_field, date_field))
            .collect();
        debug!(offset, requested = rows, received = records.len(), "Fetched batch");
        Ok(records)
    }
}

/// Convert one returned document; documents without an id are dropped.
///
/// Whitespace ids are kept so the batch keeps its size and the URL builder
/// rejects them as conversion failures.
fn parse_document(doc: &Map<String, Value>, id_field: &str, date_field: &str) -> Option<Record> {
    let id = doc.get(id_field).and_then(field_text)?;
    let last_modified = doc
        .get(date_field)
        .and_then(field_text)
        .and_then(|raw| parse_source_date(&raw));
    Some(Record::new(id, last_modified))
}

/// Text of a scalar field; multi-valued fields use their first value.
fn field_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Array(values) => return values.first().and_then(field_text),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Parse a timestamp as returned by search cores.
///
/// Supports:
/// - `2024-01-15T10:30:00Z` and `2024-01-15T10:30:00.123Z`
/// - `2024-01-15 10:30:00` and `2024-01-15T10:30:00` (assumed UTC)
/// - RFC 3339 with any offset
/// - `2024-01-15` (midnight UTC)
///
/// Anything else yields `None`; a bad date never fails the record.
pub fn parse_source_date(s: &str) -> Option<DateTime<Utc>> {
    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ];

    let s = s.trim();
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc());
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }

    debug!(date_str = %s, "Could not parse document date");
    None
}

//! Configuration for a sitemap export run.
//!
//! Configuration is stored in TOML and loaded with [`AppConfig::load`], which
//! parses and validates in one step.
//!
//! ## Example Configuration File
//!
//! ```toml
//! [sitemap]
//! output_dir = "./sitemaps"
//! max_urls_per_file = 50000
//! compress = true
//! base_url = "https://www.example.com/sitemaps"
//! output_name = "sitemap.xml"
//!
//! [processing]
//! parallel_workers = 4
//! test_mode = false
//! log_level = "INFO"
//!
//! [[sources]]
//! name = "products"
//! url = "http://solr.internal:8983/solr/products"
//! id_field = "id"
//! date_field = "last_modified"
//! url_pattern = "https://www.example.com/product/{id}"
//! changefreq = "daily"
//! batch_size = 1000
//! timeout = 30
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::ChangeFrequency;
use crate::url_builder::UrlBuilder;
use crate::{Error, Result};

/// Upper bound on URLs in one sitemap file, fixed by the sitemap protocol.
pub const MAX_URLS_PER_SITEMAP: usize = 50_000;

/// Largest accepted batch size.
pub const MAX_BATCH_SIZE: usize = 100_000;

/// Settings for one remote search core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique name, used in file names and logs.
    pub name: String,
    /// Base address of the core, e.g. `http://host:8983/solr/products`.
    pub url: String,
    /// Field holding the document identifier.
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Field holding the last modification timestamp.
    #[serde(default = "default_date_field")]
    pub date_field: String,
    /// URL template containing exactly one `{id}` token.
    pub url_pattern: String,
    /// Change frequency written to every entry of this source.
    #[serde(default)]
    pub changefreq: ChangeFrequency,
    /// Documents fetched per request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    /// Breaker settings for this source only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl SourceConfig {
    /// Create a source with default field names, batch size and timeout.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        url_pattern: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            id_field: default_id_field(),
            date_field: default_date_field(),
            url_pattern: url_pattern.into(),
            changefreq: ChangeFrequency::default(),
            batch_size: default_batch_size(),
            timeout: default_timeout_secs(),
            circuit_breaker: None,
        }
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Check the invariants of a single source.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("Source name cannot be empty".into()));
        }
        if self
            .name
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
        {
            return Err(Error::Config(format!(
                "Source name '{}' may only contain letters, digits, '-', '_' and '.'",
                self.name
            )));
        }
        let base = url::Url::parse(&self.url)
            .map_err(|e| Error::Config(format!("Source '{}' has invalid url: {e}", self.name)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "Source '{}' url must use http or https",
                self.name
            )));
        }
        if self.id_field.trim().is_empty() || self.date_field.trim().is_empty() {
            return Err(Error::Config(format!(
                "Source '{}' needs non-empty id_field and date_field",
                self.name
            )));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(Error::Config(format!(
                "Source '{}' batch_size must be between 1 and {MAX_BATCH_SIZE}",
                self.name
            )));
        }
        if self.timeout == 0 {
            return Err(Error::Config(format!(
                "Source '{}' timeout must be positive",
                self.name
            )));
        }
        UrlBuilder::new(&self.url_pattern).map_err(|e| {
            Error::Config(format!("Source '{}' has invalid url_pattern: {e}", self.name))
        })?;
        if let Some(breaker) = &self.circuit_breaker {
            breaker.validate()?;
        }
        Ok(())
    }
}

/// Settings for sitemap file generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitemapConfig {
    /// Directory receiving the generated files.
    pub output_dir: PathBuf,
    /// URLs per file before splitting (at most 50000).
    #[serde(default = "default_max_urls")]
    pub max_urls_per_file: usize,
    /// Gzip files and drop the uncompressed copy.
    #[serde(default = "default_true")]
    pub compress: bool,
    /// Public prefix for index `<loc>` values; empty means relative names.
    #[serde(default)]
    pub base_url: String,
    /// Name of the global index file.
    #[serde(default = "default_output_name")]
    pub output_name: String,
    /// Write a global index over every source's files.
    #[serde(default = "default_true")]
    pub global_index: bool,
}

impl SitemapConfig {
    /// Defaults rooted at `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            max_urls_per_file: default_max_urls(),
            compress: true,
            base_url: String::new(),
            output_name: default_output_name(),
            global_index: true,
        }
    }

    /// Check sitemap settings.
    pub fn validate(&self) -> Result<()> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::Config("sitemap.output_dir cannot be empty".into()));
        }
        if self.max_urls_per_file == 0 || self.max_urls_per_file > MAX_URLS_PER_SITEMAP {
            return Err(Error::Config(format!(
                "sitemap.max_urls_per_file must be between 1 and {MAX_URLS_PER_SITEMAP}"
            )));
        }
        if !self.base_url.is_empty() {
            let parsed = url::Url::parse(&self.base_url)
                .map_err(|e| Error::Config(format!("sitemap.base_url is invalid: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Error::Config(
                    "sitemap.base_url must use http or https".into(),
                ));
            }
        }
        if self.output_name.trim().is_empty() {
            return Err(Error::Config("sitemap.output_name cannot be empty".into()));
        }
        Ok(())
    }
}

/// Thresholds of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures in the closed state before opening.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds to stay open before allowing a probe.
    #[serde(default = "default_recovery_secs")]
    pub recovery_timeout: u64,
    /// Consecutive half-open successes needed to close.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Per-call guard in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub timeout: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout: default_recovery_secs(),
            success_threshold: default_success_threshold(),
            timeout: default_call_timeout_secs(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Settings shared by sources without an override: quicker to trip and to recover.
    #[must_use]
    pub const fn pipeline_default(call_timeout: Duration) -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: 30,
            success_threshold: 2,
            timeout: call_timeout.as_secs(),
        }
    }

    /// Open duration as a [`Duration`].
    #[must_use]
    pub const fn recovery(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout)
    }

    /// Per-call guard as a [`Duration`].
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Check breaker thresholds.
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(Error::Config(
                "circuit_breaker thresholds must be at least 1".into(),
            ));
        }
        if self.timeout == 0 {
            return Err(Error::Config(
                "circuit_breaker.timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Processing knobs from the `[processing]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Sources processed concurrently.
    #[serde(default = "default_workers")]
    pub parallel_workers: usize,
    /// Cap every source at 10 documents.
    #[serde(default)]
    pub test_mode: bool,
    /// One of `DEBUG`, `INFO`, `WARNING`, `ERROR`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            parallel_workers: default_workers(),
            test_mode: false,
            log_level: default_log_level(),
        }
    }
}

/// Complete run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Sources to export, in processing order.
    #[serde(alias = "cores")]
    pub sources: Vec<SourceConfig>,
    /// Sitemap output settings.
    pub sitemap: SitemapConfig,
    /// Worker count, test mode and log level.
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Default breaker for sources without an override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl AppConfig {
    /// Build a configuration in code.
    pub fn new(sources: Vec<SourceConfig>, sitemap: SitemapConfig) -> Self {
        Self {
            sources,
            sitemap,
            processing: ProcessingConfig::default(),
            circuit_breaker: None,
        }
    }

    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read, is not valid TOML,
    /// or fails [`AppConfig::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section and cross-source invariants.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::Config("At least one source must be configured".into()));
        }
        let mut seen = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !seen.insert(source.name.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate source name '{}'",
                    source.name
                )));
            }
        }
        self.sitemap.validate()?;
        if self.processing.parallel_workers == 0 {
            return Err(Error::Config(
                "processing.parallel_workers must be at least 1".into(),
            ));
        }
        if !matches!(
            self.processing.log_level.to_uppercase().as_str(),
            "DEBUG" | "INFO" | "WARNING" | "WARN" | "ERROR"
        ) {
            return Err(Error::Config(format!(
                "Invalid log level '{}'. Use DEBUG, INFO, WARNING or ERROR",
                self.processing.log_level
            )));
        }
        if let Some(breaker) = &self.circuit_breaker {
            breaker.validate()?;
        }
        Ok(())
    }

    /// Breaker settings shared by sources without their own override.
    #[must_use]
    pub fn default_breaker(&self) -> CircuitBreakerConfig {
        self.circuit_breaker.unwrap_or_else(|| {
            let call_timeout = self
                .sources
                .first()
                .map_or(Duration::from_secs(default_timeout_secs()), SourceConfig::request_timeout);
            CircuitBreakerConfig::pipeline_default(call_timeout)
        })
    }
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_date_field() -> String {
    "last_modified".to_string()
}

const fn default_batch_size() -> usize {
    1000
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_max_urls() -> usize {
    MAX_URLS_PER_SITEMAP
}

const fn default_true() -> bool {
    true
}

fn default_output_name() -> String {
    "sitemap.xml".to_string()
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_recovery_secs() -> u64 {
    60
}

const fn default_success_threshold() -> u32 {
    3
}

const fn default_call_timeout_secs() -> u64 {
    30
}

const fn default_workers() -> usize {
    4
}

fn default_log_level() -> String {
    "INFO".to_string()
}

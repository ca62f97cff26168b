//! Core data types shared by the pipeline stages.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::Error;

/// A document identifier pulled from a source, with its optional timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Document identifier; never empty.
    pub id: String,
    /// Last modification time, when the source provided a parseable one.
    pub last_modified: Option<DateTime<Utc>>,
}

impl Record {
    /// Create a record.
    pub fn new(id: impl Into<String>, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.into(),
            last_modified,
        }
    }
}

/// One `<url>` element of a sitemap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SitemapEntry {
    /// Absolute, validated URL.
    pub url: String,
    /// Last modification date.
    pub lastmod: Option<DateTime<Utc>>,
    /// How frequently the page changes.
    pub changefreq: ChangeFrequency,
}

/// Change frequency hints written to each `<url>` element.
///
/// These values indicate how frequently a page is likely to change,
/// though search engines may not follow these hints strictly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum ChangeFrequency {
    /// The page changes every time it is accessed.
    Always,
    /// The page changes hourly.
    Hourly,
    /// The page changes daily.
    Daily,
    /// The page changes weekly.
    #[default]
    Weekly,
    /// The page changes monthly.
    Monthly,
    /// The page changes yearly.
    Yearly,
    /// The page is archived and will not change.
    Never,
}

impl ChangeFrequency {
    /// The sitemap protocol spelling of this value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::Never => "never",
        }
    }
}

impl std::fmt::Display for ChangeFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChangeFrequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            "never" => Ok(Self::Never),
            _ => Err(Error::Config(format!("Invalid changefreq value: {s}"))),
        }
    }
}

impl TryFrom<String> for ChangeFrequency {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// An error recorded against one source during its pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceError {
    /// Category identifier, see [`Error::category`].
    pub category: String,
    /// Human readable description including the pipeline step.
    pub message: String,
}

impl SourceError {
    /// Record an error with explicit category.
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
        }
    }

    /// Record a library error, prefixed with the step that produced it.
    pub fn from_error(context: &str, error: &Error) -> Self {
        Self::new(error.category(), format!("{context}: {error}"))
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Outcome of one source's pipeline. Written once when the pipeline ends.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResult {
    /// Source name.
    pub name: String,
    /// Documents the source reported.
    pub total_docs: u64,
    /// URLs actually written to sitemap files.
    pub processed_docs: u64,
    /// Documents that failed URL conversion.
    pub failed_docs: u64,
    /// Files produced, index file first when present.
    pub generated_files: Vec<PathBuf>,
    /// Wall-clock time spent in the pipeline.
    #[serde(rename = "elapsedSecs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    /// Errors accumulated along the way.
    pub errors: Vec<SourceError>,
}

impl SourceResult {
    /// Empty result for a source, to be filled in by its pipeline.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            total_docs: 0,
            processed_docs: 0,
            failed_docs: 0,
            generated_files: Vec::new(),
            elapsed: Duration::ZERO,
            errors: Vec::new(),
        }
    }

    /// Result for a pipeline that failed before producing anything.
    pub fn failed(name: impl Into<String>, error: SourceError) -> Self {
        let mut result = Self::new(name);
        result.errors.push(error);
        result
    }

    /// Whether any error was recorded.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Percentage of reported documents that made it into a sitemap.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Precision loss acceptable for percentage calculation
    pub fn success_rate(&self) -> f64 {
        if self.total_docs == 0 {
            0.0
        } else {
            (self.processed_docs as f64 / self.total_docs as f64) * 100.0
        }
    }

    /// URLs written per second of pipeline time.
    #[must_use]
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            #[allow(clippy::cast_precision_loss)]
            let processed = self.processed_docs as f64;
            processed / secs
        } else {
            0.0
        }
    }
}

/// Aggregated outcome of a whole run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    /// Per-source outcomes in configuration order.
    pub sources: Vec<SourceResult>,
    /// URLs written across all sources.
    pub total_urls: u64,
    /// Files written across all sources (excluding the global index).
    pub total_files: usize,
    /// Wall-clock time for the run.
    #[serde(rename = "elapsedSecs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    /// `total_urls / documents attempted * 100`, or 0 when nothing was attempted.
    pub success_rate: f64,
    /// Global index file, when one was written.
    pub global_index: Option<PathBuf>,
    /// Whether shutdown was requested before every source ran.
    pub cancelled: bool,
}

impl ProcessingResult {
    /// Aggregate per-source results into run totals.
    pub fn from_sources(sources: Vec<SourceResult>, elapsed: Duration) -> Self {
        let total_urls: u64 = sources.iter().map(|s| s.processed_docs).sum();
        let attempted: u64 = sources.iter().map(|s| s.total_docs).sum();
        let total_files = sources.iter().map(|s| s.generated_files.len()).sum();
        #[allow(clippy::cast_precision_loss)] // Precision loss acceptable for percentage calculation
        let success_rate = if attempted == 0 {
            0.0
        } else {
            (total_urls as f64 / attempted as f64) * 100.0
        };

        Self {
            sources,
            total_urls,
            total_files,
            elapsed,
            success_rate,
            global_index: None,
            cancelled: false,
        }
    }

    /// Total number of errors recorded across sources.
    #[must_use]
    pub fn total_errors(&self) -> usize {
        self.sources.iter().map(|s| s.errors.len()).sum()
    }

    /// Every generated file across sources, in source order.
    pub fn all_files(&self) -> impl Iterator<Item = &PathBuf> {
        self.sources.iter().flat_map(|s| s.generated_files.iter())
    }
}

fn serialize_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_changefreq_parsing_is_case_insensitive() {
        assert_eq!("Daily".parse::<ChangeFrequency>().unwrap(), ChangeFrequency::Daily);
        assert_eq!(" NEVER ".parse::<ChangeFrequency>().unwrap(), ChangeFrequency::Never);
        assert!("fortnightly".parse::<ChangeFrequency>().is_err());
        assert_eq!(ChangeFrequency::default(), ChangeFrequency::Weekly);
    }

    #[test]
    fn test_changefreq_serde_roundtrip() {
        #[derive(Deserialize)]
        struct Wrapper {
            freq: ChangeFrequency,
        }
        let parsed: Wrapper = toml::from_str("freq = \"Monthly\"").unwrap();
        assert_eq!(parsed.freq, ChangeFrequency::Monthly);
        assert_eq!(
            serde_json::to_string(&ChangeFrequency::Hourly).unwrap(),
            "\"hourly\""
        );
    }

    #[test]
    fn test_processing_result_totals() {
        let mut a = SourceResult::new("a");
        a.total_docs = 10;
        a.processed_docs = 8;
        a.generated_files = vec![PathBuf::from("sitemap_a.xml")];
        let mut b = SourceResult::new("b");
        b.total_docs = 10;
        b.processed_docs = 10;
        b.generated_files = vec![
            PathBuf::from("sitemap_index_b.xml"),
            PathBuf::from("sitemap_b_1.xml"),
            PathBuf::from("sitemap_b_2.xml"),
        ];

        let result = ProcessingResult::from_sources(vec![a, b], Duration::from_secs(2));

        assert_eq!(result.total_urls, 18);
        assert_eq!(result.total_files, 4);
        assert_eq!(result.success_rate, 90.0);
        assert_eq!(result.all_files().count(), 4);
    }

    #[test]
    fn test_success_rate_zero_when_nothing_attempted() {
        let result = ProcessingResult::from_sources(vec![SourceResult::new("empty")], Duration::ZERO);
        assert_eq!(result.success_rate, 0.0);
        assert_eq!(SourceResult::new("empty").success_rate(), 0.0);
    }

    #[test]
    fn test_result_serializes_elapsed_as_seconds() {
        let mut source = SourceResult::new("docs");
        source.elapsed = Duration::from_millis(1500);
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["elapsedSecs"], 1.5);
        assert_eq!(json["name"], "docs");
    }
}

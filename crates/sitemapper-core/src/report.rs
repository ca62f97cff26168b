//! Run summaries for humans and for exit-code decisions.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;

use crate::types::{ProcessingResult, SourceResult};

const RULE_WIDTH: usize = 60;
/// Average per-source time above which a slow-run hint is given.
const SLOW_SOURCE: Duration = Duration::from_secs(300);
const SECTION_WIDTH: usize = 40;

/// Per-source line of a [`SummaryReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSummary {
    /// Source name.
    pub name: String,
    /// Documents the source reported.
    pub total_docs: u64,
    /// URLs written.
    pub processed_docs: u64,
    /// `processed_docs / total_docs * 100`.
    pub success_rate: f64,
    /// Pipeline time in seconds.
    pub elapsed_secs: f64,
    /// Files written.
    pub files: usize,
    /// Errors recorded.
    pub errors: usize,
    /// URLs per second.
    pub average_rate: f64,
}

impl SourceSummary {
    fn from_source(source: &SourceResult) -> Self {
        Self {
            name: source.name.clone(),
            total_docs: source.total_docs,
            processed_docs: source.processed_docs,
            success_rate: source.success_rate(),
            elapsed_secs: source.elapsed.as_secs_f64(),
            files: source.generated_files.len(),
            errors: source.errors.len(),
            average_rate: source.rate(),
        }
    }
}

/// Aggregate view of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryReport {
    /// Number of sources in the run.
    pub total_sources: usize,
    /// Sources that finished without any error.
    pub successful_sources: usize,
    /// URLs written across sources.
    pub total_urls: u64,
    /// Files written across sources.
    pub total_files: usize,
    /// Run time in seconds.
    pub elapsed_secs: f64,
    /// Run-level success rate.
    pub success_rate: f64,
    /// URLs per second over the whole run.
    pub average_rate: f64,
    /// Global index, when written.
    pub global_index: Option<String>,
    /// One entry per source, in run order.
    pub sources: Vec<SourceSummary>,
    /// Source with the highest rate.
    pub fastest: Option<String>,
    /// Source with the lowest rate.
    pub slowest: Option<String>,
    /// Source with the most errors, if any had errors.
    pub most_errors: Option<String>,
}

impl SummaryReport {
    /// Summarise `result`.
    #[must_use]
    pub fn from_result(result: &ProcessingResult) -> Self {
        let sources: Vec<SourceSummary> = result.sources.iter().map(SourceSummary::from_source).collect();
        let elapsed_secs = result.elapsed.as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let average_rate = if elapsed_secs > 0.0 {
            result.total_urls as f64 / elapsed_secs
        } else {
            0.0
        };

        let fastest = sources
            .iter()
            .max_by(|a, b| a.average_rate.total_cmp(&b.average_rate))
            .map(|s| s.name.clone());
        let slowest = sources
            .iter()
            .min_by(|a, b| a.average_rate.total_cmp(&b.average_rate))
            .map(|s| s.name.clone());
        let most_errors = sources
            .iter()
            .filter(|s| s.errors > 0)
            .max_by_key(|s| s.errors)
            .map(|s| s.name.clone());

        Self {
            total_sources: sources.len(),
            successful_sources: result.sources.iter().filter(|s| !s.has_errors()).count(),
            total_urls: result.total_urls,
            total_files: result.total_files,
            elapsed_secs,
            success_rate: result.success_rate,
            average_rate,
            global_index: result
                .global_index
                .as_ref()
                .map(|p| p.display().to_string()),
            sources,
            fastest,
            slowest,
            most_errors,
        }
    }

    fn source(&self, name: &str) -> Option<&SourceSummary> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Plain-text rendering for terminals and logs.
    #[must_use]
    pub fn format_text(&self) -> String {
        let rule = "=".repeat(RULE_WIDTH);
        let section = "-".repeat(SECTION_WIDTH);
        let mut out = String::new();

        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "SITEMAP GENERATION SUMMARY");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Sources processed:   {}", self.total_sources);
        let _ = writeln!(out, "Successful sources:  {}", self.successful_sources);
        let _ = writeln!(out, "URLs generated:      {}", group_thousands(self.total_urls));
        let _ = writeln!(out, "Files created:       {}", self.total_files);
        let _ = writeln!(out, "Processing time:     {:.2}s", self.elapsed_secs);
        let _ = writeln!(out, "Success rate:        {:.1}%", self.success_rate);
        let _ = writeln!(out, "Average rate:        {:.1} URLs/s", self.average_rate);
        if let Some(index) = &self.global_index {
            let _ = writeln!(out, "Global index:        {index}");
        }

        if !self.sources.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "SOURCES");
            let _ = writeln!(out, "{section}");
            for source in &self.sources {
                let _ = writeln!(out, "{}", source.name);
                let _ = writeln!(
                    out,
                    "  Documents: {} / {} ({:.1}%)",
                    group_thousands(source.processed_docs),
                    group_thousands(source.total_docs),
                    source.success_rate
                );
                let _ = writeln!(out, "  Files:     {}", source.files);
                let _ = writeln!(out, "  Time:      {:.2}s", source.elapsed_secs);
                let _ = writeln!(out, "  Rate:      {:.1} docs/s", source.average_rate);
                if source.errors > 0 {
                    let _ = writeln!(out, "  Errors:    {}", source.errors);
                }
            }
        }

        if let Some(fastest) = self.fastest.as_deref().and_then(|n| self.source(n)) {
            let _ = writeln!(out);
            let _ = writeln!(out, "HIGHLIGHTS");
            let _ = writeln!(out, "{section}");
            let _ = writeln!(out, "Fastest:     {} ({:.1} docs/s)", fastest.name, fastest.average_rate);
            if let Some(slowest) = self.slowest.as_deref().and_then(|n| self.source(n)) {
                if slowest.name != fastest.name {
                    let _ = writeln!(out, "Slowest:     {} ({:.1} docs/s)", slowest.name, slowest.average_rate);
                }
            }
            if let Some(worst) = self.most_errors.as_deref().and_then(|n| self.source(n)) {
                let _ = writeln!(out, "Most errors: {} ({})", worst.name, worst.errors);
            }
        }
        let _ = write!(out, "{rule}");
        out
    }
}

/// Overall classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Every reported document was written.
    Success,
    /// Some documents were written.
    PartialSuccess,
    /// Nothing was written.
    Failure,
}

impl OutcomeStatus {
    /// Stable identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Failure => "failure",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error breakdown used to pick an exit status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeAnalysis {
    /// Overall classification.
    pub status: OutcomeStatus,
    /// Run-level success rate.
    pub success_rate: f64,
    /// Errors across all sources.
    pub total_errors: usize,
    /// Error counts keyed by category.
    pub error_categories: BTreeMap<String, usize>,
    /// Sources that recorded errors and wrote nothing.
    pub failed_sources: Vec<String>,
    /// Operator advice derived from the errors and timings.
    pub recommendations: Vec<String>,
}

impl OutcomeAnalysis {
    /// Analyse `result`.
    #[must_use]
    pub fn from_result(result: &ProcessingResult) -> Self {
        let attempted: u64 = result.sources.iter().map(|s| s.total_docs).sum();
        let status = if attempted > 0 && result.total_urls >= attempted {
            OutcomeStatus::Success
        } else if result.total_urls > 0 {
            OutcomeStatus::PartialSuccess
        } else {
            OutcomeStatus::Failure
        };

        let mut error_categories = BTreeMap::new();
        for error in result.sources.iter().flat_map(|s| &s.errors) {
            *error_categories.entry(error.category.clone()).or_insert(0) += 1;
        }

        let recommendations = recommendations(result, attempted, &error_categories);
        Self {
            status,
            success_rate: result.success_rate,
            total_errors: result.total_errors(),
            error_categories,
            failed_sources: result
                .sources
                .iter()
                .filter(|s| s.has_errors() && s.processed_docs == 0)
                .map(|s| s.name.clone())
                .collect(),
            recommendations,
        }
    }

    /// Errors recorded under `category`.
    #[must_use]
    pub fn count(&self, category: &str) -> usize {
        self.error_categories.get(category).copied().unwrap_or(0)
    }
}

fn recommendations(
    result: &ProcessingResult,
    attempted: u64,
    categories: &BTreeMap<String, usize>,
) -> Vec<String> {
    let seen = |names: &[&str]| names.iter().any(|n| categories.contains_key(*n));
    let mut advice = Vec::new();

    if seen(&["connection"]) {
        advice.push(
            "Check search core connectivity and network configuration. \
             Verify the cores are running and reachable."
                .to_string(),
        );
    }
    if seen(&["config", "validation"]) {
        advice.push(
            "Review the configuration for invalid settings. \
             Validate URL patterns, field names and source definitions."
                .to_string(),
        );
    }
    if seen(&["processing", "io"]) {
        advice.push(
            "Check system resources such as disk space and memory. \
             Consider smaller batch sizes or fewer parallel workers."
                .to_string(),
        );
    }

    if attempted > 0 {
        if result.success_rate < 50.0 {
            advice.push(
                "Success rate is critically low. \
                 Review the logs for systematic issues and rerun with --verbose."
                    .to_string(),
            );
        } else if result.success_rate < 90.0 {
            advice.push(
                "Success rate is below optimal. \
                 Review the failed sources and consider longer timeouts."
                    .to_string(),
            );
        }
    }

    if !result.sources.is_empty() {
        let total: Duration = result.sources.iter().map(|s| s.elapsed).sum();
        let sources = u32::try_from(result.sources.len()).unwrap_or(u32::MAX);
        if total / sources > SLOW_SOURCE {
            advice.push(
                "Processing time is high. \
                 Consider more parallel workers or cheaper source queries."
                    .to_string(),
            );
        }
    }
    advice
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

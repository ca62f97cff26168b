//! Thread-safe progress aggregation across sources.
//!
//! Every pipeline registers with the shared [`ProgressTracker`] and receives a
//! [`ProgressHandle`] for its updates. All counters live behind one mutex so
//! [`ProgressTracker::overall_snapshot`] always sees a consistent view.
//!
//! Per-source progress is logged at most once per log interval (5s by
//! default); the orchestrator logs the overall line on its own schedule.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

/// Minimum gap between two progress log lines of one source.
pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Stage of a source pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Registered, not started.
    Initializing,
    /// Probing the source.
    HealthCheck,
    /// Paging through documents.
    DocumentExtraction,
    /// Flushing the last files and building the index.
    SitemapGeneration,
    /// Finished; counters are frozen.
    Completed,
}

impl Phase {
    /// Identifier used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::HealthCheck => "health_check",
            Self::DocumentExtraction => "document_extraction",
            Self::SitemapGeneration => "sitemap_generation",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Source name.
    pub name: String,
    /// Current stage.
    pub phase: Phase,
    /// Items processed so far.
    pub processed: u64,
    /// Items expected.
    pub total: u64,
    /// Errors recorded.
    pub errors_count: u64,
    /// Items per second since registration.
    pub rate: f64,
    /// Linear estimate of the remaining time.
    pub eta: Option<Duration>,
    /// Time since registration.
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Completion in percent, capped at 100.
    #[must_use]
    pub fn percentage(&self) -> f64 {
        percentage(self.processed, self.total)
    }
}

/// Aggregate view across all registered sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallSnapshot {
    /// Registered sources.
    pub total_sources: usize,
    /// Sources marked complete.
    pub completed_sources: usize,
    /// Sources past initialization and not complete.
    pub active_sources: usize,
    /// Items processed across sources.
    pub processed: u64,
    /// Items expected across sources.
    pub total: u64,
    /// Errors across sources.
    pub errors_count: u64,
    /// Items per second since the tracker was created.
    pub rate: f64,
    /// Linear estimate of the remaining time.
    pub eta: Option<Duration>,
    /// Time since the tracker was created.
    pub elapsed: Duration,
}

impl OverallSnapshot {
    /// Completion in percent, capped at 100.
    #[must_use]
    pub fn percentage(&self) -> f64 {
        percentage(self.processed, self.total)
    }
}

#[derive(Debug)]
struct SourceProgress {
    started: Instant,
    processed: u64,
    total: u64,
    errors: u64,
    phase: Phase,
    last_log: Option<Instant>,
}

impl SourceProgress {
    fn snapshot(&self, name: &str) -> ProgressSnapshot {
        let elapsed = self.started.elapsed();
        let rate = rate(self.processed, elapsed);
        ProgressSnapshot {
            name: name.to_string(),
            phase: self.phase,
            processed: self.processed,
            total: self.total,
            errors_count: self.errors,
            rate,
            eta: eta(self.processed, self.total, rate),
            elapsed,
        }
    }
}

/// Shared progress registry for a run.
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    log_interval: Duration,
    sources: Mutex<BTreeMap<String, SourceProgress>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    /// Create an empty tracker with the default log interval.
    pub fn new() -> Self {
        Self::with_log_interval(DEFAULT_LOG_INTERVAL)
    }

    /// Create an empty tracker logging each source at most every `interval`.
    pub fn with_log_interval(interval: Duration) -> Self {
        Self {
            started: Instant::now(),
            log_interval: interval,
            sources: Mutex::new(BTreeMap::new()),
        }
    }

    /// Start tracking `name` with `total` expected items.
    ///
    /// Registering a name again restarts its counters.
    pub fn register_source(self: &Arc<Self>, name: &str, total: u64) -> ProgressHandle {
        self.lock().insert(
            name.to_string(),
            SourceProgress {
                started: Instant::now(),
                processed: 0,
                total,
                errors: 0,
                phase: Phase::Initializing,
                last_log: None,
            },
        );
        debug!(source = %name, total, "Source registered for progress tracking");
        ProgressHandle {
            tracker: Arc::clone(self),
            name: name.to_string(),
        }
    }

    /// Record progress for `name`. Ignored once the source is complete.
    pub fn update(&self, name: &str, processed: u64, total: Option<u64>, phase: Option<Phase>) {
        let due = {
            let mut sources = self.lock();
            let Some(progress) = sources.get_mut(name) else {
                return;
            };
            if progress.phase == Phase::Completed {
                return;
            }
            progress.processed = processed;
            if let Some(total) = total {
                progress.total = total;
            }
            if let Some(phase) = phase {
                progress.phase = phase;
            }

            let now = Instant::now();
            let due = progress
                .last_log
                .is_none_or(|at| now.duration_since(at) >= self.log_interval);
            if due {
                progress.last_log = Some(now);
            }
            due.then(|| progress.snapshot(name))
        };

        if let Some(snapshot) = due {
            info!(
                source = %name,
                phase = %snapshot.phase,
                processed = snapshot.processed,
                total = snapshot.total,
                percentage = format_args!("{:.1}%", snapshot.percentage()),
                rate = %format_rate(snapshot.rate),
                eta = %format_eta(snapshot.eta),
                "Source progress"
            );
        }
    }

    /// Count one error against `name`.
    pub fn add_error(&self, name: &str) {
        if let Some(progress) = self.lock().get_mut(name) {
            if progress.phase != Phase::Completed {
                progress.errors += 1;
            }
        }
    }

    /// Mark `name` complete and freeze its counters.
    pub fn complete(&self, name: &str) {
        let snapshot = {
            let mut sources = self.lock();
            let Some(progress) = sources.get_mut(name) else {
                return;
            };
            if progress.phase == Phase::Completed {
                return;
            }
            progress.phase = Phase::Completed;
            progress.snapshot(name)
        };
        info!(
            source = %name,
            processed = snapshot.processed,
            elapsed = format_args!("{:.2}s", snapshot.elapsed.as_secs_f64()),
            rate = %format_rate(snapshot.rate),
            errors = snapshot.errors_count,
            "Source completed"
        );
    }

    /// View of one source.
    pub fn snapshot(&self, name: &str) -> Option<ProgressSnapshot> {
        self.lock().get(name).map(|p| p.snapshot(name))
    }

    /// Views of every source, sorted by name.
    pub fn snapshots(&self) -> Vec<ProgressSnapshot> {
        self.lock()
            .iter()
            .map(|(name, progress)| progress.snapshot(name))
            .collect()
    }

    /// Consistent aggregate across all sources.
    pub fn overall_snapshot(&self) -> OverallSnapshot {
        let sources = self.lock();
        let processed = sources.values().map(|p| p.processed).sum();
        let total = sources.values().map(|p| p.total).sum();
        let errors_count = sources.values().map(|p| p.errors).sum();
        let completed_sources = sources
            .values()
            .filter(|p| p.phase == Phase::Completed)
            .count();
        let active_sources = sources
            .values()
            .filter(|p| !matches!(p.phase, Phase::Completed | Phase::Initializing))
            .count();
        let elapsed = self.started.elapsed();
        let rate = rate(processed, elapsed);
        OverallSnapshot {
            total_sources: sources.len(),
            completed_sources,
            active_sources,
            processed,
            total,
            errors_count,
            rate,
            eta: eta(processed, total, rate),
            elapsed,
        }
    }

    /// Emit one aggregate progress line.
    pub fn log_overall(&self) {
        let overall = self.overall_snapshot();
        info!(
            sources_completed = format_args!("{}/{}", overall.completed_sources, overall.total_sources),
            active = overall.active_sources,
            processed = overall.processed,
            total = overall.total,
            percentage = format_args!("{:.1}%", overall.percentage()),
            rate = %format_rate(overall.rate),
            eta = %format_eta(overall.eta),
            elapsed = format_args!("{:.1}s", overall.elapsed.as_secs_f64()),
            errors = overall.errors_count,
            "Overall progress"
        );
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, SourceProgress>> {
        self.sources.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Update handle bound to one source.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    tracker: Arc<ProgressTracker>,
    name: String,
}

impl ProgressHandle {
    /// Source this handle reports for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record `processed` items.
    pub fn update(&self, processed: u64) {
        self.tracker.update(&self.name, processed, None, None);
    }

    /// Record `processed` items and a new total.
    pub fn update_with_total(&self, processed: u64, total: u64) {
        self.tracker.update(&self.name, processed, Some(total), None);
    }

    /// Move to `phase` keeping the counters.
    pub fn set_phase(&self, phase: Phase) {
        let processed = self.snapshot().map_or(0, |s| s.processed);
        self.tracker.update(&self.name, processed, None, Some(phase));
    }

    /// Count one error.
    pub fn add_error(&self) {
        self.tracker.add_error(&self.name);
    }

    /// Mark the source complete.
    pub fn complete(&self) {
        self.tracker.complete(&self.name);
    }

    /// Current view of this source.
    pub fn snapshot(&self) -> Option<ProgressSnapshot> {
        self.tracker.snapshot(&self.name)
    }
}

/// Human readable rate: `0.50/s`, `12.0/s`, `1.5k/s`.
pub fn format_rate(rate: f64) -> String {
    if rate < 1.0 {
        format!("{rate:.2}/s")
    } else if rate < 1000.0 {
        format!("{rate:.1}/s")
    } else {
        format!("{:.1}k/s", rate / 1000.0)
    }
}

/// Human readable ETA: `45s`, `2.5m`, `1.2h`, or `Unknown`.
pub fn format_eta(eta: Option<Duration>) -> String {
    let Some(eta) = eta else {
        return "Unknown".to_string();
    };
    let secs = eta.as_secs_f64();
    if secs < 60.0 {
        format!("{secs:.0}s")
    } else if secs < 3600.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

#[allow(clippy::cast_precision_loss)] // Precision loss acceptable for progress display
fn rate(processed: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        processed as f64 / secs
    } else {
        0.0
    }
}

#[allow(clippy::cast_precision_loss)]
fn eta(processed: u64, total: u64, rate: f64) -> Option<Duration> {
    if rate <= 0.0 || total == 0 {
        return None;
    }
    let remaining = total.saturating_sub(processed) as f64;
    Duration::try_from_secs_f64(remaining / rate).ok()
}

#[allow(clippy::cast_precision_loss)]
fn percentage(processed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        ((processed as f64 / total as f64) * 100.0).min(100.0)
    }
}

//! Run coordination across sources.
//!
//! [`Orchestrator::run`] processes every configured source with at most
//! `processing.parallel_workers` pipelines active at once. Each pipeline runs
//! in its own task, so a failing or panicking source only affects its own
//! [`SourceResult`]. Once every source has finished, a global index over all
//! data sitemaps is written when enabled.
//!
//! ```rust,no_run
//! use sitemapper_core::{AppConfig, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> sitemapper_core::Result<()> {
//! let config = AppConfig::load("sitemapper.toml".as_ref())?;
//! let result = Orchestrator::new(config).run(CancellationToken::new()).await?;
//! println!("{} URLs in {} files", result.total_urls, result.total_files);
//! # Ok(())
//! # }
//! ```

mod pipeline;
mod policy;

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

pub use self::policy::{BatchRetryPolicy, HealthCheckPolicy};
use self::pipeline::SourcePipeline;
use crate::circuit_breaker::CircuitBreakerManager;
use crate::client::{HttpConnector, SourceConnector};
use crate::config::{AppConfig, SourceConfig};
use crate::progress::ProgressTracker;
use crate::sitemap::SitemapAssembler;
use crate::types::{ProcessingResult, SourceError, SourceResult};
use crate::Result;

/// Interval of the aggregate progress line while a run is active.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

/// Coordinates the pipelines of one run.
pub struct Orchestrator {
    config: AppConfig,
    connector: Arc<dyn SourceConnector>,
    breakers: Arc<CircuitBreakerManager>,
    progress: Arc<ProgressTracker>,
    health_policy: HealthCheckPolicy,
    retry_policy: BatchRetryPolicy,
    progress_interval: Duration,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("sources", &self.config.sources.len())
            .field("workers", &self.workers())
            .field("health_policy", &self.health_policy)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator talking HTTP to the configured sources.
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        Self::with_connector(config, Arc::new(HttpConnector))
    }

    /// Orchestrator using `connector` to reach sources.
    #[must_use]
    pub fn with_connector(config: AppConfig, connector: Arc<dyn SourceConnector>) -> Self {
        let breakers = Arc::new(CircuitBreakerManager::new(config.default_breaker()));
        Self {
            config,
            connector,
            breakers,
            progress: Arc::new(ProgressTracker::new()),
            health_policy: HealthCheckPolicy::default(),
            retry_policy: BatchRetryPolicy::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Replace the health check retry policy.
    #[must_use]
    pub const fn with_health_check_policy(mut self, policy: HealthCheckPolicy) -> Self {
        self.health_policy = policy;
        self
    }

    /// Replace the reduced-batch retry policy.
    #[must_use]
    pub const fn with_batch_retry_policy(mut self, policy: BatchRetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Change how often aggregate progress is logged.
    #[must_use]
    pub const fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Configuration this orchestrator runs.
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Breakers of the sources seen so far.
    pub fn breakers(&self) -> &CircuitBreakerManager {
        &self.breakers
    }

    /// Live progress of the current or last run.
    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Effective number of concurrent pipelines.
    pub fn workers(&self) -> usize {
        self.config.processing.parallel_workers.max(1)
    }

    /// Process every source and write the global index.
    ///
    /// Per-source failures are reported inside the returned result. Once
    /// `shutdown` fires, queued sources are not started and running ones stop
    /// after their current batch, keeping what they already wrote.
    ///
    /// # Errors
    ///
    /// Fails only when the output directory cannot be created or the global
    /// index cannot be written.
    #[instrument(skip_all, fields(sources = self.config.sources.len(), workers = self.workers()))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<ProcessingResult> {
        let started = Instant::now();
        let assembler = SitemapAssembler::new(self.config.sitemap.clone());
        assembler.prepare_output_dir().await?;
        info!(
            output_dir = %self.config.sitemap.output_dir.display(),
            test_mode = self.config.processing.test_mode,
            "Starting sitemap generation"
        );

        let pipeline = Arc::new(self.pipeline(assembler.clone()));
        let ticker_stop = CancellationToken::new();
        let ticker = tokio::spawn(log_progress_periodically(
            Arc::clone(&self.progress),
            self.progress_interval,
            ticker_stop.clone(),
        ));

        let workers = self.workers();
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut sources: Vec<(usize, SourceResult)> =
            stream::iter(self.config.sources.iter().cloned().enumerate())
                .map(|(index, source)| {
                    let pipeline = Arc::clone(&pipeline);
                    let semaphore = Arc::clone(&semaphore);
                    let shutdown = shutdown.clone();
                    async move {
                        let _permit = semaphore.acquire().await;
                        (index, spawn_source(pipeline, source, shutdown).await)
                    }
                })
                .buffer_unordered(workers)
                .collect()
                .await;
        sources.sort_by_key(|(index, _)| *index);
        let sources: Vec<SourceResult> = sources.into_iter().map(|(_, result)| result).collect();

        ticker_stop.cancel();
        if let Err(e) = ticker.await {
            warn!(error = %e, "Progress logger ended abnormally");
        }
        self.progress.log_overall();

        let mut result = ProcessingResult::from_sources(sources, started.elapsed());
        result.cancelled = shutdown.is_cancelled();
        self.log_breaker_summary();

        if self.config.sitemap.global_index && result.total_files > 0 {
            let files: Vec<_> = result.all_files().cloned().collect();
            let index = assembler.write_global_index(&files).await?;
            info!(path = %index.display(), "Global sitemap index written");
            result.global_index = Some(index);
        }
        result.elapsed = started.elapsed();

        info!(
            total_urls = result.total_urls,
            total_files = result.total_files,
            errors = result.total_errors(),
            success_rate = format_args!("{:.1}%", result.success_rate),
            elapsed = format_args!("{:.2}s", result.elapsed.as_secs_f64()),
            cancelled = result.cancelled,
            "Sitemap generation finished"
        );
        Ok(result)
    }

    fn pipeline(&self, assembler: SitemapAssembler) -> SourcePipeline {
        SourcePipeline {
            connector: Arc::clone(&self.connector),
            assembler,
            breakers: Arc::clone(&self.breakers),
            progress: Arc::clone(&self.progress),
            health_policy: self.health_policy,
            retry_policy: self.retry_policy,
            test_mode: self.config.processing.test_mode,
        }
    }

    fn log_breaker_summary(&self) {
        let stats = self.breakers.all_stats();
        let failed = self.breakers.failed_sources();
        info!(
            breakers = stats.len(),
            healthy = self.breakers.healthy_sources().len(),
            open = failed.len(),
            "Circuit breaker summary"
        );
        if !failed.is_empty() {
            warn!(sources = ?failed, "Sources with open circuit breakers");
        }
    }
}

/// Run one source in its own task so a panic stays contained.
async fn spawn_source(
    pipeline: Arc<SourcePipeline>,
    source: SourceConfig,
    shutdown: CancellationToken,
) -> SourceResult {
    let name = source.name.clone();
    if shutdown.is_cancelled() {
        info!(source = %name, "Shutdown requested, source not started");
        return SourceResult::failed(
            name,
            SourceError::new("cancelled", "Source not processed: shutdown requested"),
        );
    }

    let handle = tokio::spawn(async move { pipeline.run(&source, &shutdown).await });
    match handle.await {
        Ok(result) => result,
        Err(e) => {
            error!(source = %name, error = %e, "Source pipeline aborted");
            SourceResult::failed(
                name,
                SourceError::new("processing", format!("Processing failed: {e}")),
            )
        },
    }
}

async fn log_progress_periodically(
    progress: Arc<ProgressTracker>,
    every: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => progress.log_overall(),
        }
    }
}

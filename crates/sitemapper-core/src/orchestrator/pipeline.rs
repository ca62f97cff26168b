//! The per-source pipeline: probe, count, extract and assemble.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::policy::{BatchRetryPolicy, HealthCheckPolicy};
use crate::circuit_breaker::CircuitBreakerManager;
use crate::client::{DocumentSource, SourceConnector};
use crate::config::SourceConfig;
use crate::progress::{Phase, ProgressHandle, ProgressTracker};
use crate::sitemap::SitemapAssembler;
use crate::types::{Record, SitemapEntry, SourceError, SourceResult};
use crate::url_builder::UrlBuilder;

/// Everything a pipeline needs, shared by all sources of a run.
pub(crate) struct SourcePipeline {
    pub(crate) connector: Arc<dyn SourceConnector>,
    pub(crate) assembler: SitemapAssembler,
    pub(crate) breakers: Arc<CircuitBreakerManager>,
    pub(crate) progress: Arc<ProgressTracker>,
    pub(crate) health_policy: HealthCheckPolicy,
    pub(crate) retry_policy: BatchRetryPolicy,
    pub(crate) test_mode: bool,
}

/// What the extraction half of a pipeline observed.
#[derive(Debug, Default)]
struct Extraction {
    emitted: u64,
    failed_docs: u64,
    errors: Vec<SourceError>,
}

impl SourcePipeline {
    /// Run one source to completion. Never fails; problems land in `errors`.
    #[instrument(skip_all, fields(source = %source.name))]
    pub(crate) async fn run(&self, source: &SourceConfig, shutdown: &CancellationToken) -> SourceResult {
        let started = Instant::now();
        let progress = self.progress.register_source(&source.name, 0);
        let mut result = SourceResult::new(&source.name);
        info!(url = %source.url, "Starting source processing");

        self.run_steps(source, shutdown, &progress, &mut result).await;

        progress.complete();
        result.elapsed = started.elapsed();
        info!(
            total = result.total_docs,
            processed = result.processed_docs,
            failed = result.failed_docs,
            files = result.generated_files.len(),
            errors = result.errors.len(),
            elapsed = format_args!("{:.2}s", result.elapsed.as_secs_f64()),
            "Source processing finished"
        );
        result
    }

    async fn run_steps(
        &self,
        source: &SourceConfig,
        shutdown: &CancellationToken,
        progress: &ProgressHandle,
        result: &mut SourceResult,
    ) {
        let builder = match UrlBuilder::new(&source.url_pattern) {
            Ok(builder) => builder,
            Err(e) => {
                error!(error = %e, "Invalid URL pattern");
                record(result, progress, SourceError::from_error("Invalid URL pattern", &e));
                return;
            },
        };
        let breaker = self.breakers.get(&source.name, source.circuit_breaker);
        let client = match self.connector.connect(source, breaker, self.test_mode) {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "Failed to create source client");
                record(result, progress, SourceError::from_error("Client setup failed", &e));
                return;
            },
        };

        progress.set_phase(Phase::HealthCheck);
        if let Err(e) = self
            .health_policy
            .run(&source.name, || client.health_check())
            .await
        {
            warn!(error = %e, "Health check failed after retries, continuing anyway");
            record(result, progress, SourceError::from_error("Health check failed", &e));
        }

        let total = match client.total_count(&source.id_field).await {
            Ok(total) => total,
            Err(e) => {
                error!(error = %e, "Failed to get document count");
                record(result, progress, SourceError::from_error("Failed to get document count", &e));
                return;
            },
        };
        result.total_docs = total;
        progress.update_with_total(0, total);
        if total == 0 {
            warn!("Source reports no documents");
            return;
        }
        info!(total, "Documents to process");

        progress.set_phase(Phase::DocumentExtraction);
        let (tx, rx) = mpsc::channel(source.batch_size.max(1));
        let producer = self.extract(source, client.as_ref(), &builder, total, tx, progress, shutdown);
        let consumer = self.assembler.assemble(&source.name, rx);
        let (extraction, assembled) = tokio::join!(producer, consumer);

        result.failed_docs = extraction.failed_docs;
        result.errors.extend(extraction.errors);
        match assembled {
            Ok(assembled) => {
                result.processed_docs = assembled.url_count;
                result.generated_files = assembled.files;
                progress.update(assembled.url_count);
            },
            Err(e) => {
                error!(error = %e, "Sitemap generation failed");
                record(result, progress, SourceError::from_error("Sitemap generation failed", &e));
            },
        }
    }

    /// Page through the source and feed entries to the assembler.
    ///
    /// `tx` is dropped on return, which lets the assembler finish.
    #[allow(clippy::too_many_arguments)]
    async fn extract(
        &self,
        source: &SourceConfig,
        client: &dyn DocumentSource,
        builder: &UrlBuilder,
        total: u64,
        tx: mpsc::Sender<SitemapEntry>,
        progress: &ProgressHandle,
        shutdown: &CancellationToken,
    ) -> Extraction {
        let batch_size = source.batch_size.max(1);
        let mut state = Extraction::default();
        let mut offset: u64 = 0;

        loop {
            if shutdown.is_cancelled() {
                warn!(offset, "Shutdown requested, stopping extraction");
                state.errors.push(SourceError::new(
                    "cancelled",
                    format!("Extraction cancelled at offset {offset}"),
                ));
                break;
            }

            match client
                .fetch_batch(&source.id_field, &source.date_field, offset, batch_size)
                .await
            {
                Ok(records) => {
                    if records.is_empty() {
                        break;
                    }
                    let received = records.len();
                    if !self.emit(source, builder, records, &tx, progress, &mut state).await {
                        break;
                    }
                    offset += received as u64;
                    progress.update(state.emitted);
                    debug!(offset, received, "Batch processed");
                    if received < batch_size {
                        break;
                    }
                },
                Err(e) => {
                    error!(offset, error = %e, "Batch fetch failed");
                    progress.add_error();
                    if !e.is_connection() {
                        state.errors.push(SourceError::from_error(
                            &format!("Extraction stopped at offset {offset}"),
                            &e,
                        ));
                        break;
                    }

                    let mut last_error = e;
                    if let Some(reduced) = self.retry_policy.reduced_batch(&last_error, offset, batch_size) {
                        info!(offset, reduced, "Retrying timed out batch with smaller window");
                        match client
                            .fetch_batch(&source.id_field, &source.date_field, offset, reduced)
                            .await
                        {
                            Ok(records) if records.is_empty() => break,
                            Ok(records) => {
                                let received = records.len();
                                if !self.emit(source, builder, records, &tx, progress, &mut state).await {
                                    break;
                                }
                                offset += received as u64;
                                progress.update(state.emitted);
                                continue;
                            },
                            Err(retry_error) => {
                                error!(offset, error = %retry_error, "Reduced batch retry failed");
                                progress.add_error();
                                last_error = retry_error;
                            },
                        }
                    }

                    let skipped_to = offset + batch_size as u64;
                    warn!(offset, skipped_to, "Skipping unreadable window");
                    state.errors.push(SourceError::from_error(
                        &format!("Skipped documents {offset}..{skipped_to}"),
                        &last_error,
                    ));
                    offset = skipped_to;
                    if offset >= total {
                        break;
                    }
                },
            }
        }

        progress.set_phase(Phase::SitemapGeneration);
        if state.failed_docs > 0 {
            state.errors.push(SourceError::new(
                "validation",
                format!("{} documents could not be converted to URLs", state.failed_docs),
            ));
        }
        info!(
            emitted = state.emitted,
            failed = state.failed_docs,
            "Document extraction finished"
        );
        state
    }

    /// Convert records to entries and send them on.
    ///
    /// Returns `false` once the assembler has stopped listening.
    async fn emit(
        &self,
        source: &SourceConfig,
        builder: &UrlBuilder,
        records: Vec<Record>,
        tx: &mpsc::Sender<SitemapEntry>,
        progress: &ProgressHandle,
        state: &mut Extraction,
    ) -> bool {
        for record in records {
            let url = match builder.build(&record.id) {
                Ok(url) => url,
                Err(e) => {
                    warn!(doc_id = %record.id, error = %e, "Failed to build URL for document");
                    state.failed_docs += 1;
                    progress.add_error();
                    continue;
                },
            };
            let entry = SitemapEntry {
                url,
                lastmod: record.last_modified,
                changefreq: source.changefreq,
            };
            if tx.send(entry).await.is_err() {
                warn!("Sitemap writer stopped, abandoning extraction");
                return false;
            }
            state.emitted += 1;
        }
        true
    }
}

fn record(result: &mut SourceResult, progress: &ProgressHandle, error: SourceError) {
    progress.add_error();
    result.errors.push(error);
}

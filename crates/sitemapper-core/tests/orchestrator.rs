#![allow(clippy::unwrap_used, clippy::panic, clippy::expect_used)]

//! End-to-end runs of the orchestrator against in-memory sources.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use sitemapper_core::{
    AppConfig, CircuitBreaker, ConnectionKind, DocumentSource, Error, HealthCheckPolicy,
    Orchestrator, Record, Result, SitemapConfig, SourceConfig, SourceConnector,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Gauge {
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Records when each source's pipeline first reached it.
struct StartLog {
    origin: std::time::Instant,
    starts: Mutex<Vec<(String, Duration)>>,
}

impl StartLog {
    fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
            starts: Mutex::new(Vec::new()),
        }
    }

    fn started_at(&self, name: &str) -> Duration {
        self.starts
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, at)| *at)
            .expect("source started")
    }
}

/// Scripted document source with sorted ids.
#[derive(Default)]
struct MemorySource {
    ids: Vec<String>,
    failing_health_checks: AtomicU32,
    fail_count: bool,
    /// One-shot failures keyed by `(offset, limit)`.
    fetch_failures: Mutex<Vec<(u64, usize, ConnectionKind)>>,
    fetches: Mutex<Vec<(u64, usize)>>,
    delay: Duration,
    gauge: Option<Arc<Gauge>>,
    start_log: Option<(String, Arc<StartLog>)>,
    panic_on_fetch: bool,
}

impl MemorySource {
    fn with_docs(count: usize) -> Self {
        Self {
            ids: (0..count).map(|i| format!("doc-{i:06}")).collect(),
            ..Self::default()
        }
    }

    fn with_ids(ids: &[&str]) -> Self {
        Self {
            ids: ids.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    fn failing_at(self, offset: u64, limit: usize, kind: ConnectionKind) -> Self {
        self.fetch_failures.lock().unwrap().push((offset, limit, kind));
        self
    }

    fn fetch_log(&self) -> Vec<(u64, usize)> {
        self.fetches.lock().unwrap().clone()
    }

    async fn pause(&self) {
        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(gauge) = &self.gauge {
            gauge.leave();
        }
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn health_check(&self) -> Result<()> {
        if let Some((name, log)) = &self.start_log {
            log.starts.lock().unwrap().push((name.clone(), log.origin.elapsed()));
        }
        self.pause().await;
        let remaining = self.failing_health_checks.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_health_checks.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::connection(ConnectionKind::Transport, "ping refused"));
        }
        Ok(())
    }

    async fn total_count(&self, _id_field: &str) -> Result<u64> {
        if self.fail_count {
            return Err(Error::connection(ConnectionKind::Protocol, "HTTP 500 from select"));
        }
        Ok(self.ids.len() as u64)
    }

    async fn fetch_batch(
        &self,
        _id_field: &str,
        _date_field: &str,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Record>> {
        self.fetches.lock().unwrap().push((offset, limit));
        self.pause().await;
        if self.panic_on_fetch {
            panic!("index segment corrupted at offset {offset}");
        }
        let scripted = {
            let mut failures = self.fetch_failures.lock().unwrap();
            failures
                .iter()
                .position(|(o, l, _)| *o == offset && *l == limit)
                .map(|i| failures.remove(i).2)
        };
        if let Some(kind) = scripted {
            return Err(Error::connection(kind, format!("scripted failure at {offset}")));
        }
        let start = usize::try_from(offset).unwrap().min(self.ids.len());
        let end = (start + limit).min(self.ids.len());
        Ok(self.ids[start..end]
            .iter()
            .map(|id| Record::new(id.clone(), None))
            .collect())
    }
}

#[derive(Default)]
struct MemoryConnector {
    sources: HashMap<String, Arc<MemorySource>>,
}

impl MemoryConnector {
    fn with(mut self, name: &str, source: MemorySource) -> Self {
        self.sources.insert(name.to_string(), Arc::new(source));
        self
    }

    fn source(&self, name: &str) -> Arc<MemorySource> {
        Arc::clone(&self.sources[name])
    }
}

impl SourceConnector for MemoryConnector {
    fn connect(
        &self,
        source: &SourceConfig,
        _breaker: Arc<CircuitBreaker>,
        _test_mode: bool,
    ) -> Result<Arc<dyn DocumentSource>> {
        self.sources
            .get(&source.name)
            .map(|s| Arc::clone(s) as Arc<dyn DocumentSource>)
            .ok_or_else(|| Error::Config(format!("unknown source {}", source.name)))
    }
}

fn source_config(name: &str, batch_size: usize) -> SourceConfig {
    let mut source = SourceConfig::new(
        name,
        format!("http://solr.test/solr/{name}"),
        format!("https://www.example.com/{name}/{{id}}"),
    );
    source.batch_size = batch_size;
    source
}

fn app_config(dir: &TempDir, sources: Vec<SourceConfig>, workers: usize, compress: bool) -> AppConfig {
    let mut sitemap = SitemapConfig::new(dir.path());
    sitemap.compress = compress;
    let mut config = AppConfig::new(sources, sitemap);
    config.processing.parallel_workers = workers;
    config
}

fn orchestrator(config: AppConfig, connector: Arc<MemoryConnector>) -> Orchestrator {
    Orchestrator::with_connector(config, connector).with_health_check_policy(HealthCheckPolicy {
        max_attempts: 3,
        initial_delay: Duration::ZERO,
        multiplier: 1.0,
    })
}

fn file_names(paths: &[std::path::PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_sources_split_and_index() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let connector = Arc::new(
        MemoryConnector::default()
            .with("a", MemorySource::with_docs(0))
            .with("b", MemorySource::with_docs(5))
            .with("c", MemorySource::with_docs(120_000)),
    );
    let config = app_config(
        &dir,
        vec![source_config("a", 10_000), source_config("b", 10_000), source_config("c", 10_000)],
        2,
        false,
    );

    let result = orchestrator(config, Arc::clone(&connector))
        .run(CancellationToken::new())
        .await?;

    let by_name: Vec<&str> = result.sources.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(by_name, ["a", "b", "c"]);

    let a = &result.sources[0];
    assert_eq!(a.total_docs, 0);
    assert!(a.generated_files.is_empty());
    assert!(a.errors.is_empty());

    let b = &result.sources[1];
    assert_eq!(b.processed_docs, 5);
    assert_eq!(file_names(&b.generated_files), ["sitemap_b.xml"]);

    let c = &result.sources[2];
    assert_eq!(c.processed_docs, 120_000);
    assert_eq!(
        file_names(&c.generated_files),
        ["sitemap_index_c.xml", "sitemap_c_1.xml", "sitemap_c_2.xml", "sitemap_c_3.xml"]
    );
    // 12 full batches and one empty read.
    assert_eq!(connector.source("c").fetch_log().len(), 13);

    let first = read(&c.generated_files[1]);
    assert_eq!(first.matches("<url>").count(), 50_000);
    assert!(first.contains("<loc>https://www.example.com/c/doc-000000</loc>"));
    assert!(first.contains("<changefreq>weekly</changefreq>"));
    assert_eq!(read(&c.generated_files[3]).matches("<url>").count(), 20_000);
    assert!(read(&c.generated_files[3]).contains("doc-119999"));
    assert_eq!(read(&c.generated_files[0]).matches("<sitemap>").count(), 3);

    assert_eq!(result.total_urls, 120_005);
    assert_eq!(result.total_files, 5);
    assert!((result.success_rate - 100.0).abs() < f64::EPSILON);
    assert!(!result.cancelled);

    let global = result.global_index.clone().expect("global index");
    assert_eq!(global, dir.path().join("sitemap.xml"));
    let index = read(&global);
    assert_eq!(index.matches("<sitemap>").count(), 4);
    assert!(!index.contains("sitemap_index_c.xml"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_limit_bounds_active_pipelines() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let gauge = Arc::new(Gauge::default());
    let mut connector = MemoryConnector::default();
    let mut sources = Vec::new();
    for n in 0..5 {
        let name = format!("s{n}");
        let source = MemorySource {
            delay: Duration::from_millis(40),
            gauge: Some(Arc::clone(&gauge)),
            ..MemorySource::with_docs(3)
        };
        connector = connector.with(&name, source);
        sources.push(source_config(&name, 10));
    }

    let result = orchestrator(app_config(&dir, sources, 2, false), Arc::new(connector))
        .run(CancellationToken::new())
        .await?;

    assert_eq!(result.sources.len(), 5);
    assert_eq!(result.total_urls, 15);
    let max = gauge.max_active.load(Ordering::SeqCst);
    assert!(max <= 2, "saw {max} active pipelines");
    assert!(max >= 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_source_does_not_hold_back_later_sources() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let log = Arc::new(StartLog::new());
    let timed = |name: &str, delay: Duration| MemorySource {
        delay,
        start_log: Some((name.to_string(), Arc::clone(&log))),
        ..MemorySource::with_docs(1)
    };
    let connector = Arc::new(
        MemoryConnector::default()
            .with("slow", timed("slow", Duration::from_millis(800)))
            .with("fast1", timed("fast1", Duration::from_millis(10)))
            .with("fast2", timed("fast2", Duration::from_millis(10))),
    );
    let config = app_config(
        &dir,
        vec![source_config("slow", 10), source_config("fast1", 10), source_config("fast2", 10)],
        2,
        false,
    );

    let result = orchestrator(config, connector).run(CancellationToken::new()).await?;

    let fast2 = log.started_at("fast2");
    assert!(
        fast2 < Duration::from_millis(500),
        "fast2 waited {fast2:?} for a free worker"
    );
    let by_name: Vec<&str> = result.sources.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(by_name, ["slow", "fast1", "fast2"]);
    assert_eq!(result.total_urls, 3);
    Ok(())
}

#[tokio::test]
async fn test_pagination_reads_until_empty_batch() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let connector = Arc::new(
        MemoryConnector::default()
            .with("exact", MemorySource::with_docs(30))
            .with("short", MemorySource::with_docs(25)),
    );
    let config = app_config(
        &dir,
        vec![source_config("exact", 10), source_config("short", 10)],
        1,
        false,
    );

    let result = orchestrator(config, Arc::clone(&connector))
        .run(CancellationToken::new())
        .await?;

    assert_eq!(
        connector.source("exact").fetch_log(),
        [(0, 10), (10, 10), (20, 10), (30, 10)]
    );
    assert_eq!(connector.source("short").fetch_log(), [(0, 10), (10, 10), (20, 10)]);
    assert_eq!(result.total_urls, 55);
    Ok(())
}

#[tokio::test]
async fn test_early_timeout_retries_with_smaller_batch() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let connector = Arc::new(MemoryConnector::default().with(
        "docs",
        MemorySource::with_docs(1000).failing_at(0, 200, ConnectionKind::Timeout),
    ));
    let config = app_config(&dir, vec![source_config("docs", 200)], 1, false);

    let result = orchestrator(config, Arc::clone(&connector))
        .run(CancellationToken::new())
        .await?;

    assert_eq!(
        connector.source("docs").fetch_log(),
        [(0, 200), (0, 100), (100, 200), (300, 200), (500, 200), (700, 200), (900, 200)]
    );
    let docs = &result.sources[0];
    assert_eq!(docs.processed_docs, 1000);
    assert!(docs.errors.is_empty(), "{:?}", docs.errors);
    Ok(())
}

#[tokio::test]
async fn test_failed_window_is_skipped_and_reported() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let connector = Arc::new(MemoryConnector::default().with(
        "docs",
        MemorySource::with_docs(1000)
            .failing_at(400, 200, ConnectionKind::Transport)
            // Past the early window, so a timeout is not retried either.
            .failing_at(800, 200, ConnectionKind::Timeout),
    ));
    let config = app_config(&dir, vec![source_config("docs", 200)], 1, false);

    let result = orchestrator(config, Arc::clone(&connector))
        .run(CancellationToken::new())
        .await?;

    assert_eq!(
        connector.source("docs").fetch_log(),
        [(0, 200), (200, 200), (400, 200), (600, 200), (800, 200)]
    );
    let docs = &result.sources[0];
    assert_eq!(docs.total_docs, 1000);
    assert_eq!(docs.processed_docs, 600);
    assert_eq!(docs.errors.len(), 2);
    assert!(docs.errors[0].message.contains("Skipped documents 400..600"));
    assert!(docs.errors[1].message.contains("Skipped documents 800..1000"));
    assert!(docs.errors.iter().all(|e| e.category == "connection"));
    Ok(())
}

#[tokio::test]
async fn test_unconvertible_documents_are_counted() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let connector = Arc::new(
        MemoryConnector::default().with("docs", MemorySource::with_ids(&["a", "", "b", "  ", "c d"])),
    );
    let config = app_config(&dir, vec![source_config("docs", 10)], 1, false);

    let result = orchestrator(config, connector).run(CancellationToken::new()).await?;

    let docs = &result.sources[0];
    assert_eq!(docs.processed_docs, 3);
    assert_eq!(docs.failed_docs, 2);
    assert_eq!(docs.errors.len(), 1);
    assert_eq!(docs.errors[0].category, "validation");
    let xml = read(&docs.generated_files[0]);
    assert!(xml.contains("<loc>https://www.example.com/docs/c%20d</loc>"));
    Ok(())
}

#[tokio::test]
async fn test_blank_id_in_full_batch_keeps_paging() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let connector = Arc::new(
        MemoryConnector::default().with("docs", MemorySource::with_ids(&["a", "  ", "b", "c", "d"])),
    );
    let config = app_config(&dir, vec![source_config("docs", 3)], 1, false);

    let result = orchestrator(config, Arc::clone(&connector))
        .run(CancellationToken::new())
        .await?;

    assert_eq!(connector.source("docs").fetch_log(), [(0, 3), (3, 3)]);
    let docs = &result.sources[0];
    assert_eq!(docs.processed_docs, 4);
    assert_eq!(docs.failed_docs, 1);
    assert_eq!(docs.errors[0].category, "validation");
    Ok(())
}

#[tokio::test]
async fn test_unhealthy_source_is_still_extracted() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let source = MemorySource {
        failing_health_checks: AtomicU32::new(10),
        ..MemorySource::with_docs(4)
    };
    let connector = Arc::new(MemoryConnector::default().with("docs", source));
    let config = app_config(&dir, vec![source_config("docs", 10)], 1, false);

    let result = orchestrator(config, connector).run(CancellationToken::new()).await?;

    let docs = &result.sources[0];
    assert_eq!(docs.processed_docs, 4);
    assert_eq!(docs.errors.len(), 1);
    assert!(docs.errors[0].message.starts_with("Health check failed"));
    Ok(())
}

#[tokio::test]
async fn test_count_failure_ends_source_only() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let broken = MemorySource {
        fail_count: true,
        ..MemorySource::with_docs(10)
    };
    let connector = Arc::new(
        MemoryConnector::default()
            .with("broken", broken)
            .with("fine", MemorySource::with_docs(10)),
    );
    let config = app_config(
        &dir,
        vec![source_config("broken", 5), source_config("fine", 5)],
        2,
        false,
    );

    let result = orchestrator(config, Arc::clone(&connector))
        .run(CancellationToken::new())
        .await?;

    let broken = &result.sources[0];
    assert_eq!(broken.total_docs, 0);
    assert!(broken.generated_files.is_empty());
    assert!(broken.errors[0].message.starts_with("Failed to get document count"));
    assert!(connector.source("broken").fetch_log().is_empty());
    assert_eq!(result.sources[1].processed_docs, 10);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_run_starts_no_source() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let connector = Arc::new(
        MemoryConnector::default()
            .with("a", MemorySource::with_docs(5))
            .with("b", MemorySource::with_docs(5)),
    );
    let config = app_config(&dir, vec![source_config("a", 5), source_config("b", 5)], 1, false);
    let token = CancellationToken::new();
    token.cancel();

    let result = orchestrator(config, Arc::clone(&connector)).run(token).await?;

    assert!(result.cancelled);
    assert_eq!(result.total_urls, 0);
    assert!(result.global_index.is_none());
    assert!(result.sources.iter().all(|s| s.errors[0].category == "cancelled"));
    assert!(connector.source("a").fetch_log().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_compressed_output_round_trips() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let connector = Arc::new(MemoryConnector::default().with("docs", MemorySource::with_docs(5)));
    let config = app_config(&dir, vec![source_config("docs", 10)], 1, true);

    let result = orchestrator(config, connector).run(CancellationToken::new()).await?;

    let file = &result.sources[0].generated_files[0];
    assert_eq!(file, &dir.path().join("sitemap_docs.xml.gz"));
    assert!(!dir.path().join("sitemap_docs.xml").exists());

    let mut xml = String::new();
    GzDecoder::new(std::fs::File::open(file)?).read_to_string(&mut xml)?;
    assert_eq!(xml.matches("<url>").count(), 5);

    assert_eq!(result.global_index, Some(dir.path().join("sitemap.xml.gz")));
    Ok(())
}

#[tokio::test]
async fn test_unwritable_output_fails_the_run() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"file").unwrap();
    let connector = Arc::new(MemoryConnector::default().with("docs", MemorySource::with_docs(5)));
    let mut config = app_config(&dir, vec![source_config("docs", 10)], 1, false);
    config.sitemap.output_dir = blocker.join("out");

    let err = orchestrator(config, connector)
        .run(CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.category(), "processing");
}

#[tokio::test]
async fn test_write_failure_is_contained_to_its_source() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    // A directory where the sitemap file should go makes the write fail.
    std::fs::create_dir(dir.path().join("sitemap_docs.xml"))?;
    let connector = Arc::new(
        MemoryConnector::default()
            .with("docs", MemorySource::with_docs(5))
            .with("other", MemorySource::with_docs(5)),
    );
    let config = app_config(
        &dir,
        vec![source_config("docs", 10), source_config("other", 10)],
        2,
        false,
    );

    let result = orchestrator(config, connector).run(CancellationToken::new()).await?;

    let docs = &result.sources[0];
    assert_eq!(docs.processed_docs, 0);
    assert!(docs.generated_files.is_empty());
    assert!(
        docs.errors
            .iter()
            .any(|e| e.category == "processing" && e.message.starts_with("Sitemap generation failed"))
    );
    let other = &result.sources[1];
    assert_eq!(other.processed_docs, 5);
    assert!(other.errors.is_empty());
    assert_eq!(result.total_urls, 5);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_source_becomes_failed_result() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let broken = MemorySource {
        panic_on_fetch: true,
        ..MemorySource::with_docs(5)
    };
    let connector = Arc::new(
        MemoryConnector::default()
            .with("broken", broken)
            .with("fine", MemorySource::with_docs(5)),
    );
    let config = app_config(
        &dir,
        vec![source_config("broken", 10), source_config("fine", 10)],
        2,
        false,
    );

    let result = orchestrator(config, connector).run(CancellationToken::new()).await?;

    let broken = &result.sources[0];
    assert_eq!(broken.name, "broken");
    assert_eq!(broken.processed_docs, 0);
    assert_eq!(broken.errors.len(), 1);
    assert_eq!(broken.errors[0].category, "processing");
    assert!(broken.errors[0].message.starts_with("Processing failed"));
    assert_eq!(result.sources[1].processed_docs, 5);
    assert_eq!(result.global_index, Some(dir.path().join("sitemap.xml")));
    Ok(())
}

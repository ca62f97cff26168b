//! # sitemapper-core
//!
//! Core functionality for sitemapper - an exporter that turns the documents of
//! Solr-style search cores into XML sitemaps.
//!
//! Every configured source is paged through in identifier order, each
//! identifier is mapped to a public URL, and the URLs are streamed into
//! `urlset` files of at most 50,000 entries, optionally gzipped and tied
//! together by per-source and global sitemap indexes.
//!
//! ## Architecture
//!
//! - **Configuration**: TOML settings for sources, output and processing
//! - **Client**: Paginated access to a source behind a circuit breaker
//! - **URL building**: Validated `{id}` patterns with percent-encoding
//! - **Sitemaps**: Streaming assembly, splitting, compression and indexes
//! - **Orchestration**: Bounded parallel pipelines with progress tracking
//! - **Error Handling**: Categorised errors with recovery hints
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sitemapper_core::{AppConfig, Orchestrator, SummaryReport};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> sitemapper_core::Result<()> {
//! let config = AppConfig::load("sitemapper.toml".as_ref())?;
//! let result = Orchestrator::new(config).run(CancellationToken::new()).await?;
//! println!("{}", SummaryReport::from_result(&result).format_text());
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Failures of a single source never abort a run; they are collected in its
//! [`SourceResult`]. Library calls return [`Result<T, Error>`]:
//!
//! ```rust
//! use sitemapper_core::{Error, UrlBuilder};
//!
//! match UrlBuilder::new("https://example.com/items") {
//!     Ok(_) => println!("pattern accepted"),
//!     Err(Error::Validation(msg)) => eprintln!("Invalid pattern: {msg}"),
//!     Err(e) => eprintln!("Unexpected error: {e}"),
//! }
//! ```

/// Per-source circuit breakers
pub mod circuit_breaker;
/// Source client and the document source seam
pub mod client;
/// Configuration loading and validation
pub mod config;
/// Error types and result aliases
pub mod error;
/// Parallel per-source pipelines
pub mod orchestrator;
/// Thread-safe progress tracking
pub mod progress;
/// Summary report and outcome analysis
pub mod report;
/// Sitemap file assembly
pub mod sitemap;
/// Core data types
pub mod types;
/// Identifier to URL mapping
pub mod url_builder;

// Re-export commonly used types
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerManager, CircuitBreakerStats, CircuitState};
pub use client::{DocumentSource, HttpConnector, SolrClient, SourceConnector};
pub use config::{AppConfig, CircuitBreakerConfig, ProcessingConfig, SitemapConfig, SourceConfig};
pub use error::{ConnectionKind, Error, Result};
pub use orchestrator::{BatchRetryPolicy, HealthCheckPolicy, Orchestrator};
pub use progress::{Phase, ProgressHandle, ProgressTracker};
pub use report::{OutcomeAnalysis, OutcomeStatus, SummaryReport};
pub use sitemap::{AssembledSitemaps, SitemapAssembler};
pub use types::*;
pub use url_builder::UrlBuilder;

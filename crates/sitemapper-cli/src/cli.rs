//! # CLI Structure and Argument Parsing
//!
//! `sitemapper` has a single mode of operation: read a TOML configuration,
//! export every configured source and print a summary. Flags override the
//! matching configuration values for one run.
//!
//! ```bash
//! # Export using ./sitemapper.toml
//! sitemapper
//!
//! # Validate the configuration and preview one URL per source
//! sitemapper --config prod.toml --dry-run
//!
//! # Small trial run into a scratch directory, JSON result on stdout
//! sitemapper --test-mode --output /tmp/sitemaps --json
//! ```

use std::path::PathBuf;

use clap::Parser;
use clap::builder::RangedU64ValueParser;

use crate::utils::LogFormat;

/// Export search-core documents as XML sitemaps.
#[derive(Parser, Debug, Clone)]
#[command(name = "sitemapper", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(
        short,
        long,
        env = "SITEMAPPER_CONFIG",
        default_value = "sitemapper.toml",
        value_name = "FILE"
    )]
    pub config: PathBuf,

    /// Output directory, overrides `sitemap.output_dir`
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Sources processed in parallel, overrides `processing.parallel_workers`
    #[arg(short, long, value_name = "N", value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub workers: Option<usize>,

    /// Log level, overrides `processing.log_level`
    #[arg(
        long,
        value_name = "LEVEL",
        ignore_case = true,
        value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"]
    )]
    pub log_level: Option<String>,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Validate configuration and preview URLs without exporting
    #[arg(long)]
    pub dry_run: bool,

    /// Export at most 10 documents per source
    #[arg(long)]
    pub test_mode: bool,

    /// Print the result as JSON instead of the text summary
    #[arg(long)]
    pub json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

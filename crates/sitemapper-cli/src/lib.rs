//! sitemapper CLI - export search-core documents as XML sitemaps
//!
//! Parses flags, loads the configuration, installs logging and runs either the
//! export or a dry run. The process exit code follows [`error::ExitStatus`].

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use sitemapper_core::AppConfig;
use tracing::{Level, debug, info};

pub mod cli;
mod commands;
pub mod error;
pub mod utils;

use crate::cli::Cli;
use crate::error::{CliError, ExitStatus, exit_status_from_error};
use crate::utils::{initialize_logging, level_from_name};

/// Execute the sitemapper CLI with the current process arguments.
pub async fn run() -> ExitCode {
    let cli = Cli::parse();
    match execute(cli).await {
        Ok(status) => status.as_exit_code(),
        Err(err) => {
            let status = exit_status_from_error(&err);
            eprintln!("Error: {err}");
            status.as_exit_code()
        },
    }
}

async fn execute(cli: Cli) -> Result<ExitStatus> {
    let config = load_config(&cli)?;

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        level_from_name(&config.processing.log_level)
    };
    initialize_logging(level, cli.log_format)?;
    info!(
        config = %cli.config.display(),
        sources = config.sources.len(),
        workers = config.processing.parallel_workers,
        "Configuration loaded"
    );
    debug!(?config, "Effective configuration");

    if cli.dry_run {
        return commands::dry_run(&config, cli.json);
    }
    commands::generate(config, cli.json).await
}

/// Load the configuration file and apply flag overrides.
///
/// # Errors
///
/// Returns a configuration error if the file is unreadable or invalid, before
/// or after overrides.
pub fn load_config(cli: &Cli) -> Result<AppConfig, CliError> {
    let mut config = AppConfig::load(&cli.config).map_err(CliError::configuration)?;
    apply_overrides(cli, &mut config);
    config.validate().map_err(CliError::configuration)?;
    Ok(config)
}

fn apply_overrides(cli: &Cli, config: &mut AppConfig) {
    if let Some(dir) = &cli.output {
        config.sitemap.output_dir.clone_from(dir);
    }
    if let Some(workers) = cli.workers {
        config.processing.parallel_workers = workers;
    }
    if cli.test_mode {
        config.processing.test_mode = true;
    }
    if let Some(level) = &cli.log_level {
        config.processing.log_level = level.to_uppercase();
    }
}

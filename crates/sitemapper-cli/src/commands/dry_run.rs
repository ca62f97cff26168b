//! Configuration check without contacting any source.

use anyhow::Result;
use serde::Serialize;
use sitemapper_core::{AppConfig, UrlBuilder};
use tracing::info;

use crate::error::{CliError, ExitStatus};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SourcePreview {
    name: String,
    url: String,
    batch_size: usize,
    preview_url: String,
}

/// Validate URL patterns and show one sample URL per source.
///
/// # Errors
///
/// Returns a configuration error for the first unusable pattern.
pub fn dry_run(config: &AppConfig, json_output: bool) -> Result<ExitStatus> {
    let mut previews = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        let builder = UrlBuilder::new(&source.url_pattern).map_err(CliError::configuration)?;
        let preview_url = builder.preview(None).map_err(CliError::configuration)?;
        info!(source = %source.name, url = %source.url, preview = %preview_url, "Source configured");
        previews.push(SourcePreview {
            name: source.name.clone(),
            url: source.url.clone(),
            batch_size: source.batch_size,
            preview_url,
        });
    }

    if json_output {
        let payload = serde_json::json!({
            "valid": true,
            "outputDir": config.sitemap.output_dir.display().to_string(),
            "workers": config.processing.parallel_workers,
            "testMode": config.processing.test_mode,
            "sources": previews,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!(
            "Configuration OK: {} source(s), output {}",
            previews.len(),
            config.sitemap.output_dir.display()
        );
        for preview in &previews {
            println!("  {} -> {}", preview.name, preview.preview_url);
        }
    }
    Ok(ExitStatus::Success)
}

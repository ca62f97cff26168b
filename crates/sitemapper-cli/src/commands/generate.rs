//! The export run.

use anyhow::Result;
use serde_json::json;
use sitemapper_core::{AppConfig, OutcomeAnalysis, Orchestrator, SummaryReport};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ExitStatus, determine_exit_status};

/// Export every source and print the result.
///
/// # Errors
///
/// Returns an error if the run cannot start or its result cannot be printed.
pub async fn generate(config: AppConfig, json_output: bool) -> Result<ExitStatus> {
    let shutdown = CancellationToken::new();
    let listener = spawn_interrupt_listener(shutdown.clone());

    let orchestrator = Orchestrator::new(config);
    let outcome = orchestrator.run(shutdown).await;
    listener.abort();
    let result = outcome?;

    let analysis = OutcomeAnalysis::from_result(&result);
    if json_output {
        let payload = json!({
            "result": &result,
            "analysis": &analysis,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{}", SummaryReport::from_result(&result).format_text());
    }

    if analysis.total_errors > 0 {
        warn!(
            total_errors = analysis.total_errors,
            categories = ?analysis.error_categories,
            "Run finished with errors"
        );
    }
    for name in &analysis.failed_sources {
        warn!(source = %name, "Source produced no sitemaps");
    }
    for advice in &analysis.recommendations {
        info!("Recommendation: {advice}");
    }

    let status = determine_exit_status(&result, &analysis);
    info!(
        status = %analysis.status,
        exit_code = status.exit_code(),
        "Run finished: {status}"
    );
    Ok(status)
}

/// Cancel `shutdown` on Ctrl-C. In-flight batches finish; queued sources are
/// skipped.
fn spawn_interrupt_listener(shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight batches");
            shutdown.cancel();
        }
    })
}

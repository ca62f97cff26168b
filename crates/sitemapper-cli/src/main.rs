//! Entry point for the `sitemapper` binary.

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    sitemapper_cli::run().await
}

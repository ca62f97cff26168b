//! CLI error handling with semantic exit codes.
//!
//! | Code | Status | Description |
//! |------|--------|-------------|
//! | 0 | `Success` | Every reported document was exported |
//! | 1 | `General` | Unexpected error |
//! | 2 | `Configuration` | Invalid arguments or configuration |
//! | 3 | `Connection` | Sources could not be reached |
//! | 4 | `Processing` | Sitemap generation failed |
//! | 5 | `Permission` | Output could not be written for lack of permission |
//! | 6 | `Interrupted` | Run stopped by a signal |
//! | 7 | `PartialSuccess` | At least half of the documents were exported |
//! | 8 | `NoData` | Sources were reachable but empty |
//! | 9 | `Resource` | The system ran out of disk or similar |
//!
//! ```bash
//! sitemapper --config prod.toml
//! case $? in
//!     0) echo "done" ;;
//!     7) echo "partial export, check the logs" ;;
//!     *) echo "failed" ;;
//! esac
//! ```

use std::fmt;
use std::process::ExitCode;

use sitemapper_core::{Error as CoreError, OutcomeAnalysis, OutcomeStatus, ProcessingResult};

/// Exit status of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExitStatus {
    /// Every reported document was exported (exit code 0).
    Success = 0,
    /// Unexpected error (exit code 1).
    General = 1,
    /// Invalid arguments or configuration (exit code 2).
    Configuration = 2,
    /// Sources could not be reached (exit code 3).
    Connection = 3,
    /// Sitemap generation failed (exit code 4).
    Processing = 4,
    /// Permission denied while writing output (exit code 5).
    Permission = 5,
    /// Interrupted by a signal (exit code 6).
    Interrupted = 6,
    /// Some sources or documents failed (exit code 7).
    PartialSuccess = 7,
    /// Nothing to export (exit code 8).
    NoData = 8,
    /// Disk or memory exhausted (exit code 9).
    Resource = 9,
}

impl ExitStatus {
    /// Numeric exit code.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        self as u8
    }

    /// Create an `ExitCode` from this status.
    #[must_use]
    pub fn as_exit_code(self) -> ExitCode {
        ExitCode::from(self.exit_code())
    }

    /// Short description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::General => "general error",
            Self::Configuration => "configuration error",
            Self::Connection => "connection error",
            Self::Processing => "processing error",
            Self::Permission => "permission error",
            Self::Interrupted => "interrupted",
            Self::PartialSuccess => "partial success",
            Self::NoData => "no data",
            Self::Resource => "resource error",
        }
    }

    /// Status for a library error that ended the run.
    #[must_use]
    pub fn from_core_error(err: &CoreError) -> Self {
        match err {
            CoreError::Config(_) | CoreError::Validation(_) => Self::Configuration,
            CoreError::Connection { .. } => Self::Connection,
            CoreError::Io(io) => match io.kind() {
                std::io::ErrorKind::PermissionDenied => Self::Permission,
                std::io::ErrorKind::StorageFull | std::io::ErrorKind::OutOfMemory => Self::Resource,
                std::io::ErrorKind::Interrupted => Self::Interrupted,
                _ => Self::Processing,
            },
            CoreError::Processing(msg) => Self::infer_from_message(msg).unwrap_or(Self::Processing),
            CoreError::Serialization(_) => Self::General,
        }
    }

    /// Permission and resource problems only surface as message text once
    /// they have been wrapped by the writer.
    fn infer_from_message(msg: &str) -> Option<Self> {
        let msg = msg.to_lowercase();
        if msg.contains("permission denied") || msg.contains("access is denied") {
            Some(Self::Permission)
        } else if msg.contains("no space left") || msg.contains("disk full") || msg.contains("out of memory") {
            Some(Self::Resource)
        } else {
            None
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Pick the exit status for a finished run.
#[must_use]
pub fn determine_exit_status(result: &ProcessingResult, analysis: &OutcomeAnalysis) -> ExitStatus {
    if result.cancelled {
        return ExitStatus::Interrupted;
    }
    if result.sources.is_empty() {
        return ExitStatus::Configuration;
    }
    if analysis.status == OutcomeStatus::Success {
        return ExitStatus::Success;
    }
    if result.total_urls == 0 && analysis.total_errors == 0 {
        return ExitStatus::NoData;
    }

    let messages = || result.sources.iter().flat_map(|s| &s.errors).map(|e| e.message.as_str());
    if let Some(status) = messages().find_map(ExitStatus::infer_from_message) {
        return status;
    }
    if analysis.count("config") > 0 {
        return ExitStatus::Configuration;
    }

    let connection = analysis.count("connection");
    let processing = analysis.count("processing") + analysis.count("io");
    let every_source_unreachable = result
        .sources
        .iter()
        .all(|s| s.errors.iter().any(|e| e.category == "connection"));
    if connection > 0 && every_source_unreachable && result.total_urls == 0 {
        return ExitStatus::Connection;
    }
    if processing > 0 && result.total_urls == 0 {
        return ExitStatus::Processing;
    }

    if result.total_urls > 0 {
        if result.success_rate >= 50.0 {
            return ExitStatus::PartialSuccess;
        }
        return if connection > processing {
            ExitStatus::Connection
        } else {
            ExitStatus::Processing
        };
    }

    if connection > 0 {
        ExitStatus::Connection
    } else if processing > 0 || analysis.count("validation") > 0 {
        ExitStatus::Processing
    } else {
        ExitStatus::General
    }
}

/// A CLI error carrying the exit status it maps to.
#[derive(Debug)]
pub struct CliError {
    /// Exit status for this error.
    pub status: ExitStatus,
    /// The underlying error with full context.
    pub source: anyhow::Error,
}

impl CliError {
    /// Create a new CLI error with an explicit status.
    pub fn new(status: ExitStatus, source: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            source: source.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(source: impl Into<anyhow::Error>) -> Self {
        Self::new(ExitStatus::Configuration, source)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Determine the exit status from an `anyhow::Error`.
#[must_use]
pub fn exit_status_from_error(err: &anyhow::Error) -> ExitStatus {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.status;
    }
    if let Some(core_err) = err.downcast_ref::<CoreError>() {
        return ExitStatus::from_core_error(core_err);
    }
    ExitStatus::General
}

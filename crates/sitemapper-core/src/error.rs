//! Error types and handling for sitemapper-core operations.
//!
//! Errors are grouped into a small taxonomy that the pipeline reacts to:
//!
//! - **Connection**: the remote source could not be reached, timed out, answered
//!   with something unusable, or its circuit breaker is open
//! - **Validation**: a URL pattern or a generated URL is malformed
//! - **Processing**: sitemap assembly or file writing failed
//! - **Configuration**: settings are missing or out of range
//!
//! Connection errors carry a [`ConnectionKind`] so callers can branch on the
//! flavour of failure instead of inspecting message text:
//!
//! ```rust
//! use sitemapper_core::{ConnectionKind, Error};
//!
//! let err = Error::connection(ConnectionKind::Timeout, "select timed out");
//! assert!(err.is_timeout());
//! assert!(err.is_recoverable());
//! assert_eq!(err.category(), "connection");
//! ```

use std::time::Duration;

use thiserror::Error;

/// Flavour of a [`Error::Connection`] failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// The request could not be sent or the connection dropped.
    Transport,
    /// The request (or the breaker's per-call guard) exceeded its deadline.
    Timeout,
    /// The circuit breaker is open and rejected the call without trying.
    CircuitOpen,
    /// The source answered, but with an error status or an unexpected body.
    Protocol,
}

impl ConnectionKind {
    /// Short identifier used in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::CircuitOpen => "circuit_open",
            Self::Protocol => "protocol",
        }
    }
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The main error type for sitemapper-core operations.
///
/// Per-document and per-batch failures are normally caught by the pipeline and
/// recorded on the source's result; only run-wide failures escape to callers.
#[derive(Error, Debug)]
pub enum Error {
    /// A remote source could not be queried.
    ///
    /// ## Recoverability
    ///
    /// Transport failures, timeouts and open circuits are transient. Protocol
    /// failures (bad status, malformed body) usually are not.
    #[error("Connection error ({kind}): {message}")]
    Connection {
        /// What went wrong at the connection level.
        kind: ConnectionKind,
        /// Human readable detail.
        message: String,
        /// Remaining breaker cool-down, when known.
        retry_after: Option<Duration>,
    },

    /// A URL pattern, identifier or generated URL is invalid.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Sitemap assembly, compression or file output failed.
    #[error("Processing error: {0}")]
    Processing(String),

    /// Configuration is invalid or inaccessible.
    ///
    /// ## Common Causes
    ///
    /// - Invalid TOML syntax in the config file
    /// - No sources configured, or duplicate source names
    /// - Values outside valid ranges (batch size, URLs per file, workers)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ConnectionKind::Timeout
        } else if err.is_status() || err.is_decode() {
            ConnectionKind::Protocol
        } else {
            ConnectionKind::Transport
        };
        Self::Connection {
            kind,
            message: err.to_string(),
            retry_after: None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl Error {
    /// Build a connection error without a retry hint.
    pub fn connection(kind: ConnectionKind, message: impl Into<String>) -> Self {
        Self::Connection {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Build the fail-fast error returned while a circuit is open.
    pub fn circuit_open(source: &str, retry_after: Duration) -> Self {
        Self::Connection {
            kind: ConnectionKind::CircuitOpen,
            message: format!(
                "circuit breaker for '{source}' is OPEN. Retry in {:.1}s",
                retry_after.as_secs_f64()
            ),
            retry_after: Some(retry_after),
        }
    }

    /// Whether this is a connection-level failure of any kind.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Whether this is a timeout-flavoured connection failure.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Connection {
                kind: ConnectionKind::Timeout,
                ..
            }
        )
    }

    /// Connection kind, if this is a connection error.
    #[must_use]
    pub const fn connection_kind(&self) -> Option<ConnectionKind> {
        match self {
            Self::Connection { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Remaining breaker cool-down attached to the error, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Connection { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Check if the error might be recoverable through retry logic.
    ///
    /// Returns `true` for transient connection failures (transport, timeout,
    /// open circuit) and for interrupted or timed-out I/O. Validation,
    /// configuration and protocol failures are permanent.
    ///
    /// ```rust
    /// use sitemapper_core::{ConnectionKind, Error};
    /// use std::time::Duration;
    ///
    /// assert!(Error::circuit_open("products", Duration::from_secs(5)).is_recoverable());
    /// assert!(!Error::connection(ConnectionKind::Protocol, "HTTP 500").is_recoverable());
    /// assert!(!Error::Validation("empty id".into()).is_recoverable());
    /// ```
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Connection { kind, .. } => !matches!(kind, ConnectionKind::Protocol),
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Get the error category as a string identifier.
    ///
    /// Used to group errors in logs and in the run report:
    ///
    /// - `"connection"` - remote source failures, including open circuits
    /// - `"validation"` - URL pattern and identifier problems
    /// - `"processing"` - sitemap assembly and output
    /// - `"config"` - configuration problems
    /// - `"io"` - file system operations
    /// - `"serialization"` - data format conversion
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Validation(_) => "validation",
            Self::Processing(_) => "processing",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

/// Convenience type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_display_formatting() {
        // Given: Different error variants
        let errors = vec![
            Error::connection(ConnectionKind::Transport, "refused"),
            Error::Validation("empty id".to_string()),
            Error::Processing("disk full".to_string()),
            Error::Config("no sources".to_string()),
            Error::Serialization("bad json".to_string()),
        ];

        for error in errors {
            // When: Converting to string
            let rendered = error.to_string();

            // Then: Each variant names its category and keeps the detail
            match &error {
                Error::Connection { message, .. } => {
                    assert!(rendered.contains("Connection error (transport)"));
                    assert!(rendered.contains(message));
                },
                Error::Validation(msg) => {
                    assert!(rendered.contains("Validation error"));
                    assert!(rendered.contains(msg));
                },
                Error::Processing(msg) => {
                    assert!(rendered.contains("Processing error"));
                    assert!(rendered.contains(msg));
                },
                Error::Config(msg) => {
                    assert!(rendered.contains("Configuration error"));
                    assert!(rendered.contains(msg));
                },
                Error::Serialization(msg) => {
                    assert!(rendered.contains("Serialization error"));
                    assert!(rendered.contains(msg));
                },
                Error::Io(_) => panic!("unexpected io variant"),
            }
        }
    }

    #[test]
    fn test_circuit_open_carries_retry_hint() {
        // Given: An open circuit with 12.5 seconds of cool-down left
        let err = Error::circuit_open("products", Duration::from_millis(12_500));

        // Then: The hint is exposed and rendered with one decimal
        assert_eq!(err.retry_after(), Some(Duration::from_millis(12_500)));
        assert_eq!(err.connection_kind(), Some(ConnectionKind::CircuitOpen));
        assert!(err.to_string().contains("Retry in 12.5s"));
        assert!(err.is_connection());
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_recoverability() {
        let recoverable = vec![
            Error::connection(ConnectionKind::Timeout, "slow"),
            Error::connection(ConnectionKind::Transport, "reset"),
            Error::Io(io::Error::new(io::ErrorKind::Interrupted, "interrupted")),
        ];
        let permanent = vec![
            Error::connection(ConnectionKind::Protocol, "HTTP 400"),
            Error::Validation("bad pattern".to_string()),
            Error::Config("missing field".to_string()),
            Error::Io(io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
        ];

        for error in recoverable {
            assert!(error.is_recoverable(), "{error} should be recoverable");
        }
        for error in permanent {
            assert!(!error.is_recoverable(), "{error} should be permanent");
        }
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            Error::connection(ConnectionKind::CircuitOpen, "open").category(),
            "connection"
        );
        assert_eq!(Error::Validation(String::new()).category(), "validation");
        assert_eq!(Error::Processing(String::new()).category(), "processing");
        assert_eq!(Error::Config(String::new()).category(), "config");
        assert_eq!(
            Error::Io(io::Error::other("boom")).category(),
            "io"
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = json_err.into();
        assert_eq!(err.category(), "serialization");
    }
}

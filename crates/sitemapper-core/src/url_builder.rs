//! Identifier to URL mapping.
//!
//! A [`UrlBuilder`] is created from a pattern such as
//! `https://www.example.com/product/{id}`. The pattern is validated once, up
//! front; afterwards [`UrlBuilder::build`] percent-encodes each identifier and
//! substitutes it for the `{id}` token.
//!
//! ```rust
//! use sitemapper_core::UrlBuilder;
//!
//! let builder = UrlBuilder::new("https://example.com/doc/{id}")?;
//! assert_eq!(builder.build("a b")?, "https://example.com/doc/a%20b");
//! assert_eq!(builder.build("x/y")?, "https://example.com/doc/x%2Fy");
//! # Ok::<(), sitemapper_core::Error>(())
//! ```

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::{Error, Result};

/// The only supported substitution token.
pub const ID_PLACEHOLDER: &str = "{id}";

const SAMPLE_ID: &str = "sample-id-123";

/// Regex for `{name}` placeholders
///
/// SAFETY: Pattern is a compile-time constant that is known to be valid.
#[allow(clippy::unwrap_used)]
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([^}]+)\}").unwrap());

/// Validated URL pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlBuilder {
    pattern: String,
    placeholders: BTreeSet<String>,
}

impl UrlBuilder {
    /// Validate `pattern` and build a mapper for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the pattern is empty, is not http(s),
    /// does not contain `{id}` exactly once, contains any other `{...}`
    /// placeholder, or does not produce an absolute URL with a host.
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation("URL pattern cannot be empty".into()));
        }
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(Error::Validation(format!(
                "URL pattern must start with http:// or https://: {pattern}"
            )));
        }

        let placeholders: BTreeSet<String> = PLACEHOLDER_RE
            .captures_iter(trimmed)
            .map(|c| c[1].to_string())
            .collect();
        let unsupported: Vec<&str> = placeholders
            .iter()
            .map(String::as_str)
            .filter(|p| *p != "id")
            .collect();
        if !unsupported.is_empty() {
            return Err(Error::Validation(format!(
                "URL pattern contains unsupported placeholders: {}. Only {{id}} is supported",
                unsupported.join(", ")
            )));
        }
        match trimmed.matches(ID_PLACEHOLDER).count() {
            0 => {
                return Err(Error::Validation(format!(
                    "URL pattern must contain the {ID_PLACEHOLDER} placeholder: {pattern}"
                )));
            },
            1 => {},
            n => {
                return Err(Error::Validation(format!(
                    "URL pattern must contain {ID_PLACEHOLDER} exactly once, found {n}"
                )));
            },
        }

        let builder = Self {
            pattern: trimmed.to_string(),
            placeholders,
        };
        let sample = builder.substitute(SAMPLE_ID);
        validate_absolute(&sample).map_err(|reason| {
            Error::Validation(format!("URL pattern generates invalid URLs ({reason}): {sample}"))
        })?;
        Ok(builder)
    }

    /// The validated pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Placeholder names found in the pattern, without braces.
    pub const fn placeholders(&self) -> &BTreeSet<String> {
        &self.placeholders
    }

    /// Whether the pattern contains `{name}`.
    pub fn has_placeholder(&self, name: &str) -> bool {
        self.placeholders.contains(name)
    }

    /// Map an identifier to its URL.
    ///
    /// Everything except unreserved characters is percent-encoded, so `/`,
    /// `?` and `#` inside identifiers cannot change the URL structure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an empty or blank identifier, or if
    /// the result is not an absolute http(s) URL with a host.
    pub fn build(&self, id: &str) -> Result<String> {
        if id.trim().is_empty() {
            return Err(Error::Validation("Document ID cannot be empty".into()));
        }
        let url = self.substitute(id);
        validate_absolute(&url).map_err(|reason| {
            Error::Validation(format!("Generated URL is invalid ({reason}): {url}"))
        })?;
        Ok(url)
    }

    /// URL for a sample identifier, for dry runs and config checks.
    pub fn preview(&self, sample_id: Option<&str>) -> Result<String> {
        self.build(sample_id.unwrap_or(SAMPLE_ID))
    }

    fn substitute(&self, id: &str) -> String {
        self.pattern
            .replacen(ID_PLACEHOLDER, &urlencoding::encode(id), 1)
    }
}

impl std::fmt::Display for UrlBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UrlBuilder(pattern='{}')", self.pattern)
    }
}

fn validate_absolute(candidate: &str) -> std::result::Result<(), String> {
    let parsed = Url::parse(candidate).map_err(|e| e.to_string())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", parsed.scheme()));
    }
    match parsed.host_str() {
        Some(host) if !host.trim().is_empty() => Ok(()),
        _ => Err("missing host".to_string()),
    }
}

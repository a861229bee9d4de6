//! Error types for every stage of the feed pipeline.
//!
//! Each stage has its own error so callers can decide, per failure class,
//! whether to degrade, skip, or abort:
//!
//! | Error | Raised by | Response |
//! |-------|-----------|----------|
//! | [`FetchError`] | listing / detail fetch | listing: abort source; detail: degrade entry |
//! | [`UnparsableTime`] | time normalizer | fallback to now or skip, per [`DatePolicy`](crate::config::DatePolicy) |
//! | [`LedgerError`] | ledger loader | log, treat file as empty |
//! | [`ConfigError`] | startup validation | abort before any fetch |
//! | [`SinkError`] | Atom writer | log, count source as failed |
//! | [`SourceError`] | one source's run | log, count source as failed |

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while retrieving a page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, body decoding).
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with a non-2xx status code.
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// The request or a wait-for-condition exceeded its deadline.
    #[error("Request timed out")]
    Timeout,
}

/// A timestamp token that matched none of the normalizer's rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unparsable time token: {token:?}")]
pub struct UnparsableTime {
    pub token: String,
}

impl UnparsableTime {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
        }
    }
}

/// A prior feed document that exists but could not be read as a feed.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to read feed file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed feed file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// Invalid source configuration, detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid YAML in config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Source {source_name:?}: invalid selector {selector:?} ({reason})")]
    InvalidSelector {
        source_name: String,
        selector: String,
        reason: String,
    },

    #[error("Source {source_name:?}: invalid URL {url:?} ({reason})")]
    InvalidUrl {
        source_name: String,
        url: String,
        reason: String,
    },

    #[error("Source {source_name:?}: UTC offset of {hours} hours is out of range")]
    InvalidOffset { source_name: String, hours: i32 },

    #[error("Source {0:?} is defined more than once")]
    DuplicateSource(String),

    #[error("Unknown source {0:?}")]
    UnknownSource(String),

    #[error("No sources configured")]
    Empty,
}

/// Failure to render or persist a feed document.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write feed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize feed: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Rendered feed is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// A failure that ends one source's run without affecting the others.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Listing page unavailable: {0}")]
    Listing(#[from] FetchError),
    /// The listing page loaded but no row matched the source's selectors.
    #[error("Listing page {0} yielded no entries; its markup may have changed")]
    UnusableListing(url::Url),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

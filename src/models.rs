//! Data models passed between pipeline stages.
//!
//! - [`RawCandidate`]: an entry discovered on a listing page, not yet validated
//! - [`ExtractedContent`]: cleaned markup and raw metadata from a detail page
//! - [`FeedEntry`]: an accepted entry, ready for the Atom sink
//! - [`DedupKey`]: the normalized title used by the [`Ledger`](crate::ledger::Ledger)
//!
//! Candidates and extracted content live only for the processing of one
//! listing item. Entries persist only as serialized feed output.

use crate::time::{NormalizedTimestamp, TokenKind};
use itertools::Itertools;
use url::Url;

/// An entry discovered on a listing page.
///
/// The listing container itself is not kept: the walker copies out the
/// values later stages need (author, listing timestamp) while the listing
/// document is still alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCandidate {
    /// Title text with whitespace collapsed.
    pub title: String,
    /// Absolute URL of the detail page.
    pub detail_url: Url,
    /// Author shown in the listing row, if the source exposes one.
    pub author: Option<String>,
    /// Timestamp token shown in the listing row, if configured.
    pub listing_time: Option<String>,
}

/// A timestamp token as found in a page, with the rule it must be read with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTimestamp {
    pub token: String,
    pub kind: TokenKind,
}

impl RawTimestamp {
    pub fn new(token: impl Into<String>, kind: TokenKind) -> Self {
        Self {
            token: token.into(),
            kind,
        }
    }
}

/// Content and publication metadata extracted from a detail page.
///
/// `Default` is the degraded form used when the detail page could not be
/// fetched: no markup and no timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedContent {
    /// Sanitized markup, prefixed with a "Published on" banner when dated.
    pub html: String,
    pub published_at: Option<RawTimestamp>,
    pub updated_at: Option<RawTimestamp>,
    pub author: Option<String>,
}

/// A feed entry accepted by the assembler.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    /// Stable id, derived from the title or the URL.
    pub id: String,
    pub title: String,
    pub link: Url,
    pub published: NormalizedTimestamp,
    pub updated: NormalizedTimestamp,
    pub content_html: String,
    pub author: Option<String>,
}

/// Feed-level metadata written alongside the entries.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedMeta {
    pub id: String,
    pub title: String,
    pub link: Url,
    pub subtitle: String,
    pub updated: NormalizedTimestamp,
}

/// Normalized title used for deduplication.
///
/// Two titles that differ only in case or whitespace produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(title: &str) -> Self {
        Self(title.split_whitespace().join(" ").to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

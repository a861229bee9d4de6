//! Deduplication ledger.
//!
//! The ledger is the set of [`DedupKey`]s already published for a source.
//! It is rebuilt at the start of every run from up to two prior feed
//! documents (the deployed copy and the local working copy), then grows in
//! memory as entries are accepted so a title cannot appear twice in one
//! run.
//!
//! It is never written back directly. The prior entries it read are kept
//! and carried into the next feed written for the source, so the feed
//! itself remains the record of every title still within the retention
//! window.

use crate::error::LedgerError;
use crate::models::{DedupKey, FeedEntry};
use chrono::FixedOffset;
use feed_rs::model::{Entry, Feed};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, instrument, warn};
use url::Url;

#[derive(Debug, Default, Clone)]
pub struct Ledger {
    keys: HashSet<DedupKey>,
    prior: Vec<FeedEntry>,
}

impl Ledger {
    /// Build a ledger from the entry titles of every readable feed in `paths`.
    ///
    /// Missing files are expected on a first run and are skipped quietly.
    /// Unreadable or malformed files are logged and treated as empty. A
    /// title found in more than one file is kept once, from the first.
    ///
    /// # Arguments
    ///
    /// * `paths` - Prior feed documents, most authoritative first
    /// * `offset` - Region offset the carried entries' timestamps are expressed in
    ///
    /// # Returns
    ///
    /// The ledger holding every prior title, along with the prior entries
    /// that can be written again (see [`Ledger::into_prior_entries`]).
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let ledger = Ledger::load(&[deploy_dir.join("money.xml"), output_dir.join("money.xml")], offset).await;
    /// if ledger.contains(&DedupKey::new(&candidate.title)) {
    ///     // already published
    /// }
    /// ```
    #[instrument(level = "info", skip_all)]
    pub async fn load<P: AsRef<Path>>(paths: &[P], offset: FixedOffset) -> Self {
        let mut ledger = Self::default();
        for path in paths {
            let path = path.as_ref();
            match read_feed(path).await {
                Ok(Some(feed)) => {
                    let before = ledger.len();
                    let entries = feed.entries.len();
                    for entry in feed.entries {
                        let Some(title) = entry_title(&entry) else {
                            continue;
                        };
                        if ledger.add(DedupKey::new(&title)) {
                            ledger.prior.extend(prior_entry(entry, title, offset));
                        }
                    }
                    debug!(
                        path = %path.display(),
                        entries,
                        new_keys = ledger.len() - before,
                        "Loaded prior feed"
                    );
                }
                Ok(None) => debug!(path = %path.display(), "No prior feed"),
                Err(e) => warn!(error = %e, "Skipping unreadable prior feed"),
            }
        }
        info!(keys = ledger.len(), carried = ledger.prior.len(), "Ledger ready");
        ledger
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.keys.contains(key)
    }

    /// Record `key`; returns `false` if it was already present.
    pub fn add(&mut self, key: DedupKey) -> bool {
        self.keys.insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Entries read from the prior feeds, in file order.
    ///
    /// Entries lacking a link or a timestamp still count as published but
    /// are not carried.
    pub fn into_prior_entries(self) -> Vec<FeedEntry> {
        self.prior
    }
}

/// Parse the feed at `path`, or `None` if there is no file.
async fn read_feed(path: &Path) -> Result<Option<Feed>, LedgerError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LedgerError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    feed_rs::parser::parse(bytes.as_slice())
        .map(Some)
        .map_err(|e| LedgerError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn entry_title(entry: &Entry) -> Option<String> {
    entry
        .title
        .as_ref()
        .map(|title| title.content.clone())
        .filter(|title| !title.trim().is_empty())
}

/// Rebuild a writable entry from a parsed one.
fn prior_entry(entry: Entry, title: String, offset: FixedOffset) -> Option<FeedEntry> {
    let link = entry.links.first().and_then(|link| Url::parse(&link.href).ok())?;
    let published = entry.published.or(entry.updated)?.with_timezone(&offset);
    let updated = entry
        .updated
        .map(|ts| ts.with_timezone(&offset))
        .unwrap_or(published);
    Some(FeedEntry {
        id: entry.id,
        title,
        link,
        published,
        updated,
        content_html: entry.content.and_then(|c| c.body).unwrap_or_default(),
        author: entry.authors.into_iter().next().map(|person| person.name),
    })
}

//! Per-source feed pipeline.
//!
//! ```text
//! listing page ──walk──▶ candidates ──ledger──▶ detail page ──extract──▶ timestamps ──▶ FeedEntry
//! ```
//!
//! A source run loads its [`Ledger`], fetches and walks the listing page,
//! assembles new entries and writes the feed only when something new was
//! accepted. Sources share no state; a failed source does not affect the
//! others.

use crate::config::{CompiledSource, DatePolicy, IdStrategy, TimestampSource};
use crate::error::{FetchError, SourceError};
use crate::fetch::{PageFetcher, RenderRequest};
use crate::ledger::Ledger;
use crate::models::{
    DedupKey, ExtractedContent, FeedEntry, FeedMeta, RawCandidate, RawTimestamp,
};
use crate::outputs::atom;
use crate::scrapers::listing;
use crate::time::{NormalizedTimestamp, TimeNormalizer};
use crate::utils::truncate_for_log;
use scraper::Html;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Entries accepted by one [`Assembler::assemble`] call.
#[derive(Debug, Default)]
pub struct Assembly {
    /// Accepted entries, in listing order.
    pub entries: Vec<FeedEntry>,
    /// Whether at least one entry was accepted.
    pub changed: bool,
    pub duplicates: usize,
    pub skipped: usize,
}

/// Turns candidates into feed entries for one source.
pub struct Assembler<'a, F> {
    fetcher: &'a F,
    source: &'a CompiledSource,
}

impl<'a, F: PageFetcher> Assembler<'a, F> {
    pub fn new(fetcher: &'a F, source: &'a CompiledSource) -> Self {
        Self { fetcher, source }
    }

    /// Accept up to `cap` new entries from `candidates`, in order.
    ///
    /// Candidates whose title is already in `ledger` are dropped before
    /// their detail page is fetched. Every accepted title is added to
    /// `ledger`, so a title repeated later in the same listing is dropped too.
    #[instrument(level = "info", skip_all, fields(source = %self.source.name, cap = cap))]
    pub async fn assemble<I>(&self, candidates: I, ledger: &mut Ledger, cap: usize) -> Assembly
    where
        I: IntoIterator<Item = RawCandidate>,
    {
        let mut assembly = Assembly::default();
        let normalizer = &self.source.normalizer;
        let policy = self.source.date_policy;

        for candidate in candidates {
            if assembly.entries.len() >= cap {
                break;
            }
            let title_preview = truncate_for_log(&candidate.title, 80);

            let key = DedupKey::new(&candidate.title);
            if ledger.contains(&key) {
                debug!(title = %title_preview, "Already published");
                assembly.duplicates += 1;
                continue;
            }

            // Listing tokens are checked first so undated rows cost no detail fetch.
            let listing_published = match self.source.timestamp {
                TimestampSource::Detail => None,
                TimestampSource::Listing(kind) => {
                    let raw = candidate
                        .listing_time
                        .as_ref()
                        .map(|token| RawTimestamp::new(token.as_str(), kind));
                    match resolve_timestamp(raw.as_ref(), normalizer, policy) {
                        Some(ts) => Some(ts),
                        None => {
                            debug!(title = %title_preview, "No usable listing time; skipping");
                            assembly.skipped += 1;
                            continue;
                        }
                    }
                }
            };

            let Some(content) = self.detail(&candidate.detail_url).await else {
                debug!(title = %title_preview, url = %candidate.detail_url, "No content region; skipping");
                assembly.skipped += 1;
                continue;
            };

            let published = match listing_published {
                Some(ts) => ts,
                None => match resolve_timestamp(content.published_at.as_ref(), normalizer, policy) {
                    Some(ts) => ts,
                    None => {
                        debug!(title = %title_preview, "No publication date; skipping");
                        assembly.skipped += 1;
                        continue;
                    }
                },
            };
            let updated = content
                .updated_at
                .as_ref()
                .and_then(|raw| normalizer.normalize(&raw.token, raw.kind).ok())
                .unwrap_or(published);

            let entry = FeedEntry {
                id: entry_id(self.source.id_strategy, &key, &candidate.detail_url),
                title: candidate.title,
                link: candidate.detail_url,
                published,
                updated,
                content_html: content.html,
                author: candidate.author.or(content.author),
            };
            info!(title = %title_preview, published = %entry.published, "Accepted entry");
            ledger.add(key);
            assembly.entries.push(entry);
        }

        assembly.changed = !assembly.entries.is_empty();
        assembly
    }

    /// Fetch and extract one detail page.
    ///
    /// A transport failure degrades to empty content; a fetched page without
    /// the content region yields `None`.
    async fn detail(&self, url: &Url) -> Option<ExtractedContent> {
        match load_page(self.fetcher, url, self.source.detail_render.as_ref()).await {
            Ok(body) => {
                let document = Html::parse_document(&body);
                self.source.content.extract(&document, url)
            }
            Err(e) => {
                warn!(%url, error = %e, "Detail page unavailable; using empty content");
                Some(ExtractedContent::default())
            }
        }
    }
}

/// Normalize `raw`, applying `policy` when it is absent or unparsable.
pub fn resolve_timestamp(
    raw: Option<&RawTimestamp>,
    normalizer: &TimeNormalizer,
    policy: DatePolicy,
) -> Option<NormalizedTimestamp> {
    let parsed = raw.and_then(|raw| match normalizer.normalize(&raw.token, raw.kind) {
        Ok(ts) => Some(ts),
        Err(e) => {
            debug!(error = %e, "Falling back on date policy");
            None
        }
    });
    match (parsed, policy) {
        (Some(ts), _) => Some(ts),
        (None, DatePolicy::FallbackToNow) => Some(normalizer.now()),
        (None, DatePolicy::RequirePublishDate) => None,
    }
}

/// Stable id for an entry; the same title (or URL) always yields the same id.
pub fn entry_id(strategy: IdStrategy, key: &DedupKey, link: &Url) -> String {
    match strategy {
        IdStrategy::TitleHash => {
            format!("urn:sha256:{:x}", Sha256::digest(key.as_str().as_bytes()))
        }
        IdStrategy::Url => link.to_string(),
    }
}

/// Load `url`, rendering it when the source asks for it.
async fn load_page<F: PageFetcher>(
    fetcher: &F,
    url: &Url,
    render: Option<&RenderRequest>,
) -> Result<String, FetchError> {
    let Some(request) = render else {
        return fetcher.fetch(url).await;
    };
    let page = fetcher.render(url, request).await?;
    if let Some(option) = &request.select_option {
        if !page.option_selected {
            warn!(%url, %option, "Could not select dropdown option; using page default");
        }
    }
    Ok(page.body)
}

/// Outcome of one source run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub source: String,
    pub path: PathBuf,
    pub candidates: usize,
    pub new_entries: usize,
    /// Whether the feed file was rewritten.
    pub written: bool,
}

/// Run one source end to end.
///
/// Prior feeds are read from `deploy_dir` (the published copy) and
/// `output_dir` (the working copy); the new feed goes to `output_dir`. A
/// rewritten feed holds this run's entries followed by the newest prior
/// ones, up to the source's `retain_entries`.
#[instrument(level = "info", skip_all, fields(source = %source.name, url = %source.listing_url))]
pub async fn run_source<F: PageFetcher>(
    fetcher: &F,
    source: &CompiledSource,
    output_dir: &Path,
    deploy_dir: &Path,
) -> Result<RunReport, SourceError> {
    let path = output_dir.join(&source.atom_file);
    let mut ledger = Ledger::load(
        &[deploy_dir.join(&source.atom_file), path.clone()],
        source.normalizer.offset(),
    )
    .await;
    if ledger.is_empty() {
        debug!("No prior feed entries; every title counts as new");
    }

    let body = load_page(fetcher, &source.listing_url, source.listing_render.as_ref()).await?;
    let candidates: Vec<RawCandidate> = {
        let document = Html::parse_document(&body);
        listing::walk(&document, &source.listing, &source.base_url, source.max_entries).collect()
    };
    if candidates.is_empty() {
        warn!(bytes = body.len(), "Listing page yielded no candidates");
        return Err(SourceError::UnusableListing(source.listing_url.clone()));
    }
    info!(candidates = candidates.len(), "Walked listing page");

    let candidate_count = candidates.len();
    let assembly = Assembler::new(fetcher, source)
        .assemble(candidates, &mut ledger, source.max_entries)
        .await;

    let mut report = RunReport {
        source: source.name.clone(),
        path,
        candidates: candidate_count,
        new_entries: assembly.entries.len(),
        written: false,
    };

    if !assembly.changed {
        info!(
            path = %report.path.display(),
            duplicates = assembly.duplicates,
            skipped = assembly.skipped,
            "No new entries found. Feed not updated"
        );
        return Ok(report);
    }

    let entries = retained_entries(
        assembly.entries,
        ledger.into_prior_entries(),
        source.retain_entries,
    );
    let meta = FeedMeta {
        id: source.listing_url.to_string(),
        title: source.title.clone(),
        link: source.listing_url.clone(),
        subtitle: source.subtitle.clone(),
        updated: source.normalizer.now(),
    };
    atom::write_feed(&report.path, &meta, &entries).await?;
    report.written = true;
    info!(
        path = %report.path.display(),
        duplicates = assembly.duplicates,
        skipped = assembly.skipped,
        carried = entries.len() - report.new_entries,
        "Feed updated with {} new entries",
        report.new_entries
    );
    Ok(report)
}

/// Every entry in `fresh`, then the newest of `prior` while the total stays
/// within `retain`.
fn retained_entries(
    mut fresh: Vec<FeedEntry>,
    mut prior: Vec<FeedEntry>,
    retain: usize,
) -> Vec<FeedEntry> {
    prior.sort_by(|a, b| b.published.cmp(&a.published));
    let room = retain.saturating_sub(fresh.len());
    fresh.extend(prior.into_iter().take(room));
    fresh
}

//! Source configuration.
//!
//! Each feed source is described by a [`SourceConfig`] record, read from
//! YAML (the built-in `config/sources.yaml` unless `--config` names another
//! file). Records are validated and compiled into [`CompiledSource`]s at
//! startup: every selector is parsed, every URL resolved and every offset
//! checked before the first fetch, so a typo never surfaces mid-run.

use crate::error::ConfigError;
use crate::fetch::RenderRequest;
use crate::scrapers::content::ContentExtractor;
use crate::scrapers::listing::{ListingRules, ListingTimeRule};
use crate::time::{TimeNormalizer, TokenKind};
use itertools::Itertools;
use scraper::Selector;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const BUILTIN_SOURCES: &str = include_str!("../config/sources.yaml");

/// Selects every configured source on the command line.
pub const ALL_SOURCES: &str = "all";

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesFile {
    pub sources: Vec<SourceConfig>,
}

/// One feed source as written in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Name used with `--feeds`.
    pub name: String,
    /// Listing page URL.
    pub url: String,
    /// Base for resolving listing links; the listing URL when absent.
    pub base_url: Option<String>,
    /// Output file name, relative to the output directory.
    pub atom_file: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,

    pub item_selector: String,
    pub link_selector: String,
    pub title_selector: Option<String>,
    pub author_selector: Option<String>,
    pub required_path_marker: Option<String>,
    #[serde(default)]
    pub exclude_urls: Vec<String>,

    pub content: ContentLayout,
    #[serde(default)]
    pub timestamp: TimestampStrategy,
    #[serde(default)]
    pub date_policy: DatePolicy,
    #[serde(default)]
    pub id_strategy: IdStrategy,
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Entries kept in the written feed, new and carried over. Raised to
    /// `max_entries` when lower.
    #[serde(default = "default_retain_entries")]
    pub retain_entries: usize,

    /// Send a desktop browser `User-Agent`.
    #[serde(default)]
    pub browser_headers: bool,
    pub listing_render: Option<RenderConfig>,
    pub detail_render: Option<RenderConfig>,
}

fn default_utc_offset_hours() -> i32 {
    8
}

fn default_max_entries() -> usize {
    15
}

fn default_retain_entries() -> usize {
    100
}

fn default_render_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum ContentLayout {
    Single {
        selector: String,
    },
    Replies {
        item_selector: String,
        body_selector: String,
        time_selector: String,
    },
}

/// Where an entry's publication time comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum TimestampStrategy {
    /// Detail-page metadata, or the last reply's relative time.
    #[default]
    Detail,
    /// A token in the listing row.
    Listing {
        selector: String,
        attribute: Option<String>,
        kind: TokenKind,
    },
}

/// What to do with an entry whose publication time is missing or unparsable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePolicy {
    /// Skip the entry.
    RequirePublishDate,
    /// Use the current time in the region offset.
    #[default]
    FallbackToNow,
}

/// How entry ids are derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// `urn:sha256:` of the normalized title.
    #[default]
    TitleHash,
    /// The detail-page URL.
    Url,
}

/// Wait conditions for a page that needs rendering.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RenderConfig {
    pub wait_for: Option<String>,
    pub select_option: Option<String>,
    #[serde(default = "default_render_timeout_secs")]
    pub timeout_secs: u64,
}

/// Which token a compiled source normalizes for `published`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSource {
    Detail,
    Listing(TokenKind),
}

/// A validated source, ready to run.
#[derive(Debug, Clone)]
pub struct CompiledSource {
    pub name: String,
    pub listing_url: Url,
    pub base_url: Url,
    pub atom_file: String,
    pub title: String,
    pub subtitle: String,
    pub listing: ListingRules,
    pub content: ContentExtractor,
    pub timestamp: TimestampSource,
    pub date_policy: DatePolicy,
    pub id_strategy: IdStrategy,
    pub normalizer: TimeNormalizer,
    pub max_entries: usize,
    pub retain_entries: usize,
    pub browser_headers: bool,
    pub listing_render: Option<RenderRequest>,
    pub detail_render: Option<RenderRequest>,
}

impl SourceConfig {
    /// Validate this record and compile its selectors and URLs.
    pub fn compile(&self) -> Result<CompiledSource, ConfigError> {
        let listing_url = self.parse_url(&self.url)?;
        let base_url = match &self.base_url {
            Some(base) => self.parse_url(base)?,
            None => listing_url.clone(),
        };
        let normalizer =
            TimeNormalizer::from_hours(self.utc_offset_hours).ok_or(ConfigError::InvalidOffset {
                source_name: self.name.clone(),
                hours: self.utc_offset_hours,
            })?;

        let (time, timestamp) = match &self.timestamp {
            TimestampStrategy::Detail => (None, TimestampSource::Detail),
            TimestampStrategy::Listing {
                selector,
                attribute,
                kind,
            } => (
                Some(ListingTimeRule {
                    selector: self.selector(selector)?,
                    attribute: attribute.clone(),
                }),
                TimestampSource::Listing(*kind),
            ),
        };

        let listing = ListingRules {
            item: self.selector(&self.item_selector)?,
            link: self.selector(&self.link_selector)?,
            title: self.optional_selector(self.title_selector.as_deref())?,
            author: self.optional_selector(self.author_selector.as_deref())?,
            time,
            required_marker: self.required_path_marker.clone(),
            exclude: self
                .exclude_urls
                .iter()
                .map(|url| self.parse_url(url))
                .collect::<Result<HashSet<_>, _>>()?,
        };

        let content = match &self.content {
            ContentLayout::Single { selector } => ContentExtractor::Single {
                region: self.selector(selector)?,
            },
            ContentLayout::Replies {
                item_selector,
                body_selector,
                time_selector,
            } => ContentExtractor::Replies {
                item: self.selector(item_selector)?,
                body: self.selector(body_selector)?,
                time: self.selector(time_selector)?,
            },
        };

        Ok(CompiledSource {
            name: self.name.clone(),
            listing_url,
            base_url,
            atom_file: self.atom_file.clone(),
            title: self.title.clone(),
            subtitle: self.subtitle.clone(),
            listing,
            content,
            timestamp,
            date_policy: self.date_policy,
            id_strategy: self.id_strategy,
            normalizer,
            max_entries: self.max_entries,
            retain_entries: self.retain_entries.max(self.max_entries),
            browser_headers: self.browser_headers,
            listing_render: self.render_request(self.listing_render.as_ref())?,
            detail_render: self.render_request(self.detail_render.as_ref())?,
        })
    }

    fn selector(&self, selector: &str) -> Result<Selector, ConfigError> {
        Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
            source_name: self.name.clone(),
            selector: selector.to_string(),
            reason: e.to_string(),
        })
    }

    fn optional_selector(&self, selector: Option<&str>) -> Result<Option<Selector>, ConfigError> {
        selector.map(|s| self.selector(s)).transpose()
    }

    fn parse_url(&self, url: &str) -> Result<Url, ConfigError> {
        Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
            source_name: self.name.clone(),
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    fn render_request(
        &self,
        render: Option<&RenderConfig>,
    ) -> Result<Option<RenderRequest>, ConfigError> {
        let Some(render) = render else {
            return Ok(None);
        };
        Ok(Some(RenderRequest {
            wait_for: self.optional_selector(render.wait_for.as_deref())?,
            select_option: render.select_option.clone(),
            timeout: Duration::from_secs(render.timeout_secs),
            ..RenderRequest::default()
        }))
    }
}

/// Parse a sources document, rejecting empty lists and duplicate names.
pub fn parse_sources(yaml: &str) -> Result<Vec<SourceConfig>, ConfigError> {
    let file: SourcesFile = serde_yaml::from_str(yaml)?;
    if file.sources.is_empty() {
        return Err(ConfigError::Empty);
    }
    if let Some(name) = file.sources.iter().map(|s| &s.name).duplicates().next() {
        return Err(ConfigError::DuplicateSource(name.clone()));
    }
    Ok(file.sources)
}

/// Load sources from `path`, or the built-in set when `None`.
pub async fn load_sources(path: Option<&Path>) -> Result<Vec<SourceConfig>, ConfigError> {
    let sources = match path {
        Some(path) => {
            let yaml = tokio::fs::read_to_string(path).await?;
            let sources = parse_sources(&yaml)?;
            info!(path = %path.display(), count = sources.len(), "Loaded source configuration");
            sources
        }
        None => {
            let sources = parse_sources(BUILTIN_SOURCES)?;
            debug!(count = sources.len(), "Using built-in sources");
            sources
        }
    };
    Ok(sources)
}

/// Keep the sources named in `names`, in configuration order.
///
/// [`ALL_SOURCES`] (or an empty list) keeps every source. Unknown names are
/// rejected.
pub fn select_sources(
    sources: Vec<SourceConfig>,
    names: &[String],
) -> Result<Vec<SourceConfig>, ConfigError> {
    if names.is_empty() || names.iter().any(|n| n == ALL_SOURCES) {
        return Ok(sources);
    }
    if let Some(unknown) = names
        .iter()
        .find(|name| !sources.iter().any(|s| &s.name == *name))
    {
        return Err(ConfigError::UnknownSource(unknown.clone()));
    }
    Ok(sources
        .into_iter()
        .filter(|s| names.contains(&s.name))
        .collect())
}

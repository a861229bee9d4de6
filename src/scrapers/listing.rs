//! Listing page walker.
//!
//! Turns a listing document (forum section, news column) into a lazy
//! sequence of [`RawCandidate`]s. Items are visited in document order; an
//! item that does not match the configured selectors is skipped, never
//! fatal. The walk stops after `cap` candidates have been produced.

use crate::models::RawCandidate;
use crate::utils::{collapse_whitespace, strip_non_printable};
use scraper::html::Select;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Where a listing-row timestamp token is read from.
#[derive(Debug, Clone)]
pub struct ListingTimeRule {
    pub selector: Selector,
    /// Read this attribute instead of the element text.
    pub attribute: Option<String>,
}

impl ListingTimeRule {
    fn token(&self, item: ElementRef<'_>) -> Option<String> {
        let element = item.select(&self.selector).next()?;
        let token = match &self.attribute {
            Some(name) => element.value().attr(name)?.trim().to_string(),
            None => element_text(element),
        };
        (!token.is_empty()).then_some(token)
    }
}

/// Compiled selectors and filters for one source's listing page.
#[derive(Debug, Clone)]
pub struct ListingRules {
    /// One match per listing row.
    pub item: Selector,
    /// The anchor carrying the detail-page `href`.
    pub link: Selector,
    /// Title element, when it is not the link itself.
    pub title: Option<Selector>,
    pub author: Option<Selector>,
    pub time: Option<ListingTimeRule>,
    /// Substring the raw `href` must contain.
    pub required_marker: Option<String>,
    /// Resolved URLs that are never yielded.
    pub exclude: HashSet<Url>,
}

/// Why a listing row produced no candidate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SkipReason {
    #[error("no element matches the {0} selector")]
    MissingSelector(&'static str),
    #[error("link element has no href")]
    MissingHref,
    #[error("href {0:?} lacks the required path marker")]
    MissingMarker(String),
    #[error("title is empty")]
    EmptyTitle,
    #[error("href {0:?} cannot be resolved")]
    Unresolvable(String),
    #[error("{0} is excluded")]
    Excluded(Url),
}

/// Lazy iterator over the candidates of one listing document.
pub struct ListingWalker<'a> {
    items: Select<'a, 'a>,
    rules: &'a ListingRules,
    base: &'a Url,
    cap: usize,
    yielded: usize,
}

/// Walk `document`, resolving links against `base`, yielding at most `cap` candidates.
///
/// Rows are visited in document order and read only as the iterator is
/// advanced. Rows without a usable link or title are skipped and logged.
///
/// # Arguments
///
/// * `document` - The parsed listing page
/// * `rules` - Compiled selectors, href marker and exclusion set of the source
/// * `base` - URL relative links are resolved against
/// * `cap` - Maximum number of candidates to yield
///
/// # Returns
///
/// A [`ListingWalker`] borrowing `document` for as long as it is used.
///
/// # Examples
///
/// ```ignore
/// let document = Html::parse_document(&body);
/// let candidates: Vec<RawCandidate> = walk(&document, &source.listing, &source.base_url, 15).collect();
/// ```
pub fn walk<'a>(
    document: &'a Html,
    rules: &'a ListingRules,
    base: &'a Url,
    cap: usize,
) -> ListingWalker<'a> {
    ListingWalker {
        items: document.select(&rules.item),
        rules,
        base,
        cap,
        yielded: 0,
    }
}

impl ListingWalker<'_> {
    fn candidate(&self, item: ElementRef<'_>) -> Result<RawCandidate, SkipReason> {
        let rules = self.rules;
        let link = item
            .select(&rules.link)
            .next()
            .ok_or(SkipReason::MissingSelector("link"))?;
        let href = link
            .value()
            .attr("href")
            .map(str::trim)
            .filter(|href| !href.is_empty())
            .ok_or(SkipReason::MissingHref)?;

        if let Some(marker) = &rules.required_marker {
            if !href.contains(marker.as_str()) {
                return Err(SkipReason::MissingMarker(href.to_string()));
            }
        }

        let detail_url = self
            .base
            .join(href)
            .map_err(|_| SkipReason::Unresolvable(href.to_string()))?;
        if rules.exclude.contains(&detail_url) {
            return Err(SkipReason::Excluded(detail_url));
        }

        let title_element = match &rules.title {
            Some(selector) => item
                .select(selector)
                .next()
                .ok_or(SkipReason::MissingSelector("title"))?,
            None => link,
        };
        let title = element_text(title_element);
        if title.is_empty() {
            return Err(SkipReason::EmptyTitle);
        }

        let author = rules
            .author
            .as_ref()
            .and_then(|selector| item.select(selector).next())
            .map(element_text)
            .filter(|author| !author.is_empty());
        let listing_time = rules.time.as_ref().and_then(|rule| rule.token(item));

        Ok(RawCandidate {
            title,
            detail_url,
            author,
            listing_time,
        })
    }
}

impl Iterator for ListingWalker<'_> {
    type Item = RawCandidate;

    fn next(&mut self) -> Option<RawCandidate> {
        while self.yielded < self.cap {
            let item = self.items.next()?;
            match self.candidate(item) {
                Ok(candidate) => {
                    self.yielded += 1;
                    return Some(candidate);
                }
                Err(reason) => debug!(%reason, "Skipping listing item"),
            }
        }
        None
    }
}

/// Visible text of an element, whitespace collapsed.
fn element_text(element: ElementRef<'_>) -> String {
    strip_non_printable(&collapse_whitespace(&element.text().collect::<String>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(s: &str) -> Selector {
        Selector::parse(s).unwrap()
    }

    fn forum_rules() -> ListingRules {
        ListingRules {
            item: selector("tbody.forumdisplay_thread"),
            link: selector("span.tsubject a"),
            title: None,
            author: Some(selector("td.author cite a")),
            time: None,
            required_marker: None,
            exclude: HashSet::new(),
        }
    }

    fn forum_row(title: &str, href: &str) -> String {
        format!(
            r#"<tbody class="forumdisplay_thread"><tr>
                 <td><span class="tsubject"><a href="{href}">{title}</a></span></td>
                 <td class="author"><cite><a href="/u/1">阿明</a></cite></td>
               </tr></tbody>"#
        )
    }

    fn page(rows: &[String]) -> Html {
        Html::parse_document(&format!("<html><body><table>{}</table></body></html>", rows.concat()))
    }

    fn base() -> Url {
        Url::parse("https://www.discuss.com.hk/forumdisplay.php?fid=57").unwrap()
    }

    #[test]
    fn test_walk_resolves_relative_links_in_order() {
        let doc = page(&[
            forum_row("First  thread", "viewthread.php?tid=1"),
            forum_row("Second", "/viewthread.php?tid=2"),
        ]);
        let rules = forum_rules();
        let base = base();
        let candidates: Vec<_> = walk(&doc, &rules, &base, 15).collect();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].title, "First thread");
        assert_eq!(
            candidates[0].detail_url.as_str(),
            "https://www.discuss.com.hk/viewthread.php?tid=1"
        );
        assert_eq!(candidates[0].author.as_deref(), Some("阿明"));
        assert_eq!(candidates[1].title, "Second");
    }

    #[test]
    fn test_walk_never_exceeds_cap() {
        let rows: Vec<String> = (0..100)
            .map(|i| forum_row(&format!("Thread {i}"), &format!("viewthread.php?tid={i}")))
            .collect();
        let doc = page(&rows);
        let rules = forum_rules();
        let base = base();

        assert_eq!(walk(&doc, &rules, &base, 15).count(), 15);
        assert_eq!(walk(&doc, &rules, &base, 500).count(), 100);
    }

    #[test]
    fn test_walk_skips_rows_without_link_or_title() {
        let doc = page(&[
            r#"<tbody class="forumdisplay_thread"><tr><td>announcement</td></tr></tbody>"#.to_string(),
            forum_row("   ", "viewthread.php?tid=9"),
            r#"<tbody class="forumdisplay_thread"><tr><td><span class="tsubject"><a>no href</a></span></td></tr></tbody>"#.to_string(),
            forum_row("Kept", "viewthread.php?tid=3"),
        ]);
        let rules = forum_rules();
        let base = base();
        let titles: Vec<_> = walk(&doc, &rules, &base, 15).map(|c| c.title).collect();
        assert_eq!(titles, vec!["Kept"]);
    }

    #[test]
    fn test_skipped_rows_do_not_count_toward_cap() {
        let doc = page(&[
            forum_row("", "viewthread.php?tid=1"),
            forum_row("A", "viewthread.php?tid=2"),
            forum_row("B", "viewthread.php?tid=3"),
        ]);
        let rules = forum_rules();
        let base = base();
        let titles: Vec<_> = walk(&doc, &rules, &base, 2).map(|c| c.title).collect();
        assert_eq!(titles, vec!["A", "B"]);
    }

    #[test]
    fn test_marker_exclusion_and_title_selector() {
        let html = r#"<html><body>
            <div class="thread-container-parent">
              <a class="forum-thread-container" href="/forum/show/47100"><span class="thread-title-content">Pinned rules</span></a>
            </div>
            <div class="thread-container-parent">
              <a class="forum-thread-container" href="/news/1"><span class="thread-title-content">Not a thread</span></a>
            </div>
            <div class="thread-container-parent">
              <a class="forum-thread-container" href="/forum/show/50001"><span class="thread-title-content"> 里數卡 </span><span>12</span></a>
            </div>
        </body></html>"#;
        let doc = Html::parse_document(html);
        let rules = ListingRules {
            item: selector(".thread-container-parent"),
            link: selector("a.forum-thread-container"),
            title: Some(selector(".thread-title-content")),
            author: None,
            time: None,
            required_marker: Some("forum".to_string()),
            exclude: [Url::parse("https://www.hongkongcard.com/forum/show/47100").unwrap()]
                .into_iter()
                .collect(),
        };
        let base = Url::parse("https://www.hongkongcard.com/forum").unwrap();
        let candidates: Vec<_> = walk(&doc, &rules, &base, 15).collect();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "里數卡");
        assert_eq!(
            candidates[0].detail_url.as_str(),
            "https://www.hongkongcard.com/forum/show/50001"
        );
    }

    #[test]
    fn test_listing_time_text_and_attribute() {
        let html = r#"<html><body>
            <div class="item"><a class="t" href="/a/1">News one</a>
              <div class="listing-date"><span class="font-en"> 09:45 </span></div>
              <em title="2024-05-01 18:00">yesterday</em></div>
            <div class="item"><a class="t" href="/a/2">News two</a></div>
        </body></html>"#;
        let doc = Html::parse_document(html);
        let base = Url::parse("https://inews.hket.com/").unwrap();
        let mut rules = ListingRules {
            item: selector("div.item"),
            link: selector("a.t"),
            title: None,
            author: None,
            time: Some(ListingTimeRule {
                selector: selector(".listing-date .font-en"),
                attribute: None,
            }),
            required_marker: None,
            exclude: HashSet::new(),
        };

        let tokens: Vec<_> = walk(&doc, &rules, &base, 15).map(|c| c.listing_time).collect();
        assert_eq!(tokens, vec![Some("09:45".to_string()), None]);

        rules.time = Some(ListingTimeRule {
            selector: selector("em"),
            attribute: Some("title".to_string()),
        });
        let first = walk(&doc, &rules, &base, 15).next().unwrap();
        assert_eq!(first.listing_time.as_deref(), Some("2024-05-01 18:00"));
    }

    #[test]
    fn test_walk_is_restartable_per_invocation() {
        let doc = page(&[forum_row("Only", "viewthread.php?tid=1")]);
        let rules = forum_rules();
        let base = base();
        assert_eq!(walk(&doc, &rules, &base, 15).count(), 1);
        assert_eq!(walk(&doc, &rules, &base, 15).count(), 1);
    }
}

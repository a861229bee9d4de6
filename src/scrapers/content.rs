//! Detail-page content extraction.
//!
//! A [`ContentExtractor`] locates the content region of a detail page,
//! cleans it with [`markup::clean_fragment`], and pulls publication
//! metadata. A page without the region yields `None`: non-article pages
//! are expected, not errors.
//!
//! # Metadata precedence
//!
//! 1. JSON-LD (`datePublished`, `dateModified`, `author`)
//! 2. `<meta name="publish_date">`, then `article:published_time` /
//!    `article:modified_time`
//!
//! Reply-style threads carry no page metadata; their timestamp is the
//! relative time of the last reply.

use super::markup;
use crate::models::{ExtractedContent, RawTimestamp};
use crate::time::TokenKind;
use crate::utils::collapse_whitespace;
use html_escape::encode_text;
use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

static JSON_LD: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());
static PUBLISH_META: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[name="publish_date"], meta[property="article:published_time"]"#)
        .unwrap()
});
static MODIFIED_META: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="article:modified_time"]"#).unwrap());

/// How a source lays out its detail-page content.
#[derive(Debug, Clone)]
pub enum ContentExtractor {
    /// One primary region, e.g. an article body or a forum's first post.
    Single { region: Selector },
    /// Repeated reply blocks, each with a body and a relative time.
    Replies {
        item: Selector,
        body: Selector,
        time: Selector,
    },
}

impl ContentExtractor {
    /// Extract content from a parsed detail page located at `page_url`.
    pub fn extract(&self, document: &Html, page_url: &Url) -> Option<ExtractedContent> {
        match self {
            Self::Single { region } => extract_single(document, region, page_url),
            Self::Replies { item, body, time } => {
                extract_replies(document, item, body, time, page_url)
            }
        }
    }
}

fn extract_single(document: &Html, region: &Selector, page_url: &Url) -> Option<ExtractedContent> {
    let node = document.select(region).next()?;
    let body = markup::clean_fragment(node, page_url);
    let meta = PageMetadata::from_document(document);

    let published_at = meta
        .published
        .map(|token| RawTimestamp::new(token, TokenKind::Iso8601));
    let updated_at = meta
        .updated
        .map(|token| RawTimestamp::new(token, TokenKind::Iso8601));

    Some(ExtractedContent {
        html: with_banner(published_at.as_ref(), updated_at.as_ref(), body),
        published_at,
        updated_at,
        author: meta.author,
    })
}

fn extract_replies(
    document: &Html,
    item: &Selector,
    body: &Selector,
    time: &Selector,
    page_url: &Url,
) -> Option<ExtractedContent> {
    let replies: Vec<(String, String)> = document
        .select(item)
        .filter_map(|reply| {
            let reply_body = reply.select(body).next()?;
            let reply_time = reply.select(time).next()?;
            let stamp = collapse_whitespace(&reply_time.text().collect::<String>());
            Some((stamp, markup::clean_fragment(reply_body, page_url)))
        })
        .collect();

    let (last_stamp, _) = replies.last()?;
    let published_at = (!last_stamp.is_empty())
        .then(|| RawTimestamp::new(last_stamp.clone(), TokenKind::Relative));

    // Threads list oldest first; the feed shows the newest reply on top.
    let body = replies
        .iter()
        .rev()
        .map(|(stamp, html)| format!("<div><strong>{}:</strong> {}</div>", encode_text(stamp), html))
        .join("<br>");

    Some(ExtractedContent {
        html: with_banner(published_at.as_ref(), None, body),
        published_at,
        updated_at: None,
        author: None,
    })
}

/// Prefix `body` with a "Published on / Updated on" line when dated.
fn with_banner(
    published: Option<&RawTimestamp>,
    updated: Option<&RawTimestamp>,
    body: String,
) -> String {
    let Some(published) = published else {
        return body;
    };
    let mut banner = format!("<p>Published on: {}", encode_text(&published.token));
    if let Some(updated) = updated {
        banner.push_str(&format!(" Updated on: {}", encode_text(&updated.token)));
    }
    banner.push_str("</p>");
    banner + &body
}

#[derive(Debug, Default, PartialEq, Eq)]
struct PageMetadata {
    published: Option<String>,
    updated: Option<String>,
    author: Option<String>,
}

impl PageMetadata {
    fn from_document(document: &Html) -> Self {
        let mut meta = json_ld_metadata(document).unwrap_or_default();
        if meta.published.is_none() {
            meta.published = meta_content(document, &PUBLISH_META);
        }
        if meta.updated.is_none() {
            meta.updated = meta_content(document, &MODIFIED_META);
        }
        meta
    }
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .filter_map(|meta| meta.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_string)
}

fn json_ld_metadata(document: &Html) -> Option<PageMetadata> {
    document.select(&JSON_LD).find_map(|script| {
        let raw = script.text().collect::<String>();
        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Ignoring unparsable JSON-LD block");
                return None;
            }
        };
        let node = find_dated_node(&value)?;
        Some(PageMetadata {
            published: string_field(node, "datePublished"),
            updated: string_field(node, "dateModified"),
            author: node.get("author").and_then(author_name),
        })
    })
}

/// First JSON-LD object carrying `datePublished`, searching arrays and `@graph`.
fn find_dated_node(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(map) if map.contains_key("datePublished") => Some(map),
        Value::Object(map) => map
            .get("@graph")
            .and_then(find_dated_node)
            .or_else(|| map.get("mainEntityOfPage").and_then(find_dated_node)),
        Value::Array(items) => items.iter().find_map(find_dated_node),
        _ => None,
    }
}

fn string_field(node: &Map<String, Value>, key: &str) -> Option<String> {
    node.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn author_name(value: &Value) -> Option<String> {
    match value {
        Value::String(name) => Some(name.trim().to_string()).filter(|n| !n.is_empty()),
        Value::Object(map) => string_field(map, "name"),
        Value::Array(items) => items.iter().find_map(author_name),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_url() -> Url {
        Url::parse("https://inews.hket.com/article/3761234").unwrap()
    }

    fn article() -> ContentExtractor {
        ContentExtractor::Single {
            region: Selector::parse("div.article-detail-content-container").unwrap(),
        }
    }

    #[test]
    fn test_missing_region_is_none() {
        let doc = Html::parse_document("<html><body><div class='video-page'>clip</div></body></html>");
        assert!(article().extract(&doc, &page_url()).is_none());
    }

    #[test]
    fn test_json_ld_metadata_and_banner() {
        let doc = Html::parse_document(
            r#"<html><head>
                <meta name="publish_date" content="2024-01-01T00:00:00+0800">
                <script type="application/ld+json">
                  {"@context":"https://schema.org","@type":"NewsArticle",
                   "datePublished":"2024-05-01T18:00:00+08:00",
                   "dateModified":"2024-05-01T19:30:00+08:00",
                   "author":{"@type":"Person","name":"記者甲"}}
                </script></head>
               <body><div class="article-detail-content-container"><p>股市收市</p><p></p></div></body></html>"#,
        );
        let content = article().extract(&doc, &page_url()).unwrap();

        assert_eq!(
            content.published_at,
            Some(RawTimestamp::new("2024-05-01T18:00:00+08:00", TokenKind::Iso8601))
        );
        assert_eq!(
            content.updated_at.as_ref().map(|t| t.token.as_str()),
            Some("2024-05-01T19:30:00+08:00")
        );
        assert_eq!(content.author.as_deref(), Some("記者甲"));
        assert!(content.html.starts_with(
            "<p>Published on: 2024-05-01T18:00:00+08:00 Updated on: 2024-05-01T19:30:00+08:00</p>"
        ));
        assert!(content.html.contains("<p>股市收市</p>"));
        assert!(!content.html.contains("<p></p>"));
    }

    #[test]
    fn test_json_ld_graph_shape() {
        let doc = Html::parse_document(
            r#"<html><head><script type="application/ld+json">
                {"@graph":[{"@type":"WebSite"},{"@type":"Article","datePublished":"2024-05-01T10:00:00Z","author":[{"name":"編輯部"}]}]}
               </script></head><body><div class="article-detail-content-container">x</div></body></html>"#,
        );
        let content = article().extract(&doc, &page_url()).unwrap();
        assert_eq!(
            content.published_at.map(|t| t.token),
            Some("2024-05-01T10:00:00Z".to_string())
        );
        assert_eq!(content.author.as_deref(), Some("編輯部"));
        assert!(content.updated_at.is_none());
    }

    #[test]
    fn test_meta_fallback_when_json_ld_is_broken() {
        let doc = Html::parse_document(
            r#"<html><head>
                <script type="application/ld+json">{not json</script>
                <meta name="publish_date" content="2024-05-01T18:00:00+0800">
               </head><body><div class="t_msgfont">樓主內容</div></body></html>"#,
        );
        let extractor = ContentExtractor::Single {
            region: Selector::parse("div.t_msgfont").unwrap(),
        };
        let content = extractor.extract(&doc, &page_url()).unwrap();
        assert_eq!(
            content.published_at,
            Some(RawTimestamp::new("2024-05-01T18:00:00+0800", TokenKind::Iso8601))
        );
        assert!(content.html.starts_with("<p>Published on: 2024-05-01T18:00:00+0800</p><div class=\"t_msgfont\">"));
    }

    #[test]
    fn test_undated_page_has_no_banner() {
        let doc = Html::parse_document(
            r#"<html><body><div class="article-detail-content-container"><p>body</p></div></body></html>"#,
        );
        let content = article().extract(&doc, &page_url()).unwrap();
        assert!(content.published_at.is_none());
        assert!(content.html.starts_with("<div class=\"article-detail-content-container\">"));
    }

    fn replies() -> ContentExtractor {
        ContentExtractor::Replies {
            item: Selector::parse("div.reply-item-wrapper").unwrap(),
            body: Selector::parse("div.reply-view-root").unwrap(),
            time: Selector::parse("span.content-thread-create-time").unwrap(),
        }
    }

    #[test]
    fn test_replies_newest_first_with_last_time() {
        let doc = Html::parse_document(
            r#"<html><body>
              <div class="reply-item-wrapper"><span class="content-thread-create-time">2天前</span><div class="reply-view-root">first</div></div>
              <div class="reply-item-wrapper"><div class="reply-view-root">no time, skipped</div></div>
              <div class="reply-item-wrapper"><span class="content-thread-create-time"> 3小時前 </span><div class="reply-view-root">latest</div></div>
            </body></html>"#,
        );
        let content = replies().extract(&doc, &page_url()).unwrap();

        assert_eq!(
            content.published_at,
            Some(RawTimestamp::new("3小時前", TokenKind::Relative))
        );
        assert!(content.html.starts_with("<p>Published on: 3小時前</p>"));
        let latest = content.html.find("latest").unwrap();
        let first = content.html.find("first").unwrap();
        assert!(latest < first);
        assert!(content.html.contains("<div><strong>2天前:</strong> <div class=\"reply-view-root\">first</div></div>"));
        assert!(!content.html.contains("skipped"));
        assert_eq!(content.html.matches("<br>").count(), 1);
    }

    #[test]
    fn test_thread_without_replies_is_none() {
        let doc = Html::parse_document("<html><body><select><option>最新</option></select></body></html>");
        assert!(replies().extract(&doc, &page_url()).is_none());
    }
}

//! Atom 1.0 feed writer.
//!
//! Entries are written newest first by `published`; entries published at
//! the same instant keep the order they were accepted in. Entry content is
//! HTML carried as escaped text (`type="html"`). The document must stay
//! readable by [`Ledger::load`](crate::ledger::Ledger::load), which rebuilds
//! the dedup set from it on the next run.

use crate::error::SinkError;
use crate::models::{FeedEntry, FeedMeta};
use crate::time::NormalizedTimestamp;
use chrono::SecondsFormat;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::borrow::Cow;
use std::io::Write;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

/// Render `meta` and `entries` as an Atom document.
///
/// # Arguments
///
/// * `meta` - Feed-level id, title, link, subtitle and update time
/// * `entries` - Entries in any order; they are written newest first
///
/// # Returns
///
/// The serialized document, with characters XML 1.0 forbids removed from
/// every text value.
///
/// # Examples
///
/// ```ignore
/// let xml = render_feed(&meta, &entries)?;
/// assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
/// ```
pub fn render_feed(meta: &FeedMeta, entries: &[FeedEntry]) -> Result<String, SinkError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut feed = BytesStart::new("feed");
    feed.push_attribute(("xmlns", ATOM_NS));
    writer.write_event(Event::Start(feed))?;

    write_text_element(&mut writer, "id", &meta.id)?;
    write_text_element(&mut writer, "title", &meta.title)?;
    write_text_element(&mut writer, "updated", &atom_date(&meta.updated))?;
    write_link(&mut writer, meta.link.as_str())?;
    if !meta.subtitle.is_empty() {
        write_text_element(&mut writer, "subtitle", &meta.subtitle)?;
    }
    write_author(&mut writer, &meta.title)?;

    let mut generator = BytesStart::new("generator");
    generator.push_attribute(("version", env!("CARGO_PKG_VERSION")));
    writer.write_event(Event::Start(generator))?;
    writer.write_event(Event::Text(BytesText::new(env!("CARGO_PKG_NAME"))))?;
    writer.write_event(Event::End(BytesEnd::new("generator")))?;

    let mut ordered: Vec<&FeedEntry> = entries.iter().collect();
    ordered.sort_by(|a, b| b.published.cmp(&a.published));

    for entry in ordered {
        writer.write_event(Event::Start(BytesStart::new("entry")))?;
        write_text_element(&mut writer, "id", &entry.id)?;
        write_text_element(&mut writer, "title", &entry.title)?;
        write_text_element(&mut writer, "updated", &atom_date(&entry.updated))?;
        write_text_element(&mut writer, "published", &atom_date(&entry.published))?;
        write_link(&mut writer, entry.link.as_str())?;
        if let Some(author) = &entry.author {
            write_author(&mut writer, author)?;
        }

        let mut content = BytesStart::new("content");
        content.push_attribute(("type", "html"));
        writer.write_event(Event::Start(content))?;
        writer.write_event(Event::Text(BytesText::new(&xml_safe(&entry.content_html))))?;
        writer.write_event(Event::End(BytesEnd::new("content")))?;

        writer.write_event(Event::End(BytesEnd::new("entry")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("feed")))?;

    let mut out = writer.into_inner();
    out.push(b'\n');
    Ok(String::from_utf8(out)?)
}

/// Render and write the feed to `path`, replacing any previous file.
///
/// The document is written to a sibling temporary file first and renamed
/// into place, so a reader never sees a half-written feed.
#[instrument(level = "info", skip_all, fields(path = %path.display(), entries = entries.len()))]
pub async fn write_feed(path: &Path, meta: &FeedMeta, entries: &[FeedEntry]) -> Result<(), SinkError> {
    let document = render_feed(meta, entries)?;
    let tmp_path = path.with_extension("xml.tmp");
    fs::write(&tmp_path, document.as_bytes()).await?;
    fs::rename(&tmp_path, path).await?;
    info!(bytes = document.len(), "Wrote Atom feed");
    Ok(())
}

fn write_text_element<W: Write>(w: &mut Writer<W>, name: &str, text: &str) -> Result<(), SinkError> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    w.write_event(Event::Text(BytesText::new(&xml_safe(text))))?;
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_link<W: Write>(w: &mut Writer<W>, href: &str) -> Result<(), SinkError> {
    let mut link = BytesStart::new("link");
    link.push_attribute(("href", href));
    link.push_attribute(("rel", "alternate"));
    w.write_event(Event::Empty(link))?;
    Ok(())
}

fn write_author<W: Write>(w: &mut Writer<W>, name: &str) -> Result<(), SinkError> {
    w.write_event(Event::Start(BytesStart::new("author")))?;
    write_text_element(w, "name", name)?;
    w.write_event(Event::End(BytesEnd::new("author")))?;
    Ok(())
}

fn atom_date(ts: &NormalizedTimestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Drop characters XML 1.0 does not allow.
fn xml_safe(input: &str) -> Cow<'_, str> {
    let allowed = |c: char| {
        matches!(c, '\t' | '\n' | '\r')
            || (c >= '\u{20}' && c != '\u{FFFE}' && c != '\u{FFFF}')
    };
    if input.chars().all(allowed) {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(input.chars().filter(|&c| allowed(c)).collect())
    }
}

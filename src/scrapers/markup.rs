//! Sanitizing serializer for detail-page content regions.
//!
//! Rather than mutating the parsed tree, the region is re-serialized with
//! the cleanup rules applied on the way out:
//!
//! - `script`, `style`, `iframe` and `noscript` subtrees are dropped
//! - `on*` event-handler attributes and comments are dropped
//! - paragraphs with no visible text are dropped
//! - images take their deferred-load source as `src` (absolute), get an
//!   `alt`, and a max-width style
//! - control characters other than whitespace are stripped from text and
//!   attribute values

use crate::utils::strip_non_printable;
use html_escape::{encode_double_quoted_attribute, encode_text};
use scraper::{ElementRef, Node};
use url::Url;

const NOISE_TAGS: [&str; 4] = ["script", "style", "iframe", "noscript"];

const VOID_TAGS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Deferred-load attributes, most preferred first.
const LAZY_SRC_ATTRS: [&str; 3] = ["data-src", "data-original", "data-lazy-src"];

pub const IMAGE_STYLE: &str = "max-width:100%; height:auto;";

/// Serialize `root` (outer markup included) with the cleanup rules applied.
///
/// Relative image sources are resolved against `page_url`.
pub fn clean_fragment(root: ElementRef<'_>, page_url: &Url) -> String {
    let mut out = String::new();
    write_element(root, page_url, &mut out);
    out
}

fn write_element(element: ElementRef<'_>, page_url: &Url, out: &mut String) {
    let name = element.value().name();
    if NOISE_TAGS.contains(&name) {
        return;
    }
    if name == "p" && !has_visible_text(element) {
        return;
    }

    out.push('<');
    out.push_str(name);
    if name == "img" {
        write_image_attrs(element, page_url, out);
    } else {
        for (attr, value) in element.value().attrs() {
            write_attr(out, attr, value);
        }
    }
    out.push('>');

    if VOID_TAGS.contains(&name) {
        return;
    }

    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&encode_text(&strip_non_printable(text))),
            Node::Element(_) => {
                if let Some(child_element) = ElementRef::wrap(child) {
                    write_element(child_element, page_url, out);
                }
            }
            _ => {}
        }
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn write_image_attrs(image: ElementRef<'_>, page_url: &Url, out: &mut String) {
    let element = image.value();
    let source = LAZY_SRC_ATTRS
        .iter()
        .chain(std::iter::once(&"src"))
        .filter_map(|attr| element.attr(attr))
        .map(str::trim)
        .find(|src| !src.is_empty());

    let Some(source) = source else {
        for (attr, value) in element.attrs() {
            write_attr(out, attr, value);
        }
        return;
    };

    let resolved = page_url
        .join(source)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| source.to_string());
    write_attr(out, "src", &resolved);
    for (attr, value) in element.attrs() {
        if matches!(attr, "src" | "alt" | "style") || LAZY_SRC_ATTRS.contains(&attr) {
            continue;
        }
        write_attr(out, attr, value);
    }
    write_attr(out, "alt", element.attr("alt").unwrap_or(""));
    write_attr(out, "style", IMAGE_STYLE);
}

fn write_attr(out: &mut String, attr: &str, value: &str) {
    if attr.to_ascii_lowercase().starts_with("on") {
        return;
    }
    out.push(' ');
    out.push_str(attr);
    out.push_str("=\"");
    out.push_str(&encode_double_quoted_attribute(&strip_non_printable(value)));
    out.push('"');
}

/// Whether `element` has non-blank text outside noise subtrees.
fn has_visible_text(element: ElementRef<'_>) -> bool {
    element.children().any(|child| match child.value() {
        Node::Text(text) => !text.trim().is_empty(),
        Node::Element(e) if NOISE_TAGS.contains(&e.name()) => false,
        Node::Element(_) => ElementRef::wrap(child).is_some_and(has_visible_text),
        _ => false,
    })
}

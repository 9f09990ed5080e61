use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use regex::Regex;
use std::sync::OnceLock;

use crate::article::{Article, SourceMeta};
use crate::storage::FeedDescriptor;
use crate::util::{clean_description, first_image_src, strip_control_chars};

/// Description excerpts are cut to this many characters.
pub const DESCRIPTION_MAX_CHARS: usize = 200;

/// Timestamp layouts seen in the wild that neither RFC 3339 nor RFC 2822 accept.
const LENIENT_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%a, %d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
];

const RSS_ENVELOPE_OPEN: &str = r#"<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/" xmlns:content="http://purl.org/rss/1.0/modules/content/" xmlns:dc="http://purl.org/dc/elements/1.1/"><channel><title>salvaged</title>"#;
const RSS_ENVELOPE_CLOSE: &str = "</channel></rss>";
const ATOM_ENVELOPE_OPEN: &str = r#"<feed xmlns="http://www.w3.org/2005/Atom" xmlns:media="http://search.yahoo.com/mrss/"><title>salvaged</title>"#;
const ATOM_ENVELOPE_CLOSE: &str = "</feed>";

/// Outcome of parsing one feed document.
///
/// Parsing never fails outright: a broken document yields whatever entries
/// could be recovered plus a `warning` describing what went wrong.
#[derive(Debug, Default)]
pub struct ParseResult {
    pub articles: Vec<Article>,
    /// Entries dropped for a missing title/link or an unrecoverable fragment
    pub skipped: usize,
    pub warning: Option<String>,
}

/// Parse a feed body into normalized articles for `feed`.
///
/// `now` stands in for the published time of entries that carry no usable
/// timestamp; those articles are flagged `published_inferred`.
pub fn parse_feed(bytes: &[u8], feed: &FeedDescriptor, now: DateTime<Utc>) -> ParseResult {
    match parse_document(bytes) {
        Ok(parsed) => {
            let mut result = ParseResult::default();
            collect_entries(&mut result, parsed, feed, now);
            result
        }
        Err(e) => salvage(bytes, feed, now, e.to_string()),
    }
}

fn parse_document(bytes: &[u8]) -> Result<Feed, feed_rs::parser::ParseFeedError> {
    parser::Builder::new()
        .timestamp_parser(parse_timestamp_lenient)
        .build()
        .parse(bytes)
}

fn collect_entries(result: &mut ParseResult, parsed: Feed, feed: &FeedDescriptor, now: DateTime<Utc>) {
    let feed_title = if feed.title.trim().is_empty() {
        parsed
            .title
            .as_ref()
            .map(|t| t.content.trim().to_string())
            .unwrap_or_default()
    } else {
        feed.title.clone()
    };

    for entry in parsed.entries {
        match to_article(entry, feed, &feed_title, now) {
            Some(article) => result.articles.push(article),
            None => result.skipped += 1,
        }
    }
}

/// Per-fragment recovery for documents that fail to parse as a whole.
fn salvage(bytes: &[u8], feed: &FeedDescriptor, now: DateTime<Utc>, cause: String) -> ParseResult {
    let text = String::from_utf8_lossy(bytes);
    let mut result = ParseResult::default();
    let mut fragments = 0;

    let envelopes = [
        (rss_item_regex(), RSS_ENVELOPE_OPEN, RSS_ENVELOPE_CLOSE),
        (atom_entry_regex(), ATOM_ENVELOPE_OPEN, ATOM_ENVELOPE_CLOSE),
    ];

    for (pattern, open, close) in envelopes {
        for fragment in pattern.find_iter(&text) {
            fragments += 1;
            let wrapped = format!("{open}{}{close}", fragment.as_str());
            match parse_document(wrapped.as_bytes()) {
                Ok(parsed) => collect_entries(&mut result, parsed, feed, now),
                Err(e) => {
                    tracing::debug!(feed_id = %feed.id, error = %e, "Dropping unparseable feed entry");
                    result.skipped += 1;
                }
            }
        }
    }

    result.warning = Some(format!(
        "document did not parse ({cause}); recovered {} of {fragments} entries",
        result.articles.len()
    ));
    result
}

fn rss_item_regex() -> &'static Regex {
    static ITEM: OnceLock<Regex> = OnceLock::new();
    ITEM.get_or_init(|| Regex::new(r"(?s)<item\b.*?</item>").expect("static item pattern"))
}

fn atom_entry_regex() -> &'static Regex {
    static ENTRY: OnceLock<Regex> = OnceLock::new();
    ENTRY.get_or_init(|| Regex::new(r"(?s)<entry\b.*?</entry>").expect("static entry pattern"))
}

fn to_article(entry: Entry, feed: &FeedDescriptor, feed_title: &str, now: DateTime<Utc>) -> Option<Article> {
    let title = entry
        .title
        .as_ref()
        .map(|t| strip_control_chars(t.content.trim()).into_owned())
        .filter(|t| !t.is_empty())?;
    let link = select_link(&entry)?;

    let (published, published_inferred) = match entry.published.or(entry.updated) {
        Some(ts) => (ts, false),
        None => (now, true),
    };

    let content_body = entry.content.as_ref().and_then(|c| c.body.as_deref());
    let summary = entry.summary.as_ref().map(|s| s.content.as_str());
    let description = summary
        .or(content_body)
        .map(|html| clean_description(html, DESCRIPTION_MAX_CHARS))
        .unwrap_or_default();

    let image_url = select_image(&entry);

    let source = SourceMeta {
        author: entry
            .authors
            .first()
            .map(|p| p.name.trim().to_string())
            .filter(|name| !name.is_empty()),
        tags: entry
            .categories
            .iter()
            .map(|c| c.term.trim().to_string())
            .filter(|term| !term.is_empty())
            .collect(),
        guid: Some(entry.id.trim().to_string()).filter(|id| !id.is_empty()),
    };

    Some(Article {
        title,
        link,
        description,
        published,
        published_inferred,
        feed_id: feed.id.clone(),
        feed_title: feed_title.to_string(),
        category: feed.category.clone(),
        image_url,
        source,
        metadata: None,
    })
}

/// First `alternate` (or rel-less) link, else the first link of any kind.
fn select_link(entry: &Entry) -> Option<String> {
    let alternate = entry
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")));
    alternate
        .or_else(|| entry.links.first())
        .map(|l| l.href.trim().to_string())
        .filter(|href| !href.is_empty())
}

/// Typed attachments, then media thumbnails, then the first `<img>` in the body.
fn select_image(entry: &Entry) -> Option<String> {
    let attachment = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .find(|c| {
            c.content_type
                .as_ref()
                .is_some_and(|ct| ct.ty().as_str().eq_ignore_ascii_case("image"))
        })
        .and_then(|c| c.url.as_ref().map(|u| u.to_string()));
    if attachment.is_some() {
        return attachment;
    }

    let enclosure = entry
        .links
        .iter()
        .find(|l| {
            l.rel.as_deref() == Some("enclosure")
                && l.media_type.as_deref().is_some_and(|t| t.starts_with("image/"))
        })
        .map(|l| l.href.clone());
    if enclosure.is_some() {
        return enclosure;
    }

    let thumbnail = entry
        .media
        .iter()
        .flat_map(|m| m.thumbnails.iter())
        .map(|t| t.image.uri.trim())
        .find(|uri| !uri.is_empty())
        .map(str::to_string);
    if thumbnail.is_some() {
        return thumbnail;
    }

    let content_body = entry.content.as_ref().and_then(|c| c.body.as_deref());
    let summary = entry.summary.as_ref().map(|s| s.content.as_str());
    content_body
        .and_then(first_image_src)
        .or_else(|| summary.and_then(first_image_src))
}

/// Timestamp parser handed to `feed-rs`: RFC 3339, RFC 2822, then
/// [`LENIENT_DATETIME_FORMATS`] read as UTC, then a bare date at midnight.
pub fn parse_timestamp_lenient(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in LENIENT_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

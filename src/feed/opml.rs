use chrono::Utc;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::article::OTHER_CATEGORY;
use crate::storage::FeedDescriptor;
use crate::util::validate_feed_url;

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Prevents stack overflow attacks from maliciously crafted deeply nested OPMLs.
const MAX_OPML_DEPTH: usize = 50;

/// Errors that can occur during OPML parsing.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// File I/O error.
    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

/// Read an OPML subscription list and turn every feed outline into a
/// [`FeedDescriptor`].
///
/// Feeds inherit the text of their innermost enclosing folder outline as
/// their category, or `other` when they sit at the top level. Feeds whose URL
/// fails validation are skipped with a warning; loopback and private-network
/// hosts only pass when `allow_private_hosts` is set.
///
/// # Security
///
/// XXE is not possible: `quick-xml` (0.37) does not parse `<!ENTITY>`
/// declarations, and custom entity references fail to unescape.
pub async fn parse(path: &str, allow_private_hosts: bool) -> Result<Vec<FeedDescriptor>, OpmlError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_opml_content(&content, allow_private_hosts)
}

/// Descriptor id derived from the feed URL, stable across imports.
pub fn feed_id_for_url(url: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(url.as_bytes()));
    format!("feed_{}", &digest[..12])
}

fn parse_opml_content(
    content: &str,
    allow_private_hosts: bool,
) -> Result<Vec<FeedDescriptor>, OpmlError> {
    // SEC-002: only the five XML builtin entities are ever resolved
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feeds = Vec::new();
    let mut buf = Vec::new();
    // One slot per open outline: Some(folder name) for folders, None for feeds
    let mut folders: Vec<Option<String>> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                // SEC-003: Reject excessively nested OPMLs
                if folders.len() >= MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }

                let outline = read_outline(&e, &reader)?;
                match outline.xml_url {
                    Some(_) => {
                        if let Some(feed) =
                            outline.into_descriptor(current_folder(&folders), allow_private_hosts)
                        {
                            feeds.push(feed);
                        }
                        folders.push(None);
                    }
                    None => folders.push(outline.label),
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                // Self-closing outline doesn't affect depth
                let outline = read_outline(&e, &reader)?;
                if let Some(feed) =
                    outline.into_descriptor(current_folder(&folders), allow_private_hosts)
                {
                    feeds.push(feed);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                folders.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(feeds)
}

fn current_folder(folders: &[Option<String>]) -> Option<&str> {
    folders.iter().rev().find_map(|f| f.as_deref())
}

/// Attributes of one `<outline>` element.
struct Outline {
    xml_url: Option<String>,
    /// `title`, falling back to `text`
    label: Option<String>,
}

impl Outline {
    fn into_descriptor(self, folder: Option<&str>, allow_private_hosts: bool) -> Option<FeedDescriptor> {
        let url = self.xml_url?;
        // SEC-002: Validate URL before accepting
        if let Err(e) = validate_feed_url(&url, allow_private_hosts) {
            tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
            return None;
        }

        let category = folder
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(OTHER_CATEGORY);

        Some(FeedDescriptor {
            id: feed_id_for_url(&url),
            title: self.label.unwrap_or_else(|| url.clone()),
            category: category.to_string(),
            enabled: true,
            priority: 5,
            added_at: Some(Utc::now()),
            url,
        })
    }
}

fn read_outline(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Outline, OpmlError> {
    let mut xml_url = None;
    let mut title = None;
    let mut text = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let decode = || {
            attr.decode_and_unescape_value(reader.decoder())
                .map(|v| v.trim().to_string())
                .map_err(|e| OpmlError::XmlParse(e.to_string()))
        };
        match attr.key.as_ref() {
            b"xmlUrl" => xml_url = Some(decode()?),
            b"title" => title = Some(decode()?),
            b"text" => text = Some(decode()?),
            _ => {}
        }
    }

    Ok(Outline {
        xml_url: xml_url.filter(|u| !u.is_empty()),
        label: title.filter(|t| !t.is_empty()).or(text.filter(|t| !t.is_empty())),
    })
}

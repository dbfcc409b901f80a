// src/repository/locator.rs

//! Mirror list resolution
//!
//! A repository's locators are turned into an ordered list of base URLs:
//! explicit baseurls first, then the entries of a mirrorlist (one URL per
//! line) or a metalink document (`<url>` elements, best preference first).
//! Sync tries the list in order.

use super::config::{RepoConfig, parse_locator};
use super::fetch::MetadataFetcher;
use crate::diagnostics::Diagnostics;
use crate::error::LocatorError;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Suffix metalink entries carry; mirrors are stored as repository roots
const REPOMD_SUFFIXES: [&str; 2] = ["repodata/repomd.xml", "repodata/repomd.json"];

/// Parse a mirrorlist document
///
/// Blank lines and `#` comments are skipped, as are lines that are not
/// usable URLs.
pub fn parse_mirrorlist(text: &str) -> Vec<Url> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match parse_locator(line) {
            Ok(url) => Some(url),
            Err(e) => {
                debug!("Skipping mirrorlist entry '{}': {}", line, e);
                None
            }
        })
        .collect()
}

/// Parse a metalink document into mirror roots, best preference first
pub fn parse_metalink(xml: &str) -> Result<Vec<Url>, LocatorError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut entries: Vec<(u32, Url)> = Vec::new();
    let mut current: Option<u32> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"url" => {
                let preference = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.local_name().as_ref() == b"preference")
                    .and_then(|a| String::from_utf8_lossy(&a.value).parse::<u32>().ok())
                    .unwrap_or(0);
                current = Some(preference);
            }
            Ok(Event::Text(t)) => {
                if let Some(preference) = current {
                    let text = t.unescape().map_err(|e| LocatorError::Xml {
                        position: reader.buffer_position() as u64,
                        reason: e.to_string(),
                    })?;
                    match mirror_root(&text) {
                        Ok(url) => entries.push((preference, url)),
                        Err(e) => debug!("Skipping metalink entry '{}': {}", text, e),
                    }
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"url" => current = None,
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(LocatorError::Xml {
                    position: reader.buffer_position() as u64,
                    reason: e.to_string(),
                });
            }
            _ => {}
        }
    }

    // Stable: equal preferences keep document order
    entries.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(entries.into_iter().map(|(_, url)| url).collect())
}

fn mirror_root(entry: &str) -> Result<Url, LocatorError> {
    let entry = entry.trim();
    let root = REPOMD_SUFFIXES
        .iter()
        .find_map(|suffix| entry.strip_suffix(suffix))
        .unwrap_or(entry);
    parse_locator(root)
}

/// Resolve every locator of a repository into an ordered mirror list
///
/// A mirrorlist or metalink that cannot be fetched or parsed is recorded as
/// a warning; the remaining locators are still used.
pub async fn resolve_mirrors(
    config: &RepoConfig,
    fetcher: &dyn MetadataFetcher,
    diagnostics: &mut Diagnostics,
) -> Vec<Url> {
    let mut mirrors: Vec<Url> = Vec::new();

    for base in &config.baseurl {
        match parse_locator(base) {
            Ok(url) => mirrors.push(url),
            Err(e) => diagnostics.warn(format!("{}: invalid baseurl '{}': {}", config.id, base, e)),
        }
    }

    if let Some(mirrorlist) = &config.mirrorlist {
        match fetch_text(fetcher, mirrorlist).await {
            Ok(text) => mirrors.extend(parse_mirrorlist(&text)),
            Err(e) => diagnostics.warn(format!("{}: cannot use mirrorlist: {}", config.id, e)),
        }
    }

    if let Some(metalink) = &config.metalink {
        let parsed = match fetch_text(fetcher, metalink).await {
            Ok(xml) => parse_metalink(&xml),
            Err(e) => Err(e),
        };
        match parsed {
            Ok(urls) => mirrors.extend(urls),
            Err(e) => diagnostics.warn(format!("{}: cannot use metalink: {}", config.id, e)),
        }
    }

    // Drop repeats anywhere in the list, keeping the first position
    let mut seen = HashSet::new();
    mirrors.retain(|url| seen.insert(url.clone()));
    debug!("Repository {} has {} mirror(s)", config.id, mirrors.len());
    mirrors
}

async fn fetch_text(fetcher: &dyn MetadataFetcher, locator: &str) -> Result<String, LocatorError> {
    let url = parse_locator(locator)?;
    let bytes = fetcher.fetch(&url).await.map_err(|e| LocatorError::Fetch {
        locator: locator.to_string(),
        reason: e.to_string(),
    })?;
    String::from_utf8(bytes).map_err(|_| LocatorError::NotUtf8(locator.to_string()))
}

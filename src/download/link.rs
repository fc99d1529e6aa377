//! Catalog link classification.
//!
//! Recognised shapes (host `music.apple.com` or a subdomain of it):
//!
//! - `/{storefront}/song/[slug/]{numeric id}`
//! - `/{storefront}/album/[slug/]{numeric id}` (with `?i={track id}` it becomes a song)
//! - `/{storefront}/playlist/[slug/]pl.{id}`

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::catalog::{Locator, LocatorKind, CATALOG_HOST};

static URL_IN_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s<>]+").expect("valid URL regex"));

/// Characters that end a sentence or close a bracket around a pasted link.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']'];

/// Finds the first http(s) URL in free text.
pub fn extract_url(text: &str) -> Option<Url> {
    URL_IN_TEXT
        .find_iter(text)
        .find_map(|m| Url::parse(m.as_str().trim_end_matches(TRAILING_PUNCTUATION)).ok())
}

fn is_catalog_host(url: &Url) -> bool {
    match url.host_str() {
        Some(host) => {
            let host = host.to_ascii_lowercase();
            host == CATALOG_HOST || host.ends_with(&format!(".{}", CATALOG_HOST))
        }
        None => false,
    }
}

fn is_storefront(segment: &str) -> bool {
    segment.len() == 2 && segment.bytes().all(|b| b.is_ascii_lowercase())
}

fn is_numeric_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}

fn is_playlist_id(id: &str) -> bool {
    id.len() > 3 && id.starts_with("pl.")
}

/// Splits a catalog path into (storefront, kind segment, id).
fn path_parts(url: &Url) -> Option<(String, String, String)> {
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    let (storefront, kind, id) = match segments.as_slice() {
        [storefront, kind, id] => (*storefront, *kind, *id),
        [storefront, kind, _slug, id] => (*storefront, *kind, *id),
        _ => return None,
    };
    if !is_storefront(storefront) {
        return None;
    }
    Some((storefront.to_string(), kind.to_string(), id.to_string()))
}

/// Classifies the first link in `text`.
///
/// Returns `None` for anything that is not a supported song, album or playlist
/// link, including music videos (see [`is_music_video_link`]).
pub fn classify(text: &str) -> Option<Locator> {
    let url = extract_url(text)?;
    if !is_catalog_host(&url) {
        return None;
    }
    let (storefront, kind, id) = path_parts(&url)?;

    let track_param = url
        .query_pairs()
        .find(|(key, _)| key == "i")
        .map(|(_, value)| value.into_owned())
        .filter(|value| is_numeric_id(value));

    let (kind, catalog_id) = match kind.as_str() {
        "song" | "album" if track_param.is_some() => (LocatorKind::Song, track_param?),
        "song" if is_numeric_id(&id) => (LocatorKind::Song, id),
        "album" if is_numeric_id(&id) => (LocatorKind::Album, id),
        "playlist" if is_playlist_id(&id) => (LocatorKind::Playlist, id),
        _ => return None,
    };

    Some(Locator {
        kind,
        catalog_id,
        storefront,
    })
}

/// Whether the first link in `text` is a catalog music video.
pub fn is_music_video_link(text: &str) -> bool {
    extract_url(text)
        .filter(is_catalog_host)
        .and_then(|url| path_parts(&url))
        .is_some_and(|(_, kind, _)| kind == "music-video")
}

//! Link classification
//!
//! Decides whether a pasted link names a single item, a collection, or
//! nothing usable, and extracts the identifiers the resolver needs.
//!
//! ```
//! use media_dl::classifier::{classify, UrlKind};
//!
//! assert_eq!(
//!     classify("https://www.youtube.com/watch?v=ABC123"),
//!     UrlKind::Single("ABC123".into())
//! );
//! assert_eq!(
//!     classify("https://www.youtube.com/playlist?list=XYZ"),
//!     UrlKind::Collection("XYZ".into())
//! );
//! assert!(matches!(classify("not a link"), UrlKind::Invalid(_)));
//! ```

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::types::{CollectionId, MediaId};

/// Query parameter carrying the item identifier
const ITEM_PARAM: &str = "v";
/// Query parameter carrying the collection identifier
const COLLECTION_PARAM: &str = "list";

/// Why a link could not be classified
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// Not a URL at all
    Unparsable,
    /// Scheme other than http/https
    UnsupportedScheme,
    /// URL without a host
    MissingHost,
    /// Well-formed URL carrying neither an item nor a collection identifier
    NoIdentifier,
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            InvalidReason::Unparsable => "not a valid URL",
            InvalidReason::UnsupportedScheme => "only http and https links are supported",
            InvalidReason::MissingHost => "URL has no host",
            InvalidReason::NoIdentifier => "URL names neither a video nor a playlist",
        };
        f.write_str(text)
    }
}

/// Classification of a link
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum UrlKind {
    /// One item
    Single(MediaId),
    /// A playlist-like grouping
    Collection(CollectionId),
    /// Nothing usable
    Invalid(InvalidReason),
}

/// What the caller wants from a link that may carry both identifiers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    /// Download one item
    #[default]
    Single,
    /// Download from the whole collection
    Collection,
}

/// Identifiers found in a link
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedUrl {
    /// The normalized link
    pub url: Url,
    /// Item identifier, if present
    pub item: Option<MediaId>,
    /// Collection identifier, if present
    pub collection: Option<CollectionId>,
}

/// Parse a link and pull out both identifiers.
///
/// Item identifiers come from the `v` query parameter, from short links
/// (`youtu.be/<id>`) and from `/shorts/<id>` or `/embed/<id>` paths. The
/// collection identifier comes from the `list` query parameter.
pub fn parse(input: &str) -> Result<ParsedUrl> {
    let url = Url::parse(input.trim())
        .map_err(|e| Error::InvalidInput(format!("{}: {e}", InvalidReason::Unparsable)))?;

    match url.scheme() {
        "http" | "https" => {}
        _ => {
            return Err(Error::InvalidInput(
                InvalidReason::UnsupportedScheme.to_string(),
            ));
        }
    }

    let host = match url.host_str() {
        Some(h) if !h.is_empty() => h.to_ascii_lowercase(),
        _ => return Err(Error::InvalidInput(InvalidReason::MissingHost.to_string())),
    };

    let query_value = |key: &str| {
        url.query_pairs()
            .find(|(k, v)| k == key && !v.trim().is_empty())
            .map(|(_, v)| v.trim().to_string())
    };

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let item = query_value(ITEM_PARAM)
        .or_else(|| path_item_id(&host, &segments))
        .map(MediaId::from);
    let collection = query_value(COLLECTION_PARAM).map(CollectionId::from);

    Ok(ParsedUrl {
        url,
        item,
        collection,
    })
}

fn path_item_id(host: &str, segments: &[&str]) -> Option<String> {
    if host == "youtu.be" || host.ends_with(".youtu.be") {
        return segments.first().map(|s| s.to_string());
    }
    match segments {
        ["shorts", id, ..] | ["embed", id, ..] | ["live", id, ..] => Some(id.to_string()),
        _ => None,
    }
}

/// Classify a link, preferring the single item when both identifiers are present.
pub fn classify(input: &str) -> UrlKind {
    classify_with_mode(input, RequestMode::Single)
}

/// Classify a link according to what the caller asked for.
///
/// With [`RequestMode::Single`] an item identifier wins; a bare collection
/// link still classifies as a collection. With [`RequestMode::Collection`]
/// the collection identifier wins; a bare item link still classifies as a
/// single item.
pub fn classify_with_mode(input: &str, mode: RequestMode) -> UrlKind {
    let parsed = match parse(input) {
        Ok(p) => p,
        Err(_) => return UrlKind::Invalid(invalid_reason(input)),
    };
    kind_for(&parsed, mode)
}

/// Classification of an already-parsed link
pub fn kind_for(parsed: &ParsedUrl, mode: RequestMode) -> UrlKind {
    match (mode, &parsed.item, &parsed.collection) {
        (RequestMode::Single, Some(item), _) => UrlKind::Single(item.clone()),
        (RequestMode::Collection, _, Some(list)) => UrlKind::Collection(list.clone()),
        (_, None, Some(list)) => UrlKind::Collection(list.clone()),
        (_, Some(item), None) => UrlKind::Single(item.clone()),
        (_, None, None) => UrlKind::Invalid(InvalidReason::NoIdentifier),
    }
}

fn invalid_reason(input: &str) -> InvalidReason {
    match Url::parse(input.trim()) {
        Err(_) => InvalidReason::Unparsable,
        Ok(url) if !matches!(url.scheme(), "http" | "https") => InvalidReason::UnsupportedScheme,
        Ok(_) => InvalidReason::MissingHost,
    }
}

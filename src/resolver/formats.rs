//! Rendition filtering and selection.

use serde::{Deserialize, Serialize};

use crate::config::EncodingFilter;
use crate::error::{Error, Result};
use crate::types::{EncodingOption, MediaRef};

/// Reduce a backend's raw rendition list to the allow-listed subset.
///
/// Pure function of its inputs; order of `raw` is preserved.
pub fn filter_encodings(raw: &[EncodingOption], filter: &EncodingFilter) -> Vec<EncodingOption> {
    raw.iter()
        .filter(|option| {
            filter.allowed_containers.is_empty()
                || filter
                    .allowed_containers
                    .contains(&option.container.to_ascii_lowercase())
        })
        .filter(|option| {
            filter.allowed_resolutions.is_empty()
                || option
                    .height
                    .is_some_and(|h| filter.allowed_resolutions.contains(&h))
        })
        .filter(|option| !filter.require_audio || option.has_audio)
        .cloned()
        .collect()
}

/// What the user asked for when picking a quality for a whole batch
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingPreference {
    /// Required container (e.g. "mp4"); any when None
    #[serde(default)]
    pub container: Option<String>,
    /// Highest acceptable vertical resolution; unbounded when None
    #[serde(default)]
    pub max_height: Option<u32>,
    /// Exact token to use when the item offers it
    #[serde(default)]
    pub token: Option<String>,
}

impl EncodingPreference {
    /// Prefer a container, any resolution
    pub fn container(container: impl Into<String>) -> Self {
        Self {
            container: Some(container.into().to_ascii_lowercase()),
            ..Self::default()
        }
    }

    /// Cap the resolution
    pub fn with_max_height(mut self, max_height: u32) -> Self {
        self.max_height = Some(max_height);
        self
    }
}

/// Pick one of `media`'s own renditions according to `preference`.
///
/// An exact token match wins. Otherwise, among renditions passing the
/// container and height constraints, muxed audio+video beats single-track,
/// then higher resolution, then higher frame rate.
pub fn select_encoding<'a>(
    media: &'a MediaRef,
    preference: &EncodingPreference,
) -> Result<&'a EncodingOption> {
    if let Some(token) = &preference.token
        && let Some(exact) = media.encoding(token)
    {
        return Ok(exact);
    }

    media
        .encodings
        .iter()
        .filter(|option| {
            preference
                .container
                .as_deref()
                .is_none_or(|c| option.container.eq_ignore_ascii_case(c))
        })
        .filter(|option| match (preference.max_height, option.height) {
            (Some(max), Some(h)) => h <= max,
            (Some(_), None) => !option.has_video,
            (None, _) => true,
        })
        .max_by(|a, b| {
            let muxed = |o: &EncodingOption| o.has_video && o.has_audio;
            muxed(a)
                .cmp(&muxed(b))
                .then(a.height.unwrap_or(0).cmp(&b.height.unwrap_or(0)))
                .then(a.fps.unwrap_or(0.0).total_cmp(&b.fps.unwrap_or(0.0)))
        })
        .ok_or_else(|| Error::NoMatchingEncoding {
            media_id: media.id.to_string(),
        })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaId;

    fn option(token: &str, container: &str, height: Option<u32>, audio: bool) -> EncodingOption {
        EncodingOption {
            token: token.to_string(),
            container: container.to_string(),
            height,
            fps: Some(30.0),
            filesize: None,
            has_video: height.is_some(),
            has_audio: audio,
            note: None,
        }
    }

    fn raw() -> Vec<EncodingOption> {
        vec![
            option("18", "mp4", Some(360), true),
            option("22", "mp4", Some(720), true),
            option("137", "mp4", Some(1080), false),
            option("248", "webm", Some(1080), false),
            option("140", "m4a", None, true),
        ]
    }

    fn tokens(options: &[EncodingOption]) -> Vec<&str> {
        options.iter().map(|o| o.token.as_str()).collect()
    }

    #[test]
    fn empty_filter_allows_everything() {
        let filtered = filter_encodings(&raw(), &EncodingFilter::default());
        assert_eq!(filtered.len(), 5);
    }

    #[test]
    fn container_and_resolution_allow_lists() {
        let filter = EncodingFilter::new(["mp4"], [720, 1080]);
        assert_eq!(tokens(&filter_encodings(&raw(), &filter)), vec!["22", "137"]);
    }

    #[test]
    fn resolution_list_drops_audio_only() {
        let filter = EncodingFilter::new(Vec::<String>::new(), [1080]);
        assert_eq!(tokens(&filter_encodings(&raw(), &filter)), vec!["137", "248"]);
    }

    #[test]
    fn require_audio() {
        let filter = EncodingFilter {
            require_audio: true,
            ..EncodingFilter::default()
        };
        assert_eq!(
            tokens(&filter_encodings(&raw(), &filter)),
            vec!["18", "22", "140"]
        );
    }

    #[test]
    fn filter_is_pure() {
        let input = raw();
        let filter = EncodingFilter::new(["mp4"], [360]);
        assert_eq!(filter_encodings(&input, &filter), filter_encodings(&input, &filter));
        assert_eq!(input.len(), 5);
    }

    fn media() -> MediaRef {
        MediaRef {
            id: MediaId::from("ABC"),
            url: "https://www.youtube.com/watch?v=ABC".into(),
            title: "clip".into(),
            thumbnail: None,
            duration_secs: None,
            encodings: raw(),
        }
    }

    #[test]
    fn select_prefers_muxed_then_height() {
        let item = media();
        let chosen = select_encoding(&item, &EncodingPreference::container("mp4")).unwrap();
        assert_eq!(chosen.token, "22");
    }

    #[test]
    fn select_respects_height_cap() {
        let item = media();
        let pref = EncodingPreference::container("mp4").with_max_height(480);
        assert_eq!(select_encoding(&item, &pref).unwrap().token, "18");
    }

    #[test]
    fn select_exact_token_wins() {
        let item = media();
        let pref = EncodingPreference {
            token: Some("248".into()),
            ..EncodingPreference::container("mp4")
        };
        assert_eq!(select_encoding(&item, &pref).unwrap().token, "248");
    }

    #[test]
    fn select_unknown_token_falls_back_to_constraints() {
        let item = media();
        let pref = EncodingPreference {
            token: Some("999".into()),
            ..EncodingPreference::container("webm")
        };
        assert_eq!(select_encoding(&item, &pref).unwrap().token, "248");
    }

    #[test]
    fn select_without_match_errors() {
        let item = media();
        let err = select_encoding(&item, &EncodingPreference::container("flv")).unwrap_err();
        assert!(matches!(err, Error::NoMatchingEncoding { .. }));
    }
}

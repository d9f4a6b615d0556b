//! Output file naming.
//!
//! Titles collide (two uploads called "Intro" are common), so every name
//! carries the media identifier and the title is only decoration.
//!
//! Filesystems limit a name to 255 bytes, not characters, so stems are cut
//! to a byte budget that leaves room for yt-dlp's extension and intermediate
//! suffixes (`.f137.webm.part-Frag12.part`).

use unicode_normalization::UnicodeNormalization;

use crate::config::FilenamePolicy;
use crate::types::MediaRef;

const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Longest single path component most filesystems accept, in bytes
const NAME_MAX_BYTES: usize = 255;

/// Bytes kept free for the extension and partial-download suffixes
const SUFFIX_RESERVE_BYTES: usize = 40;

/// Byte budget for a stem
pub const MAX_STEM_BYTES: usize = NAME_MAX_BYTES - SUFFIX_RESERVE_BYTES;

/// Make a title safe to use as a single path component.
///
/// The title is NFC-normalized first. Forbidden characters and control
/// characters become `_`, whitespace runs collapse to one space, trailing
/// dots and spaces are dropped, and the result is cut to at most `max_len`
/// characters.
pub fn sanitize_title(title: &str, max_len: usize) -> String {
    let replaced: String = title
        .nfc()
        .map(|c| {
            if c.is_whitespace() {
                ' '
            } else if FORBIDDEN.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(max_len).collect();
    truncated
        .trim_end_matches(['.', ' '])
        .trim_start_matches('.')
        .to_string()
}

/// Cut `name` to at most `max_bytes` bytes on a char boundary
pub fn fit_bytes(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }
    let mut end = max_bytes;
    while !name.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    name[..end].trim_end_matches(['.', ' ']).to_string()
}

/// Output filename (without extension) for one item.
///
/// The result never exceeds [`MAX_STEM_BYTES`]; the title gives way first.
pub fn file_stem(media: &MediaRef, policy: FilenamePolicy, max_title_len: usize) -> String {
    let id = fit_bytes(&sanitize_title(media.id.as_str(), usize::MAX), MAX_STEM_BYTES);
    match policy {
        FilenamePolicy::IdOnly => id,
        FilenamePolicy::TitleWithId => {
            // " [" + id + "]"
            let title_budget = MAX_STEM_BYTES.saturating_sub(id.len() + 3);
            let title = fit_bytes(
                &sanitize_title(&media.title, max_title_len),
                title_budget,
            );
            if title.is_empty() {
                id
            } else {
                format!("{title} [{id}]")
            }
        }
    }
}

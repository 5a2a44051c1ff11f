//! Text normalization applied to bookmarks before they are stored
//!
//! Sources hand over URLs with HTML entities still encoded and titles with
//! literal `\uXXXX` escapes. Both are decoded here so that the fingerprint
//! of a bookmark does not depend on which source produced it.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::models::Bookmark;

fn unicode_escape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:\\u[0-9a-fA-F]{4})+").expect("valid regex"))
}

/// Decode HTML character references, named and numeric
///
/// Unknown entity names are left untouched.
pub fn unescape_html(input: &str) -> String {
    html_escape::decode_html_entities(input).into_owned()
}

/// Decode literal `\uXXXX` escapes, including UTF-16 surrogate pairs
///
/// Lone surrogates decode to U+FFFD.
pub fn decode_unicode_escapes(input: &str) -> String {
    if !input.contains("\\u") {
        return input.to_string();
    }

    unicode_escape_re()
        .replace_all(input, |caps: &Captures<'_>| {
            let units: Vec<u16> = caps[0]
                .split("\\u")
                .filter(|hex| !hex.is_empty())
                .filter_map(|hex| u16::from_str_radix(hex, 16).ok())
                .collect();
            char::decode_utf16(units)
                .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect::<String>()
        })
        .into_owned()
}

/// Normalize a bookmark in place before it is written
///
/// Tags are re-encoded for `tag_sep`, which sanitizes every value against
/// it whatever path built the set.
pub fn normalize(bk: &mut Bookmark, tag_sep: char) {
    bk.url = unescape_html(bk.url.trim()).trim().to_string();
    bk.tags = std::mem::take(&mut bk.tags).with_sep(tag_sep);
    bk.title = decode_unicode_escapes(&bk.title);
    bk.desc = decode_unicode_escapes(&bk.desc);
}

//! Splitting multi-statement scripts on a separator pattern.

use regex::Regex;
use std::sync::OnceLock;

/// The default statement separator: a line containing only `GO`.
pub fn script_separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"(?m)^GO[ \t]*\r?$").expect("separator regex"))
}

/// Split `text` into the segments between non-overlapping `separator`
/// matches.
///
/// The segment before the first match and the one after the last match are
/// preserved even when empty; with no match at all the whole text is
/// returned as a single segment.
pub fn split_script<'a>(text: &'a str, separator: &Regex) -> Vec<&'a str> {
    let mut segments = Vec::new();
    let mut last = 0;
    for m in separator.find_iter(text) {
        segments.push(&text[last..m.start()]);
        last = m.end();
    }
    segments.push(&text[last..]);
    segments
}

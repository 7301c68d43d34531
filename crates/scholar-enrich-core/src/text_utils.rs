//! Text normalization helpers shared by the fetchers.

use once_cell::sync::Lazy;
use regex::Regex;

/// Minimum length (in characters) for an abstract to count as real content.
/// Anything shorter is treated as navigation boilerplate.
pub const MIN_ABSTRACT_CHARS: usize = 100;

/// Whether `text` is long enough to be accepted as an abstract.
pub fn is_substantial(text: &str) -> bool {
    text.trim().chars().count() >= MIN_ABSTRACT_CHARS
}

/// Collapse every run of whitespace into a single space and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    static WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
    WS.replace_all(text.trim(), " ").into_owned()
}

/// Remove markup tags (`<br>`, `<p>`, JATS `<jats:p>` and friends) and
/// collapse the result to single-spaced text.
pub fn strip_tags(html: &str) -> String {
    static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
    collapse_whitespace(&TAG.replace_all(html, " "))
}

/// Drop a leading "Abstract" heading (with optional colon, dash or period).
pub fn strip_abstract_heading(text: &str) -> String {
    static HEADING: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)^\s*abstract\b\s*[:.\-\u{2014}]?\s*").unwrap());
    HEADING.replace(text, "").into_owned()
}

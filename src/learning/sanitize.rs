//! Memory content sanitizing
//!
//! Memories must never carry emoji codepoints or `#`-tokens. Everything that
//! leaves the extractor goes through `sanitize_memory_content`.

use once_cell::sync::Lazy;
use regex::Regex;

/// Pictographs plus the joiners/modifiers that glue emoji sequences together
static EMOJI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\p{Extended_Pictographic}\p{Emoji_Modifier}\p{Regional_Indicator}\u{FE0F}\u{200D}\u{20E3}]")
        .expect("emoji regex")
});

/// `#` followed by anything up to whitespace (a lone `#` included)
static HASHTAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#\S*").expect("hashtag regex"));

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

pub fn contains_emoji(text: &str) -> bool {
    EMOJI_RE.is_match(text)
}

pub fn strip_emoji(text: &str) -> String {
    EMOJI_RE.replace_all(text, "").into_owned()
}

pub fn strip_hashtags(text: &str) -> String {
    HASHTAG_RE.replace_all(text, "").into_owned()
}

/// Clean memory content. `None` when nothing usable is left.
pub fn sanitize_memory_content(text: &str) -> Option<String> {
    let stripped = strip_hashtags(&strip_emoji(text));
    let collapsed = WHITESPACE_RE.replace_all(&stripped, " ");
    let cleaned = collapsed.trim().trim_matches(|c: char| c == ':' || c == '-').trim();

    if cleaned.is_empty() || contains_emoji(cleaned) || cleaned.contains('#') {
        return None;
    }
    Some(cleaned.to_string())
}

//! Text clean-up for review bodies and ratings.

use std::sync::OnceLock;

use regex::Regex;

/// Collapse runs of whitespace to single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn rating_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:rating:\s*)?\d+\s*(?:/\s*10|out of\s*10)\s*")
            .expect("rating prefix regex is valid")
    })
}

fn spoiler_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^spoiler\b[:!]?\s*").expect("spoiler prefix regex is valid"))
}

fn rating_value() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)(?:\s*/\s*10)?").expect("rating regex is valid"))
}

const QUOTES: &[char] = &['"', '\'', '\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}'];

/// Clean a raw body: drop a leading rating, a leading copy of the title,
/// leading quotes and a leading "SPOILER" marker, then collapse whitespace.
///
/// Strips repeat until nothing changes, so the result is a fixed point:
/// `normalize_body(normalize_body(b, t), t) == normalize_body(b, t)`.
pub fn normalize_body(body: &str, title: Option<&str>) -> String {
    let title = title.map(collapse_whitespace).filter(|t| !t.is_empty());
    let mut current = collapse_whitespace(body);
    loop {
        let next = strip_once(&current, title.as_deref());
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_once(text: &str, title: Option<&str>) -> String {
    let mut rest = rating_prefix().replace(text, "").into_owned();
    if let Some(title) = title {
        if let Some(after) = strip_title(&rest, title) {
            rest = after.to_string();
        }
    }
    let rest = rest.trim_start_matches(QUOTES);
    let rest = spoiler_prefix().replace(rest, "");
    collapse_whitespace(&rest)
}

/// `text` without a leading `title` (case-sensitive), if the title ends on
/// a word boundary.
fn strip_title<'t>(text: &'t str, title: &str) -> Option<&'t str> {
    let rest = text.strip_prefix(title)?;
    match rest.chars().next() {
        Some(c) if c.is_alphanumeric() => None,
        _ => Some(rest),
    }
}

/// Canonical `"<digits>/10"` form of the first number in `text`.
pub fn normalize_rating(text: &str) -> Option<String> {
    rating_value()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|digits| format!("{}/10", digits.as_str()))
}

/// Whether the first `window` characters mention a spoiler.
pub fn spoiler_in_text(text: &str, window: usize) -> bool {
    text.chars()
        .take(window)
        .collect::<String>()
        .to_lowercase()
        .contains("spoiler")
}

//! Helpers over `scraper` shared by the snapshot renderer and field rules.
//!
//! `scraper` types are `!Send`; everything here is synchronous and must not
//! be held across an `.await`.

use scraper::{ElementRef, Selector};

use crate::error::ExtractError;

/// Whitespace-collapsed text content of an element.
pub fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compile a CSS selector, mapping the parse error into a field error.
pub fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Whether the element or any ancestor is hidden by attribute or inline style.
pub fn is_hidden(el: &ElementRef<'_>) -> bool {
    std::iter::once(*el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .any(|e| {
            let v = e.value();
            v.attr("hidden").is_some()
                || v.attr("aria-hidden") == Some("true")
                || v.attr("style").is_some_and(|s| {
                    let s: String = s.chars().filter(|c| !c.is_whitespace()).collect();
                    let s = s.to_ascii_lowercase();
                    s.contains("display:none") || s.contains("visibility:hidden")
                })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn test_element_text_collapses_whitespace() {
        let html = Html::parse_fragment("<div>  Great \n\n <b>movie</b>\t overall </div>");
        let sel = parse_selector("div").unwrap();
        let div = html.select(&sel).next().unwrap();
        assert_eq!(element_text(&div), "Great movie overall");
    }

    #[test]
    fn test_parse_selector_error() {
        let err = parse_selector("div[[").unwrap_err();
        assert!(matches!(err, ExtractError::Selector { .. }));
    }

    #[test]
    fn test_hidden_through_ancestor() {
        let html = Html::parse_fragment(
            r#"<div style="display: none"><button id="a">x</button></div><button id="b">y</button>"#,
        );
        let a = html.select(&parse_selector("#a").unwrap()).next().unwrap();
        let b = html.select(&parse_selector("#b").unwrap()).next().unwrap();
        assert!(is_hidden(&a));
        assert!(!is_hidden(&b));
    }
}

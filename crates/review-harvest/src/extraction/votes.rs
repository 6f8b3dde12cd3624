//! Helpful / not-helpful counts from a votes container.
//!
//! Tried in order: the "N out of M found this helpful" sentence, the first
//! number inside each vote button's own `aria-label`ed element, numbers
//! inside the up/down count elements, and finally the bare numbers of the
//! container text (first is helpful, second is unhelpful).

use std::sync::OnceLock;

use regex::Regex;
use scraper::ElementRef;

use crate::markup::element_text;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Votes {
    pub helpful: Option<u32>,
    pub unhelpful: Option<u32>,
}

struct VotePatterns {
    out_of: Regex,
    helpful_class: Regex,
    unhelpful_class: Regex,
    number: Regex,
}

fn patterns() -> &'static VotePatterns {
    static PATTERNS: OnceLock<VotePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| VotePatterns {
        out_of: Regex::new(r"(?i)(\d[\d,]*)\s*out\s+of\s*(\d[\d,]*)\s*found\s+this\s+helpful")
            .expect("out-of regex is valid"),
        helpful_class: Regex::new(r#"(?is)count--up[^"]*"[^>]*>\s*(\d[\d,]*)"#)
            .expect("helpful class regex is valid"),
        unhelpful_class: Regex::new(r#"(?is)count--down[^"]*"[^>]*>\s*(\d[\d,]*)"#)
            .expect("unhelpful class regex is valid"),
        number: Regex::new(r"\d[\d,]*").expect("number regex is valid"),
    })
}

/// Parse `"1,204"` as 1204.
fn parse_count(raw: &str) -> Option<u32> {
    raw.replace(',', "").parse().ok()
}

fn capture(re: &Regex, haystack: &str) -> Option<u32> {
    re.captures(haystack)
        .and_then(|caps| caps.get(1))
        .and_then(|m| parse_count(m.as_str()))
}

/// First number in the text of the element (the container itself or a
/// descendant) whose `aria-label` is `label`, ignoring case.
fn labelled_count(container: &ElementRef<'_>, label: &str) -> Option<u32> {
    let number = &patterns().number;
    container
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| {
            el.value()
                .attr("aria-label")
                .is_some_and(|l| l.trim().eq_ignore_ascii_case(label))
        })
        .find_map(|el| {
            number
                .find(&element_text(&el))
                .and_then(|m| parse_count(m.as_str()))
        })
}

/// Counts found in a votes container. `None` when it holds no numbers.
pub fn parse_votes(container: &ElementRef<'_>) -> Option<Votes> {
    let p = patterns();
    let markup = container.html();
    let text = element_text(container);

    if let Some(caps) = p.out_of.captures(&text) {
        let helpful = caps.get(1).and_then(|m| parse_count(m.as_str()));
        let total = caps.get(2).and_then(|m| parse_count(m.as_str()));
        if let (Some(helpful), Some(total)) = (helpful, total) {
            return Some(Votes {
                helpful: Some(helpful),
                unhelpful: Some(total.saturating_sub(helpful)),
            });
        }
    }

    let helpful =
        labelled_count(container, "helpful").or_else(|| capture(&p.helpful_class, &markup));
    let unhelpful = labelled_count(container, "not helpful")
        .or_else(|| capture(&p.unhelpful_class, &markup));
    if helpful.is_some() || unhelpful.is_some() {
        return Some(Votes { helpful, unhelpful });
    }

    let mut numbers = p
        .number
        .find_iter(&text)
        .filter_map(|m| parse_count(m.as_str()));
    let helpful = numbers.next()?;
    Some(Votes {
        helpful: Some(helpful),
        unhelpful: numbers.next(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn votes(markup: &str) -> Option<Votes> {
        let html = Html::parse_fragment(markup);
        parse_votes(&html.root_element())
    }

    #[test]
    fn test_label_adjacent_counts() {
        let markup = r#"<div class="ipc-voting">
            <button aria-label="Helpful"><svg><path d="M1 2h3"></path></svg><span class="ipc-voting__label__count ipc-voting__label__count--up">1,204</span></button>
            <button aria-label="Not helpful"><svg><path d="M4 5"></path></svg><span class="ipc-voting__label__count ipc-voting__label__count--down">37</span></button>
        </div>"#;
        let votes = votes(markup).unwrap();
        assert_eq!(votes.helpful, Some(1204));
        assert_eq!(votes.unhelpful, Some(37));
    }

    #[test]
    fn test_uncounted_button_does_not_borrow_neighbour() {
        let markup = r#"<div class="ipc-voting">
            <button aria-label="Helpful"><svg></svg></button>
            <button aria-label="Not helpful"><span>37</span></button>
        </div>"#;
        assert_eq!(
            votes(markup),
            Some(Votes {
                helpful: None,
                unhelpful: Some(37)
            })
        );
    }

    #[test]
    fn test_class_name_counts() {
        let markup = r#"<div><span class="count--up">5</span><span class="x count--down">2</span></div>"#;
        let votes = votes(markup).unwrap();
        assert_eq!((votes.helpful, votes.unhelpful), (Some(5), Some(2)));
    }

    #[test]
    fn test_out_of_sentence() {
        let markup = "<div>12 out of 15 found this helpful. Was this review helpful?</div>";
        let votes = votes(markup).unwrap();
        assert_eq!((votes.helpful, votes.unhelpful), (Some(12), Some(3)));
    }

    #[test]
    fn test_plain_text_positional() {
        assert_eq!(
            votes("<div>Helpful 9 Not helpful 4</div>"),
            Some(Votes {
                helpful: Some(9),
                unhelpful: Some(4)
            })
        );
        assert_eq!(
            votes("<div>9</div>"),
            Some(Votes {
                helpful: Some(9),
                unhelpful: None
            })
        );
        assert_eq!(votes("<div>Helpful</div>"), None);
    }
}

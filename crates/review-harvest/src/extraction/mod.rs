// Copyright 2026 Review Harvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Field extraction: resolve the six review fields of one fragment.
//!
//! Each field has a [`Chain`] of strategies tried in order; the first one
//! that produces a value wins. A strategy that errors does not stop the
//! chain, and a field whose chain errors does not affect its siblings.
//! Extraction runs on a parsed snapshot of the fragment's markup, so it is
//! synchronous and never touches the live document.

pub mod normalize;
pub mod votes;

use scraper::{ElementRef, Html};

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::fragments::Fragment;
use crate::markup::{element_text, parse_selector};
use crate::rules::FieldRules;
use crate::types::{FieldResult, ReviewFields};

use normalize::{collapse_whitespace, normalize_body, normalize_rating, spoiler_in_text};
use votes::{parse_votes, Votes};

type StrategyFn<T> = dyn Fn(&ElementRef<'_>) -> Result<Option<T>, ExtractError> + Send + Sync;

/// One named way of finding a value inside a fragment.
pub struct Strategy<T> {
    name: String,
    run: Box<StrategyFn<T>>,
}

impl<T> Strategy<T> {
    pub fn new(
        name: impl Into<String>,
        run: impl Fn(&ElementRef<'_>) -> Result<Option<T>, ExtractError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Ordered fallback strategies for one field.
pub struct Chain<T> {
    strategies: Vec<Strategy<T>>,
}

impl<T> Default for Chain<T> {
    fn default() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }
}

impl<T> Chain<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, strategy: Strategy<T>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Put `strategy` ahead of every existing one.
    pub fn prepend(mut self, strategy: Strategy<T>) -> Self {
        self.strategies.insert(0, strategy);
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// First value produced. `Failed` only when nothing resolved and at
    /// least one strategy errored; `Absent` when every strategy came up empty.
    pub fn resolve(&self, root: &ElementRef<'_>) -> FieldResult<T> {
        let mut errors = Vec::new();
        for strategy in &self.strategies {
            match (strategy.run)(root) {
                Ok(Some(value)) => return FieldResult::Resolved(value),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(strategy = %strategy.name, error = %e, "strategy failed");
                    errors.push(e.to_string());
                }
            }
        }
        if errors.is_empty() {
            FieldResult::Absent
        } else {
            FieldResult::Failed(errors.join("; "))
        }
    }
}

impl<T: Send + Sync + 'static> Chain<T> {
    /// One strategy per selector: the first match inside the fragment, mapped
    /// through `read`.
    pub fn from_selectors(
        selectors: &[String],
        read: fn(&ElementRef<'_>) -> Option<T>,
    ) -> Self {
        selectors.iter().fold(Self::new(), |chain, selector| {
            let css = selector.clone();
            chain.push(Strategy::new(selector.clone(), move |root| {
                let compiled = parse_selector(&css)?;
                Ok(root.select(&compiled).find_map(|el| read(&el)))
            }))
        })
    }
}

fn non_empty_text(el: &ElementRef<'_>) -> Option<String> {
    Some(element_text(el)).filter(|t| !t.is_empty())
}

fn rating_text(el: &ElementRef<'_>) -> Option<String> {
    normalize_rating(&element_text(el))
}

fn vote_counts(el: &ElementRef<'_>) -> Option<Votes> {
    parse_votes(el)
}

fn present(_: &ElementRef<'_>) -> Option<bool> {
    Some(true)
}

/// Resolves [`ReviewFields`] from fragment markup.
pub struct FieldExtractor {
    title: Chain<String>,
    body: Chain<String>,
    rating: Chain<String>,
    votes: Chain<Votes>,
    votes_container: Chain<bool>,
    spoiler_toggle: Chain<bool>,
    spoiler_window_chars: usize,
}

impl FieldExtractor {
    /// Chains built from the rule book's selectors.
    pub fn from_rules(rules: &FieldRules, config: &ExtractionConfig) -> Self {
        Self {
            title: Chain::from_selectors(&rules.title, non_empty_text),
            body: Chain::from_selectors(&rules.body, non_empty_text),
            rating: Chain::from_selectors(&rules.rating, rating_text),
            votes: Chain::from_selectors(&rules.votes, vote_counts),
            votes_container: Chain::from_selectors(&rules.votes, present),
            spoiler_toggle: Chain::from_selectors(&rules.spoiler_toggle, present),
            spoiler_window_chars: config.spoiler_window_chars,
        }
    }

    /// Replace or extend the rating chain.
    pub fn map_rating(mut self, edit: impl FnOnce(Chain<String>) -> Chain<String>) -> Self {
        self.rating = edit(std::mem::take(&mut self.rating));
        self
    }

    /// Never fails as a whole: unreadable markup marks every field `Failed`.
    pub fn extract(&self, fragment: &Fragment) -> ReviewFields {
        match &fragment.markup {
            Ok(markup) => self.extract_markup(markup),
            Err(e) => ReviewFields::all_failed(&e.to_string()),
        }
    }

    pub fn extract_markup(&self, markup: &str) -> ReviewFields {
        let html = Html::parse_fragment(markup);
        let root = html.root_element();

        let title = self.title.resolve(&root);
        let raw_body = self.body.resolve(&root);
        let rating = self.rating.resolve(&root);
        let votes = match self.votes.resolve(&root) {
            FieldResult::Absent if !self.votes_container.resolve(&root).is_resolved() => {
                FieldResult::Resolved(Votes {
                    helpful: Some(0),
                    unhelpful: Some(0),
                })
            }
            other => other,
        };
        let toggle = self.spoiler_toggle.resolve(&root);

        let body = match raw_body {
            FieldResult::Resolved(text) => {
                let cleaned = normalize_body(&text, title.value().map(String::as_str));
                if cleaned.is_empty() {
                    FieldResult::Absent
                } else {
                    FieldResult::Resolved(cleaned)
                }
            }
            other => other,
        };
        let spoiler = self.spoiler_flag(&body, &toggle);
        let (helpful, unhelpful) = split_votes(votes);

        ReviewFields {
            title: title.map(|t| collapse_whitespace(&t)),
            body,
            rating,
            helpful,
            unhelpful,
            spoiler,
        }
    }

    /// True when the cleaned body mentions a spoiler near its start or the
    /// fragment has a spoiler toggle. A leading "SPOILER" marker has already
    /// been stripped from the body and does not count.
    fn spoiler_flag(&self, body: &FieldResult<String>, toggle: &FieldResult<bool>) -> FieldResult<bool> {
        let in_body = body
            .value()
            .is_some_and(|b| spoiler_in_text(b, self.spoiler_window_chars));
        let has_toggle = toggle.value().copied().unwrap_or(false);
        if in_body || has_toggle {
            return FieldResult::Resolved(true);
        }
        match (body, toggle) {
            (FieldResult::Failed(reason), _) | (_, FieldResult::Failed(reason)) => {
                FieldResult::Failed(reason.clone())
            }
            _ => FieldResult::Resolved(false),
        }
    }
}

fn split_votes(votes: FieldResult<Votes>) -> (FieldResult<u32>, FieldResult<u32>) {
    match votes {
        FieldResult::Resolved(v) => (
            v.helpful.map_or(FieldResult::Absent, FieldResult::Resolved),
            v.unhelpful.map_or(FieldResult::Absent, FieldResult::Resolved),
        ),
        FieldResult::Absent => (FieldResult::Absent, FieldResult::Absent),
        FieldResult::Failed(reason) => (
            FieldResult::Failed(reason.clone()),
            FieldResult::Failed(reason),
        ),
    }
}

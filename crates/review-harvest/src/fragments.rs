//! Fragment collection and de-duplication.
//!
//! The fragment rules overlap on purpose (an outer card and its inner
//! container can both match), so the same review is usually seen more than
//! once. Each candidate gets a [`FragmentKey`]: its native id attribute when
//! it has one, else a digest of its title and leading body text, else its
//! position among the raw candidates. A candidate with a native id is
//! dropped only when that id was seen before; one without is dropped when
//! its digest matches any earlier candidate, so an inner container without
//! an id merges into the card that carries one.

use std::collections::HashSet;
use std::hash::Hasher;
use std::time::Duration;

use fnv::FnvHasher;
use scraper::{ElementRef, Html};

use crate::config::ExtractionConfig;
use crate::deadline::Deadline;
use crate::error::{ExtractError, Interrupted};
use crate::events::{EventSink, HarvestEventKind};
use crate::markup::{element_text, parse_selector};
use crate::renderer::{Document, Element};
use crate::rules::RuleBook;
use crate::types::FragmentKey;

/// One unique review container, captured as markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub key: FragmentKey,
    /// The fragment rule that first matched it.
    pub rule: String,
    /// Outer HTML at collection time, or why it could not be read.
    pub markup: Result<String, ExtractError>,
}

/// Collects unique fragments from a document.
pub struct Deduplicator<'r> {
    rules: &'r RuleBook,
    config: &'r ExtractionConfig,
}

impl<'r> Deduplicator<'r> {
    pub fn new(rules: &'r RuleBook, config: &'r ExtractionConfig) -> Self {
        Self { rules, config }
    }

    /// Every unique fragment, in first-seen order.
    ///
    /// Running it twice on an unchanged document yields the same keys in the
    /// same order.
    pub async fn collect_unique(
        &self,
        doc: &dyn Document,
        deadline: &Deadline,
        events: &EventSink,
    ) -> Result<Vec<Fragment>, Interrupted> {
        let mut natives = HashSet::new();
        let mut signatures = HashSet::new();
        let mut fragments = Vec::new();
        let mut raw = 0usize;
        let read_timeout = Duration::from_millis(self.config.fragment_timeout_ms);

        for selector in &self.rules.fragments {
            deadline.check("fragments")?;
            let candidates = match doc.find(selector).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    tracing::warn!(selector = %selector, error = %e, "fragment rule failed");
                    continue;
                }
            };

            for candidate in &candidates {
                let ordinal = raw;
                raw += 1;

                let read = deadline
                    .bound(
                        "fragments",
                        tokio::time::timeout(read_timeout, self.read(candidate.as_ref())),
                    )
                    .await?;
                let (native, markup) = match read {
                    Ok(read) => read,
                    Err(_) => (
                        None,
                        Err(ExtractError::MarkupUnavailable(format!(
                            "timed out after {}ms",
                            self.config.fragment_timeout_ms
                        ))),
                    ),
                };
                let signature = markup
                    .as_ref()
                    .ok()
                    .and_then(|m| self.signature(m));

                let duplicate = match (&native, &signature) {
                    (Some(id), _) => natives.contains(id),
                    (None, Some(digest)) => signatures.contains(digest),
                    (None, None) => false,
                };
                if duplicate {
                    continue;
                }

                let key = match (&native, &signature) {
                    (Some(id), _) => FragmentKey::Native(id.clone()),
                    (None, Some(digest)) => FragmentKey::Signature(digest.clone()),
                    (None, None) => {
                        if let Err(e) = &markup {
                            tracing::debug!(ordinal, error = %e, "keeping unreadable fragment by position");
                        }
                        FragmentKey::Ordinal(ordinal)
                    }
                };
                if let Some(id) = native {
                    natives.insert(id);
                }
                if let Some(digest) = signature {
                    signatures.insert(digest);
                }
                fragments.push(Fragment {
                    key,
                    rule: selector.clone(),
                    markup,
                });
            }
        }

        tracing::info!(raw, unique = fragments.len(), "fragments collected");
        events.emit(HarvestEventKind::FragmentsCollected {
            raw,
            unique: fragments.len(),
        });
        Ok(fragments)
    }

    /// Native id (if any) and outer markup of one candidate.
    async fn read(&self, candidate: &dyn Element) -> (Option<String>, Result<String, ExtractError>) {
        let mut native = None;
        for name in &self.rules.native_id_attributes {
            match candidate.attribute(name).await {
                Ok(Some(value)) if !value.trim().is_empty() => {
                    native = Some(value.trim().to_string());
                    break;
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(attribute = %name, error = %e, "attribute read failed"),
            }
        }
        let markup = candidate
            .raw_markup()
            .await
            .map_err(|e| ExtractError::MarkupUnavailable(format!("{e:#}")));
        (native, markup)
    }

    /// Digest of the first title text and the leading body text, or `None`
    /// when both are empty.
    fn signature(&self, markup: &str) -> Option<String> {
        let html = Html::parse_fragment(markup);
        let root = html.root_element();
        let title = first_text(&root, &self.rules.fields.title);
        let body: String = first_text(&root, &self.rules.fields.body)
            .chars()
            .take(self.config.signature_prefix_chars)
            .collect();
        if title.is_empty() && body.is_empty() {
            return None;
        }
        let mut hasher = FnvHasher::default();
        hasher.write(title.as_bytes());
        hasher.write_u8(0x1f);
        hasher.write(body.as_bytes());
        Some(format!("{:016x}", hasher.finish()))
    }
}

/// Text of the first non-empty match among `selectors`.
fn first_text(root: &ElementRef<'_>, selectors: &[String]) -> String {
    for selector in selectors {
        let Ok(selector) = parse_selector(selector) else {
            continue;
        };
        if let Some(text) = root
            .select(&selector)
            .map(|el| element_text(&el))
            .find(|text| !text.is_empty())
        {
            return text;
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::snapshot::SnapshotRenderer;
    use crate::renderer::{LaunchProfile, Renderer};

    fn profile() -> LaunchProfile {
        LaunchProfile {
            user_agent: "test".to_string(),
            viewport_width: 1920,
            viewport_height: 1080,
            headless: true,
            chromium_path: None,
        }
    }

    async fn collect(html: &str) -> Vec<Fragment> {
        let renderer = SnapshotRenderer::new(html);
        let doc = renderer.new_document(&profile()).await.unwrap();
        let rules = RuleBook::embedded().unwrap();
        let config = ExtractionConfig::default();
        Deduplicator::new(&rules, &config)
            .collect_unique(doc.as_ref(), &Deadline::unbounded(), &EventSink::disabled())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_shared_native_id_collapses() {
        let html = r#"<html><body>
            <div data-testid="review-card-parent" data-review-id="rw1"><h3 class="title">A</h3></div>
            <div data-testid="review-card-parent" data-review-id="rw1"><h3 class="title">A again</h3></div>
            <div data-testid="review-card-parent"><h3 class="title">B</h3></div>
            </body></html>"#;
        let fragments = collect(html).await;
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].key, FragmentKey::Native("rw1".to_string()));
        assert!(matches!(fragments[1].key, FragmentKey::Signature(_)));
    }

    #[tokio::test]
    async fn test_distinct_ids_with_same_content_stay_apart() {
        let html = r#"<html><body>
            <div data-testid="review-card-parent" data-review-id="rw1">
              <h3 class="title">Great</h3><div class="review-text">Great movie</div>
            </div>
            <div data-testid="review-card-parent" data-review-id="rw2">
              <h3 class="title">Great</h3><div class="review-text">Great movie</div>
            </div>
            </body></html>"#;
        let keys: Vec<_> = collect(html).await.into_iter().map(|f| f.key).collect();
        assert_eq!(
            keys,
            vec![
                FragmentKey::Native("rw1".to_string()),
                FragmentKey::Native("rw2".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_nested_match_collapses_by_signature() {
        // The outer card and the inner container carry the same review.
        let html = r#"<html><body>
            <div data-testid="review-card-parent" data-review-id="rw9">
              <div class="review-container">
                <a class="title">Great</a>
                <div class="content"><div class="text">Loved every minute.</div></div>
              </div>
            </div>
            </body></html>"#;
        let fragments = collect(html).await;
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].key, FragmentKey::Native("rw9".to_string()));
    }

    #[tokio::test]
    async fn test_empty_candidates_keep_ordinals() {
        let html = r#"<html><body>
            <article class="review"></article>
            <article class="review"></article>
            </body></html>"#;
        let fragments = collect(html).await;
        assert_eq!(
            fragments.iter().map(|f| f.key.clone()).collect::<Vec<_>>(),
            vec![FragmentKey::Ordinal(0), FragmentKey::Ordinal(1)]
        );
    }

    #[tokio::test]
    async fn test_collect_is_stable() {
        let html = r#"<html><body>
            <div class="user-review-item"><h3 class="title">One</h3></div>
            <div class="user-review-item"><h3 class="title">Two</h3></div>
            <div class="user-review-item" data-id="x3"></div>
            </body></html>"#;
        let first: Vec<_> = collect(html).await.into_iter().map(|f| f.key).collect();
        let second: Vec<_> = collect(html).await.into_iter().map(|f| f.key).collect();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_no_candidates() {
        assert!(collect("<html><body><p>Nothing here</p></body></html>")
            .await
            .is_empty());
    }
}

//! Progressive disclosure: pagination ("see all") controls, collapsed
//! spoiler sections, and scroll-triggered lazy loading.
//!
//! Nothing in here fails a run except an [`Interrupted`] deadline. A control
//! that cannot be found, read or clicked is logged, reported as
//! `DisclosureSkipped` and passed over.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::DisclosureConfig;
use crate::deadline::Deadline;
use crate::error::Interrupted;
use crate::events::{EventSink, HarvestEventKind};
use crate::renderer::{Document, Element, SCROLL_TO_END_JS};
use crate::rules::RuleBook;

/// Attribute the free-text scan puts on controls it wants clicked.
const SCAN_MARKER: &str = "data-harvest-disclosure";

/// Rule name reported for the free-text fallback.
pub const FREE_TEXT_RULE: &str = "free-text scan";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisclosureStep {
    Pagination,
    Sections,
    Scroll,
}

/// One disclosure attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosureAction {
    pub step: DisclosureStep,
    /// Selector (or [`FREE_TEXT_RULE`]) that produced the activation, or the
    /// last one tried.
    pub rule: String,
    pub matched: usize,
    pub triggered: bool,
    /// Change in raw fragment candidates caused by the action. For section
    /// expansion, the number of toggles activated.
    pub content_delta: i64,
}

/// Everything `expand_all` did, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionReport {
    pub actions: Vec<DisclosureAction>,
    /// Follow-up rounds actually run after the initial pass.
    pub rounds: u32,
}

impl ExpansionReport {
    pub fn pagination_triggered(&self) -> usize {
        self.count(DisclosureStep::Pagination)
    }

    pub fn sections_activated(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.step == DisclosureStep::Sections)
            .map(|a| a.content_delta.max(0) as usize)
            .sum()
    }

    fn count(&self, step: DisclosureStep) -> usize {
        self.actions
            .iter()
            .filter(|a| a.step == step && a.triggered)
            .count()
    }
}

/// Drives the disclosure loop against one document.
pub struct DisclosureEngine<'r> {
    rules: &'r RuleBook,
    config: &'r DisclosureConfig,
}

impl<'r> DisclosureEngine<'r> {
    pub fn new(rules: &'r RuleBook, config: &'r DisclosureConfig) -> Self {
        Self { rules, config }
    }

    /// Initial pagination and section pass, then up to
    /// `follow_up_rounds` rounds of scroll, pagination and sections. Stops
    /// early once a round brings in no new fragment candidates.
    pub async fn expand_all(
        &self,
        doc: &dyn Document,
        deadline: &Deadline,
        events: &EventSink,
    ) -> Result<ExpansionReport, Interrupted> {
        let mut report = ExpansionReport::default();

        let pagination = self.paginate(doc, deadline, events).await?;
        report.actions.push(pagination);
        let sections = self.expand_sections(doc, deadline, events).await?;
        report.actions.push(sections);

        let round_timeout = Duration::from_millis(self.config.round_timeout_ms);
        for round in 1..=self.config.follow_up_rounds {
            deadline.check("disclosure")?;
            let outcome = tokio::time::timeout(
                round_timeout,
                self.follow_up(doc, deadline, events, &mut report),
            )
            .await;
            report.rounds = round;
            match outcome {
                Ok(Ok(delta)) if delta > 0 => {
                    tracing::debug!(round, delta, "round loaded more content");
                }
                Ok(Ok(delta)) => {
                    tracing::debug!(round, delta, "round loaded nothing new, stopping");
                    break;
                }
                Ok(Err(interrupted)) => return Err(interrupted),
                Err(_) => {
                    tracing::warn!(round, timeout_ms = self.config.round_timeout_ms, "disclosure round timed out");
                    events.emit(HarvestEventKind::DisclosureSkipped {
                        step: format!("round {round}"),
                        reason: "round timed out".to_string(),
                    });
                    break;
                }
            }
        }

        deadline
            .sleep("disclosure", Duration::from_millis(self.config.final_settle_ms))
            .await?;
        tracing::info!(
            rounds = report.rounds,
            pagination = report.pagination_triggered(),
            "disclosure finished"
        );
        Ok(report)
    }

    /// Scroll, paginate, expand. Returns the round's change in candidates.
    async fn follow_up(
        &self,
        doc: &dyn Document,
        deadline: &Deadline,
        events: &EventSink,
        report: &mut ExpansionReport,
    ) -> Result<i64, Interrupted> {
        let before = self.count_candidates(doc).await;

        let scroll = self.scroll_to_end(doc, deadline, events).await?;
        report.actions.push(scroll);
        let pagination = self.paginate(doc, deadline, events).await?;
        report.actions.push(pagination);
        let sections = self.expand_sections(doc, deadline, events).await?;
        report.actions.push(sections);

        let after = self.count_candidates(doc).await;
        Ok(after as i64 - before as i64)
    }

    async fn scroll_to_end(
        &self,
        doc: &dyn Document,
        deadline: &Deadline,
        events: &EventSink,
    ) -> Result<DisclosureAction, Interrupted> {
        let before = self.count_candidates(doc).await;
        let triggered = match doc.evaluate(SCROLL_TO_END_JS).await {
            Ok(_) => {
                events.emit(HarvestEventKind::ScrolledToEnd);
                true
            }
            Err(e) => {
                self.skip(events, "scroll", &e);
                false
            }
        };
        deadline
            .sleep("scroll", Duration::from_millis(self.config.scroll_settle_ms))
            .await?;
        let after = self.count_candidates(doc).await;
        Ok(DisclosureAction {
            step: DisclosureStep::Scroll,
            rule: "scroll to end".to_string(),
            matched: 0,
            triggered,
            content_delta: after as i64 - before as i64,
        })
    }

    /// Activate the first qualifying pagination control, falling back to a
    /// free-text scan of interactive elements. At most one activation.
    pub async fn paginate(
        &self,
        doc: &dyn Document,
        deadline: &Deadline,
        events: &EventSink,
    ) -> Result<DisclosureAction, Interrupted> {
        let mut matched = 0;
        for selector in &self.rules.pagination.selectors {
            deadline.check("pagination")?;
            let controls = match doc.find(selector).await {
                Ok(controls) => controls,
                Err(e) => {
                    tracing::debug!(selector = %selector, error = %e, "pagination lookup failed");
                    continue;
                }
            };
            matched += controls.len();
            if let Some(action) = self
                .activate_first(doc, &controls, selector, deadline, events)
                .await?
            {
                return Ok(action);
            }
        }

        if let Some(action) = self.free_text_scan(doc, deadline, events).await? {
            return Ok(action);
        }

        tracing::debug!(matched, "no pagination control to activate");
        let action = DisclosureAction {
            step: DisclosureStep::Pagination,
            rule: FREE_TEXT_RULE.to_string(),
            matched,
            triggered: false,
            content_delta: 0,
        };
        self.report_pagination(events, &action);
        Ok(action)
    }

    async fn free_text_scan(
        &self,
        doc: &dyn Document,
        deadline: &Deadline,
        events: &EventSink,
    ) -> Result<Option<DisclosureAction>, Interrupted> {
        deadline.check("pagination")?;
        let script = free_text_scan_script(
            &self.rules.pagination.scan_targets,
            &self.rules.pagination.keywords,
        );
        match doc.evaluate(&script).await {
            Ok(marked) => tracing::debug!(marked = %marked, "free-text scan ran"),
            Err(e) => {
                self.skip(events, "pagination scan", &e);
                return Ok(None);
            }
        }
        let selector = format!("[{SCAN_MARKER}]");
        let controls = match doc.find(&selector).await {
            Ok(controls) => controls,
            Err(e) => {
                self.skip(events, "pagination scan", &e);
                return Ok(None);
            }
        };
        self.activate_first(doc, &controls, FREE_TEXT_RULE, deadline, events)
            .await
    }

    async fn activate_first(
        &self,
        doc: &dyn Document,
        controls: &[Box<dyn Element + '_>],
        rule: &str,
        deadline: &Deadline,
        events: &EventSink,
    ) -> Result<Option<DisclosureAction>, Interrupted> {
        for control in controls {
            if !self.qualifies(control.as_ref()).await {
                continue;
            }

            let before = self.count_candidates(doc).await;
            let url_before = doc.current_url().await.ok();

            if let Err(e) = control.scroll_into_view().await {
                tracing::debug!(error = %e, "scroll into view failed");
            }
            deadline
                .sleep(
                    "pagination",
                    Duration::from_millis(self.config.scroll_into_view_pause_ms),
                )
                .await?;
            if let Err(e) = control.activate().await {
                self.skip(events, "pagination", &e);
                continue;
            }
            deadline
                .sleep("pagination", self.config.pagination_settle.sample())
                .await?;

            let url_after = doc.current_url().await.ok();
            if let (Some(before), Some(after)) = (&url_before, &url_after) {
                if before != after {
                    tracing::warn!(from = %before, to = %after, "pagination changed the document locator");
                }
            }

            let after = self.count_candidates(doc).await;
            let action = DisclosureAction {
                step: DisclosureStep::Pagination,
                rule: rule.to_string(),
                matched: controls.len(),
                triggered: true,
                content_delta: after as i64 - before as i64,
            };
            tracing::info!(rule = %rule, delta = action.content_delta, "pagination control activated");
            self.report_pagination(events, &action);
            return Ok(Some(action));
        }
        Ok(None)
    }

    /// Visible, enabled, and its text names one of the pagination keywords.
    async fn qualifies(&self, control: &dyn Element) -> bool {
        let text = match control.text().await {
            Ok(text) => text.to_lowercase(),
            Err(_) => return false,
        };
        if !self
            .rules
            .pagination
            .keywords
            .iter()
            .any(|k| text.contains(k.as_str()))
        {
            return false;
        }
        control.is_visible().await.unwrap_or(false) && control.is_enabled().await.unwrap_or(false)
    }

    /// Click every visible collapsed section once.
    pub async fn expand_sections(
        &self,
        doc: &dyn Document,
        deadline: &Deadline,
        events: &EventSink,
    ) -> Result<DisclosureAction, Interrupted> {
        let mut seen = HashSet::new();
        let mut candidates = 0usize;
        let mut activated = 0usize;

        for selector in &self.rules.sections {
            deadline.check("sections")?;
            let toggles = match doc.find(selector).await {
                Ok(toggles) => toggles,
                Err(e) => {
                    tracing::debug!(selector = %selector, error = %e, "section lookup failed");
                    continue;
                }
            };
            for toggle in &toggles {
                let identity = match element_identity(toggle.as_ref()).await {
                    Ok(identity) => identity,
                    Err(e) => {
                        tracing::debug!(error = %e, "could not identify section toggle");
                        continue;
                    }
                };
                if !seen.insert(identity) {
                    continue;
                }
                candidates += 1;
                if !toggle.is_visible().await.unwrap_or(false) {
                    continue;
                }
                if activated > 0 {
                    deadline
                        .sleep("sections", self.config.section_gap.sample())
                        .await?;
                }
                match toggle.activate().await {
                    Ok(()) => activated += 1,
                    Err(e) => self.skip(events, "section", &e),
                }
            }
        }

        if activated > 0 {
            deadline
                .sleep(
                    "sections",
                    Duration::from_millis(self.config.section_settle_ms),
                )
                .await?;
        }
        tracing::debug!(candidates, activated, "sections expanded");
        events.emit(HarvestEventKind::SectionsExpanded {
            candidates,
            activated,
        });
        Ok(DisclosureAction {
            step: DisclosureStep::Sections,
            rule: "sections".to_string(),
            matched: candidates,
            triggered: activated > 0,
            content_delta: activated as i64,
        })
    }

    /// Raw fragment candidates currently in the document.
    async fn count_candidates(&self, doc: &dyn Document) -> usize {
        let mut total = 0;
        for selector in &self.rules.fragments {
            if let Ok(found) = doc.find(selector).await {
                total += found.len();
            }
        }
        total
    }

    fn report_pagination(&self, events: &EventSink, action: &DisclosureAction) {
        events.emit(HarvestEventKind::PaginationAttempted {
            rule: action.rule.clone(),
            matched: action.matched,
            triggered: action.triggered,
            content_delta: action.content_delta,
        });
    }

    fn skip(&self, events: &EventSink, step: &str, error: &anyhow::Error) {
        tracing::warn!(step, error = %error, "disclosure step skipped");
        events.emit(HarvestEventKind::DisclosureSkipped {
            step: step.to_string(),
            reason: format!("{error:#}"),
        });
    }
}

/// Native id when present, else tag name plus position.
async fn element_identity(element: &dyn Element) -> anyhow::Result<String> {
    if let Some(id) = element.attribute("id").await? {
        if !id.is_empty() {
            return Ok(format!("#{id}"));
        }
    }
    let tag = element.tag_name().await?;
    match element.position().await? {
        Some((x, y)) => Ok(format!("{tag}@{x},{y}")),
        None => Ok(format!("{tag}:{}", element.raw_markup().await?)),
    }
}

/// Script that marks every visible interactive element whose text contains
/// one of `keywords` with [`SCAN_MARKER`] and returns how many it marked.
fn free_text_scan_script(targets: &str, keywords: &[String]) -> String {
    let targets = serde_json::to_string(targets).unwrap_or_else(|_| "\"button\"".to_string());
    let keywords = serde_json::to_string(keywords).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"(() => {{
  document.querySelectorAll('[{SCAN_MARKER}]').forEach(el => el.removeAttribute('{SCAN_MARKER}'));
  const keywords = {keywords};
  let marked = 0;
  for (const el of document.querySelectorAll({targets})) {{
    const rect = el.getBoundingClientRect();
    if (rect.width === 0 || rect.height === 0) continue;
    const text = (el.innerText || el.textContent || '').toLowerCase();
    if (keywords.some(k => text.includes(k))) {{
      el.setAttribute('{SCAN_MARKER}', String(marked));
      marked += 1;
    }}
  }}
  return marked;
}})()"#
    )
}

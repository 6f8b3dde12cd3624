//! Renderer over saved HTML, for offline runs and tests.
//!
//! A snapshot is a list of HTML *stages*. The document starts at stage 0;
//! clicking an element carrying `data-reveals="N"` switches it to stage N,
//! and scrolling to the end switches to the stage named by
//! `data-scroll-reveals` on `<body>`. That is enough to replay a page whose
//! "see all" button or lazy loader brings in more reviews. Scripts are not
//! executed: `evaluate` returns `null`.
//!
//! Elements are snapshots taken at `find` time. Activating one after the
//! document has moved to another stage fails, the way a stale element
//! reference does in a real browser.

use super::{Document, Element, LaunchProfile, NavigationResult, Renderer, SCROLL_TO_END_JS};
use crate::markup::{element_text, is_hidden};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// What happened to snapshot documents, for assertions and `--snapshot` runs.
#[derive(Debug, Clone, Default)]
pub struct SnapshotLog {
    pub navigations: Vec<String>,
    /// One entry per successful activation: `tag#id` or `tag` plus text.
    pub activations: Vec<String>,
    pub scripts: Vec<String>,
    pub user_agents: Vec<String>,
    pub closed: usize,
}

/// Serves fixed HTML stages.
pub struct SnapshotRenderer {
    stages: Arc<Vec<String>>,
    log: Arc<Mutex<SnapshotLog>>,
    active_count: Arc<AtomicUsize>,
    fail_navigation: bool,
}

impl SnapshotRenderer {
    /// A single-stage snapshot.
    pub fn new(html: impl Into<String>) -> Self {
        Self::with_stages(vec![html.into()])
    }

    pub fn with_stages(stages: Vec<String>) -> Self {
        Self {
            stages: Arc::new(stages),
            log: Arc::new(Mutex::new(SnapshotLog::default())),
            active_count: Arc::new(AtomicUsize::new(0)),
            fail_navigation: false,
        }
    }

    /// Load a saved page from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let html = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        Ok(Self::new(html))
    }

    /// Make every navigation fail, as an unreachable host would.
    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    pub fn log(&self) -> SnapshotLog {
        lock(&self.log).clone()
    }
}

#[async_trait]
impl Renderer for SnapshotRenderer {
    async fn new_document(&self, profile: &LaunchProfile) -> Result<Box<dyn Document>> {
        if self.stages.is_empty() {
            bail!("snapshot has no stages");
        }
        lock(&self.log).user_agents.push(profile.user_agent.clone());
        self.active_count.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(SnapshotDocument {
            stages: Arc::clone(&self.stages),
            log: Arc::clone(&self.log),
            active_count: Arc::clone(&self.active_count),
            fail_navigation: self.fail_navigation,
            state: Mutex::new(SnapshotState {
                stage: 0,
                url: "about:blank".to_string(),
            }),
        }))
    }

    fn active_documents(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

struct SnapshotState {
    stage: usize,
    url: String,
}

pub struct SnapshotDocument {
    stages: Arc<Vec<String>>,
    log: Arc<Mutex<SnapshotLog>>,
    active_count: Arc<AtomicUsize>,
    fail_navigation: bool,
    state: Mutex<SnapshotState>,
}

/// Everything an element exposes, captured when it was found.
#[derive(Debug, Clone)]
struct ElementSnapshot {
    tag: String,
    attrs: Vec<(String, String)>,
    text: String,
    markup: String,
    hidden: bool,
    order: i64,
}

impl ElementSnapshot {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn describe(&self) -> String {
        match self.attr("id") {
            Some(id) => format!("{}#{id}", self.tag),
            None => format!("{} {:?}", self.tag, self.text),
        }
    }
}

impl SnapshotDocument {
    fn current_stage(&self) -> usize {
        lock(&self.state).stage
    }

    fn select(&self, selector: &str) -> Result<Vec<ElementSnapshot>> {
        let selector =
            Selector::parse(selector).map_err(|e| anyhow!("invalid selector {selector:?}: {e}"))?;
        let stage = self.current_stage();
        let html = Html::parse_document(&self.stages[stage]);
        let snapshots = html
            .select(&selector)
            .map(|el| {
                let order = html
                    .tree
                    .nodes()
                    .position(|n| n.id() == el.id())
                    .unwrap_or_default() as i64;
                ElementSnapshot {
                    tag: el.value().name().to_string(),
                    attrs: el
                        .value()
                        .attrs()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                    text: element_text(&el),
                    markup: el.html(),
                    hidden: is_hidden(&el),
                    order,
                }
            })
            .collect();
        Ok(snapshots)
    }

    fn body_attr(&self, name: &str) -> Option<String> {
        let stage = self.current_stage();
        let html = Html::parse_document(&self.stages[stage]);
        let selector = Selector::parse("body").ok()?;
        let body = html.select(&selector).next()?;
        body.value().attr(name).map(str::to_string)
    }

    fn switch_to(&self, target: &str) -> Result<()> {
        let stage: usize = target
            .parse()
            .with_context(|| format!("bad stage reference {target:?}"))?;
        if stage >= self.stages.len() {
            bail!("stage {stage} does not exist");
        }
        lock(&self.state).stage = stage;
        Ok(())
    }
}

#[async_trait]
impl Document for SnapshotDocument {
    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
        lock(&self.log).navigations.push(url.to_string());
        if self.fail_navigation {
            bail!("net::ERR_NAME_NOT_RESOLVED at {url}");
        }
        let mut state = lock(&self.state);
        state.stage = 0;
        state.url = url.to_string();
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 0,
        })
    }

    async fn find<'a>(&'a self, selector: &str) -> Result<Vec<Box<dyn Element + 'a>>> {
        let stage = self.current_stage();
        Ok(self
            .select(selector)?
            .into_iter()
            .map(|snap| {
                Box::new(SnapshotElement {
                    doc: self,
                    stage,
                    snap,
                }) as Box<dyn Element + 'a>
            })
            .collect())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        lock(&self.log).scripts.push(script.to_string());
        if script == SCROLL_TO_END_JS {
            if let Some(target) = self.body_attr("data-scroll-reveals") {
                self.switch_to(&target)?;
            }
        }
        Ok(serde_json::Value::Null)
    }

    async fn current_url(&self) -> Result<String> {
        Ok(lock(&self.state).url.clone())
    }

    async fn title(&self) -> Result<String> {
        Ok(self
            .select("title")?
            .into_iter()
            .next()
            .map(|s| s.text)
            .unwrap_or_default())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        lock(&self.log).closed += 1;
        Ok(())
    }
}

struct SnapshotElement<'a> {
    doc: &'a SnapshotDocument,
    stage: usize,
    snap: ElementSnapshot,
}

#[async_trait]
impl Element for SnapshotElement<'_> {
    async fn text(&self) -> Result<String> {
        Ok(self.snap.text.clone())
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        Ok(self.snap.attr(name).map(str::to_string))
    }

    async fn tag_name(&self) -> Result<String> {
        Ok(self.snap.tag.clone())
    }

    async fn position(&self) -> Result<Option<(i64, i64)>> {
        Ok((!self.snap.hidden).then_some((0, self.snap.order)))
    }

    async fn is_visible(&self) -> Result<bool> {
        Ok(!self.snap.hidden)
    }

    async fn is_enabled(&self) -> Result<bool> {
        Ok(self.snap.attr("disabled").is_none() && self.snap.attr("aria-disabled") != Some("true"))
    }

    async fn scroll_into_view(&self) -> Result<()> {
        Ok(())
    }

    async fn activate(&self) -> Result<()> {
        if self.doc.current_stage() != self.stage {
            bail!("stale element: {} was found before the document changed", self.snap.describe());
        }
        if self.snap.attr("data-click-fails").is_some() {
            bail!("click on {} was intercepted", self.snap.describe());
        }
        lock(&self.doc.log).activations.push(self.snap.describe());
        if let Some(target) = self.snap.attr("data-reveals") {
            self.doc.switch_to(target)?;
        }
        Ok(())
    }

    async fn raw_markup(&self) -> Result<String> {
        Ok(self.snap.markup.clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//! Browsing capability consumed by the harvest pipeline.
//!
//! A [`Renderer`] opens one live [`Document`] per run. The document is a
//! mutable, queryable view of the rendered page; [`Element`]s found in it
//! borrow the document and cannot outlive it. Two implementations ship:
//! headless Chromium via chromiumoxide, and a static snapshot renderer used
//! for offline runs and tests.

pub mod chromium;
pub mod snapshot;

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// How the browser should present itself for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchProfile {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub headless: bool,
    pub chromium_path: Option<PathBuf>,
}

/// A browser engine that can open documents.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Launch (or attach to) a browser configured by `profile` and open a
    /// blank document in it.
    async fn new_document(&self, profile: &LaunchProfile) -> Result<Box<dyn Document>>;
    /// Number of documents opened and not yet closed.
    fn active_documents(&self) -> usize;
}

/// A live, rendered page.
#[async_trait]
pub trait Document: Send + Sync {
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// All elements matching a CSS selector, in document order.
    async fn find<'a>(&'a self, selector: &str) -> Result<Vec<Box<dyn Element + 'a>>>;
    /// Execute JavaScript in the page context and return the result.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;
    /// The current URL.
    async fn current_url(&self) -> Result<String>;
    /// The document's `<title>`.
    async fn title(&self) -> Result<String>;
    /// Release the document and whatever browser resources back it.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// One element inside a [`Document`].
#[async_trait]
pub trait Element: Send + Sync {
    /// Rendered text, whitespace-collapsed.
    async fn text(&self) -> Result<String>;
    async fn attribute(&self, name: &str) -> Result<Option<String>>;
    /// Lower-case tag name.
    async fn tag_name(&self) -> Result<String>;
    /// Top-left corner in document coordinates, when laid out.
    async fn position(&self) -> Result<Option<(i64, i64)>>;
    async fn is_visible(&self) -> Result<bool>;
    async fn is_enabled(&self) -> Result<bool>;
    async fn scroll_into_view(&self) -> Result<()>;
    /// Click the element.
    async fn activate(&self) -> Result<()>;
    /// Outer HTML.
    async fn raw_markup(&self) -> Result<String>;
}

/// Script that scrolls the document to its end.
pub const SCROLL_TO_END_JS: &str = "window.scrollTo(0, document.body.scrollHeight); true";

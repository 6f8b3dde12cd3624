//! Chromium-based renderer using chromiumoxide.

use super::{Document, Element, LaunchProfile, NavigationResult, Renderer};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::element::Element as CdpElement;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. REVIEW_HARVEST_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("REVIEW_HARVEST_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.review-harvest/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".review-harvest/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".review-harvest/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".review-harvest/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".review-harvest/chromium/chrome-linux64/chrome"),
                home.join(".review-harvest/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Launches one headless Chromium per document.
pub struct ChromiumRenderer {
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    pub fn new() -> Self {
        Self {
            active_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn browser_config(profile: &LaunchProfile) -> Result<BrowserConfig> {
        let chrome_path = match &profile.chromium_path {
            Some(path) => path.clone(),
            None => find_chromium()
                .context("Chromium not found. Set REVIEW_HARVEST_CHROMIUM_PATH or install Chrome.")?,
        };

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(profile.viewport_width, profile.viewport_height)
            .viewport(None)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg(format!("--user-agent={}", profile.user_agent));
        builder = if profile.headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };

        builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))
    }
}

impl Default for ChromiumRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_document(&self, profile: &LaunchProfile) -> Result<Box<dyn Document>> {
        let config = Self::browser_config(profile)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // Spawn the handler task
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                bail!("failed to create new page: {e}");
            }
        };

        if let Err(e) = page.enable_stealth_mode_with_agent(&profile.user_agent).await {
            tracing::warn!(error = %e, "stealth mode unavailable, continuing without it");
        }

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumDocument {
            browser,
            page,
            handler,
            active_count: Arc::clone(&self.active_count),
        }))
    }

    fn active_documents(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A Chromium page together with the browser process that owns it.
pub struct ChromiumDocument {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    active_count: Arc<AtomicUsize>,
}

#[async_trait]
impl Document for ChromiumDocument {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(timeout_ms),
            self.page.goto(url),
        )
        .await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_)) => {
                let _ = self.page.wait_for_navigation().await;

                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn find<'a>(&'a self, selector: &str) -> Result<Vec<Box<dyn Element + 'a>>> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .with_context(|| format!("find_elements({selector}) failed"))?;
        Ok(elements
            .into_iter()
            .map(|inner| Box::new(ChromiumElement { inner }) as Box<dyn Element + 'a>)
            .collect())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;

        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }

    async fn current_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .context("failed to get URL")?
            .unwrap_or_default();
        Ok(url)
    }

    async fn title(&self) -> Result<String> {
        let title = self
            .page
            .get_title()
            .await
            .context("failed to get title")?
            .unwrap_or_default();
        Ok(title)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ChromiumDocument {
            mut browser,
            page,
            handler,
            active_count,
        } = *self;
        active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = page.close().await;
        if let Err(e) = browser.close().await {
            tracing::debug!(error = %e, "browser close returned an error");
        }
        let _ = browser.wait().await;
        handler.abort();
        Ok(())
    }
}

/// Element handle backed by a CDP remote object.
struct ChromiumElement {
    inner: CdpElement,
}

impl ChromiumElement {
    /// Call `function_declaration` with `this` bound to the element.
    async fn call(&self, function_declaration: &str) -> Result<serde_json::Value> {
        let returns = self
            .inner
            .call_js_fn(function_declaration, false)
            .await
            .context("element function call failed")?;
        Ok(returns.result.value.unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl Element for ChromiumElement {
    async fn text(&self) -> Result<String> {
        let text = self.inner.inner_text().await?.unwrap_or_default();
        Ok(text.split_whitespace().collect::<Vec<_>>().join(" "))
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        Ok(self.inner.attribute(name).await?)
    }

    async fn tag_name(&self) -> Result<String> {
        let value = self
            .call("function() { return this.tagName.toLowerCase(); }")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn position(&self) -> Result<Option<(i64, i64)>> {
        let value = self
            .call(
                "function() { const r = this.getBoundingClientRect(); \
                 return [Math.round(r.left + window.scrollX), Math.round(r.top + window.scrollY)]; }",
            )
            .await?;
        let coords = value
            .as_array()
            .and_then(|a| Some((a.first()?.as_i64()?, a.get(1)?.as_i64()?)));
        Ok(coords)
    }

    async fn is_visible(&self) -> Result<bool> {
        let value = self
            .call(
                "function() { const r = this.getBoundingClientRect(); const s = getComputedStyle(this); \
                 return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'; }",
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn is_enabled(&self) -> Result<bool> {
        let value = self
            .call("function() { return !this.disabled && this.getAttribute('aria-disabled') !== 'true'; }")
            .await?;
        Ok(value.as_bool().unwrap_or(true))
    }

    async fn scroll_into_view(&self) -> Result<()> {
        self.call("function() { this.scrollIntoView({behavior: 'smooth', block: 'center'}); }")
            .await?;
        Ok(())
    }

    async fn activate(&self) -> Result<()> {
        // A native click can be intercepted by overlays; fall back to a DOM click.
        if let Err(e) = self.inner.click().await {
            tracing::debug!(error = %e, "native click failed, dispatching DOM click");
            self.call("function() { this.click(); }").await?;
        }
        Ok(())
    }

    async fn raw_markup(&self) -> Result<String> {
        Ok(self.inner.outer_html().await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> LaunchProfile {
        LaunchProfile {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Chrome/122.0.0.0".to_string(),
            viewport_width: 1280,
            viewport_height: 800,
            headless: true,
            chromium_path: None,
        }
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_navigate_find_and_close() {
        let renderer = ChromiumRenderer::new();
        let mut doc = renderer
            .new_document(&profile())
            .await
            .expect("failed to open document");
        assert_eq!(renderer.active_documents(), 1);

        let nav = doc
            .navigate(
                "data:text/html,<title>T</title><button id='b'>See all</button><p>World</p>",
                10000,
            )
            .await
            .expect("navigation failed");
        assert!(nav.load_time_ms < 10000);

        let buttons = doc.find("button").await.expect("find failed");
        assert_eq!(buttons.len(), 1);
        assert_eq!(buttons[0].text().await.unwrap(), "See all");
        assert_eq!(buttons[0].attribute("id").await.unwrap().as_deref(), Some("b"));
        assert!(buttons[0].is_visible().await.unwrap());
        drop(buttons);

        assert_eq!(doc.title().await.unwrap(), "T");

        doc.close().await.expect("close failed");
        assert_eq!(renderer.active_documents(), 0);
    }
}

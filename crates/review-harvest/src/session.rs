//! Browser session lifecycle: launch, arrive at the target, get past the
//! consent prompt, and release everything afterwards.
//!
//! A [`Session`] exclusively owns the run's single [`Document`]. Other stages
//! borrow it through [`Session::document`]. [`Session::close`] is idempotent;
//! if a session is dropped without being closed, the document is closed on a
//! background task so the browser is never leaked.

use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::deadline::Deadline;
use crate::error::{HarvestError, SessionError};
use crate::events::{EventSink, HarvestEventKind};
use crate::renderer::{Document, LaunchProfile, Renderer};
use crate::types::Target;

/// An open browser session positioned on the target page.
pub struct Session {
    document: Option<Box<dyn Document>>,
    target: Target,
    document_title: String,
    consent_dismissed: bool,
}

impl Session {
    /// Launch a document, navigate to `target`, let it settle and dismiss the
    /// consent prompt matched by `consent_selector`.
    ///
    /// On any failure after launch the document is closed before returning.
    pub async fn open(
        renderer: &dyn Renderer,
        target: &Target,
        config: &SessionConfig,
        consent_selector: &str,
        deadline: &Deadline,
        events: &EventSink,
    ) -> Result<Self, HarvestError> {
        let started = Instant::now();
        let profile = launch_profile(config);
        tracing::debug!(user_agent = %profile.user_agent, headless = profile.headless, "launching browser");

        let document = deadline
            .bound("launch", renderer.new_document(&profile))
            .await?
            .map_err(|e| SessionError::Launch(format!("{e:#}")))?;

        let mut session = Session {
            document: Some(document),
            target: target.clone(),
            document_title: String::new(),
            consent_dismissed: false,
        };

        if let Err(e) = session.arrive(config, consent_selector, deadline).await {
            session.close().await;
            return Err(e);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            locator = %target.locator,
            title = %session.document_title,
            elapsed_ms,
            "session opened"
        );
        events.emit(HarvestEventKind::SessionOpened {
            locator: target.locator.to_string(),
            document_title: session.document_title.clone(),
            elapsed_ms,
        });
        events.emit(HarvestEventKind::ConsentHandled {
            dismissed: session.consent_dismissed,
        });
        Ok(session)
    }

    async fn arrive(
        &mut self,
        config: &SessionConfig,
        consent_selector: &str,
        deadline: &Deadline,
    ) -> Result<(), HarvestError> {
        let url = self.target.locator.to_string();
        let document = self.document.as_mut().ok_or(SessionError::Closed)?;

        let nav = deadline
            .bound(
                "navigation",
                document.navigate(&url, config.navigation_timeout_ms),
            )
            .await?
            .map_err(|e| SessionError::Navigation {
                url: url.clone(),
                reason: format!("{e:#}"),
            })?;
        tracing::debug!(final_url = %nav.final_url, load_time_ms = nav.load_time_ms, "navigated");

        deadline.sleep("settle", config.settle.sample()).await?;

        let document: &dyn Document = &**document;
        self.consent_dismissed = dismiss_consent(document, consent_selector, config, deadline).await?;

        self.document_title = match document.title().await {
            Ok(title) => title.trim().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "could not read document title");
                String::new()
            }
        };
        Ok(())
    }

    /// The live document, until the session is closed.
    pub fn document(&self) -> Result<&dyn Document, SessionError> {
        self.document.as_deref().ok_or(SessionError::Closed)
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn document_title(&self) -> &str {
        &self.document_title
    }

    pub fn consent_dismissed(&self) -> bool {
        self.consent_dismissed
    }

    pub fn is_open(&self) -> bool {
        self.document.is_some()
    }

    /// Release the document. Returns `false` if it was already released.
    pub async fn close(&mut self) -> bool {
        match self.document.take() {
            Some(document) => {
                if let Err(e) = document.close().await {
                    tracing::warn!(error = %e, "document close failed");
                }
                tracing::debug!(locator = %self.target.locator, "session closed");
                true
            }
            None => false,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(document) = self.document.take() {
            tracing::warn!(locator = %self.target.locator, "session dropped while open, closing in background");
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = document.close().await {
                            tracing::warn!(error = %e, "background document close failed");
                        }
                    });
                }
                Err(_) => tracing::error!("no runtime available to close the document"),
            }
        }
    }
}

fn launch_profile(config: &SessionConfig) -> LaunchProfile {
    let user_agent = config
        .user_agents
        .choose(&mut rand::thread_rng())
        .cloned()
        .unwrap_or_default();
    LaunchProfile {
        user_agent,
        viewport_width: config.viewport_width,
        viewport_height: config.viewport_height,
        headless: config.headless,
        chromium_path: config.chromium_path.clone(),
    }
}

/// Poll for the consent control until it can be clicked or the wait runs
/// out. Not finding it means the prompt was already dismissed.
async fn dismiss_consent(
    document: &dyn Document,
    selector: &str,
    config: &SessionConfig,
    deadline: &Deadline,
) -> Result<bool, crate::error::Interrupted> {
    let give_up_at = Instant::now() + Duration::from_millis(config.consent_timeout_ms);
    let poll = Duration::from_millis(config.consent_poll_ms.max(1));

    loop {
        match document.find(selector).await {
            Ok(found) => {
                for control in &found {
                    let ready = control.is_visible().await.unwrap_or(false)
                        && control.is_enabled().await.unwrap_or(false);
                    if !ready {
                        continue;
                    }
                    return match control.activate().await {
                        Ok(()) => {
                            tracing::info!("consent prompt dismissed");
                            deadline
                                .sleep("consent", Duration::from_millis(config.consent_pause_ms))
                                .await?;
                            Ok(true)
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "consent control found but click failed");
                            Ok(false)
                        }
                    };
                }
            }
            Err(e) => tracing::debug!(error = %e, "consent lookup failed"),
        }

        if Instant::now() + poll > give_up_at {
            tracing::debug!("no consent prompt, assuming already dismissed");
            return Ok(false);
        }
        deadline.sleep("consent", poll).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Jitter;
    use crate::renderer::snapshot::SnapshotRenderer;

    const CONSENT: &str = r#"button[data-testid="accept-button"]"#;

    fn quick_config() -> SessionConfig {
        SessionConfig {
            settle: Jitter::ZERO,
            consent_pause_ms: 0,
            ..SessionConfig::default()
        }
    }

    fn target() -> Target {
        Target::new("https://www.imdb.com/title/tt0111161/reviews/", 111161).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_dismisses_consent_and_reads_title() {
        let renderer = SnapshotRenderer::new(
            r#"<html><head><title> Reviews </title></head><body>
               <button data-testid="accept-button">Accept</button></body></html>"#,
        );
        let deadline = Deadline::unbounded();
        let mut session = Session::open(
            &renderer,
            &target(),
            &quick_config(),
            CONSENT,
            &deadline,
            &EventSink::disabled(),
        )
        .await
        .unwrap();

        assert!(session.consent_dismissed());
        assert_eq!(session.document_title(), "Reviews");
        assert_eq!(renderer.log().activations.len(), 1);
        assert_eq!(renderer.active_documents(), 1);

        assert!(session.close().await);
        assert!(!session.close().await);
        assert!(session.document().is_err());
        assert_eq!(renderer.active_documents(), 0);
        assert_eq!(renderer.log().closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_consent_is_not_an_error() {
        let renderer = SnapshotRenderer::new("<html><body><p>No prompt</p></body></html>");
        let config = quick_config();
        let started = Instant::now();
        let mut session = Session::open(
            &renderer,
            &target(),
            &config,
            CONSENT,
            &Deadline::unbounded(),
            &EventSink::disabled(),
        )
        .await
        .unwrap();
        assert!(!session.consent_dismissed());
        assert!(started.elapsed() <= Duration::from_millis(config.consent_timeout_ms));
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_failure_closes_document() {
        let renderer = SnapshotRenderer::new("<html></html>").failing_navigation();
        let err = Session::open(
            &renderer,
            &target(),
            &quick_config(),
            CONSENT,
            &Deadline::unbounded(),
            &EventSink::disabled(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(
            err,
            HarvestError::Session(SessionError::Navigation { .. })
        ));
        assert_eq!(renderer.active_documents(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_settle_closes_document() {
        let renderer = SnapshotRenderer::new("<html></html>");
        let config = SessionConfig {
            settle: Jitter::new(5_000, 5_000),
            ..quick_config()
        };
        let err = Session::open(
            &renderer,
            &target(),
            &config,
            CONSENT,
            &Deadline::after(Duration::from_secs(1)),
            &EventSink::disabled(),
        )
        .await
        .err()
        .unwrap();
        assert!(err.is_interrupted());
        assert_eq!(renderer.active_documents(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_without_close_releases_document() {
        let renderer = SnapshotRenderer::new("<html></html>");
        let session = Session::open(
            &renderer,
            &target(),
            &quick_config(),
            CONSENT,
            &Deadline::unbounded(),
            &EventSink::disabled(),
        )
        .await
        .unwrap();
        drop(session);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(renderer.active_documents(), 0);
    }

    #[test]
    fn test_launch_profile_picks_configured_agent() {
        let config = SessionConfig::default();
        let profile = launch_profile(&config);
        assert!(config.user_agents.contains(&profile.user_agent));
        assert_eq!((profile.viewport_width, profile.viewport_height), (1920, 1080));
    }
}

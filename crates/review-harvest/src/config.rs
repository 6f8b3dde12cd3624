//! Run configuration.
//!
//! Defaults reproduce the pacing a human-looking browser session needs
//! against the review pages. Values are layered: built-in defaults, then an
//! optional TOML file, then `REVIEW_HARVEST_*` environment variables (nested
//! keys separated by `__`, e.g. `REVIEW_HARVEST_DISCLOSURE__FOLLOW_UP_ROUNDS`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment prefix for every override.
pub const ENV_PREFIX: &str = "REVIEW_HARVEST_";

/// A randomized wait between `min_ms` and `max_ms`, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jitter {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Jitter {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// No wait at all. Used by offline runs and tests.
    pub const ZERO: Jitter = Jitter::new(0, 0);

    pub fn sample(&self) -> Duration {
        let ms = if self.max_ms <= self.min_ms {
            self.min_ms
        } else {
            rand::thread_rng().gen_range(self.min_ms..=self.max_ms)
        };
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub session: SessionConfig,
    pub disclosure: DisclosureConfig,
    pub extraction: ExtractionConfig,
    pub run: RunConfig,
}

/// Browser launch and arrival settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Explicit Chromium binary; discovered when unset.
    pub chromium_path: Option<PathBuf>,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// One is picked at random per session.
    pub user_agents: Vec<String>,
    pub navigation_timeout_ms: u64,
    /// Wait after navigation for client-side rendering to finish.
    pub settle: Jitter,
    /// How long to look for the consent prompt before assuming there is none.
    pub consent_timeout_ms: u64,
    pub consent_poll_ms: u64,
    /// Pause after a successful consent click.
    pub consent_pause_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chromium_path: None,
            headless: true,
            viewport_width: 1920,
            viewport_height: 1080,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.0.0".to_string(),
            ],
            navigation_timeout_ms: 30_000,
            settle: Jitter::new(4_000, 6_000),
            consent_timeout_ms: 10_000,
            consent_poll_ms: 250,
            consent_pause_ms: 1_000,
        }
    }
}

/// Pacing and bounds for the disclosure loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisclosureConfig {
    /// Scroll/paginate/expand rounds after the initial pass. The loop stops
    /// earlier once a round loads nothing new.
    pub follow_up_rounds: u32,
    /// Upper bound on a single round, on top of the run deadline.
    pub round_timeout_ms: u64,
    pub pagination_settle: Jitter,
    /// Pause between scrolling a control into view and clicking it.
    pub scroll_into_view_pause_ms: u64,
    pub section_gap: Jitter,
    /// Pause after a batch of section expansions.
    pub section_settle_ms: u64,
    /// Pause after scrolling to the end of the document.
    pub scroll_settle_ms: u64,
    /// Pause after the last disclosure step, before fragments are collected.
    pub final_settle_ms: u64,
}

impl Default for DisclosureConfig {
    fn default() -> Self {
        Self {
            follow_up_rounds: 3,
            round_timeout_ms: 60_000,
            pagination_settle: Jitter::new(3_000, 5_000),
            scroll_into_view_pause_ms: 500,
            section_gap: Jitter::new(300, 500),
            section_settle_ms: 1_000,
            scroll_settle_ms: 2_000,
            final_settle_ms: 2_000,
        }
    }
}

impl DisclosureConfig {
    /// Same structure, no waiting. For offline snapshots.
    pub fn immediate() -> Self {
        Self {
            pagination_settle: Jitter::ZERO,
            scroll_into_view_pause_ms: 0,
            section_gap: Jitter::ZERO,
            section_settle_ms: 0,
            scroll_settle_ms: 0,
            final_settle_ms: 0,
            ..Self::default()
        }
    }
}

/// Limits used by fragment keys, field rules and the batch summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Body characters folded into a content signature.
    pub signature_prefix_chars: usize,
    /// Leading body characters searched for the word "spoiler".
    pub spoiler_window_chars: usize,
    /// Bodies at or below this length do not count as "with body".
    pub min_body_chars: usize,
    /// Upper bound on reading one fragment's markup.
    pub fragment_timeout_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            signature_prefix_chars: 500,
            spoiler_window_chars: 200,
            min_body_chars: 10,
            fragment_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Whole-run budget in seconds. 0 disables the deadline.
    pub timeout_secs: u64,
    /// Replaces the embedded rule book.
    pub rules_path: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            rules_path: None,
        }
    }
}

impl HarvestConfig {
    /// Layer defaults, the optional TOML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(HarvestConfig::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::Invalid(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        let config: HarvestConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let jitters = [
            ("session.settle", self.session.settle),
            ("disclosure.pagination_settle", self.disclosure.pagination_settle),
            ("disclosure.section_gap", self.disclosure.section_gap),
        ];
        for (name, jitter) in jitters {
            if jitter.min_ms > jitter.max_ms {
                return Err(ConfigError::Invalid(format!(
                    "{name}: min_ms {} exceeds max_ms {}",
                    jitter.min_ms, jitter.max_ms
                )));
            }
        }
        if self.session.user_agents.is_empty() {
            return Err(ConfigError::Invalid(
                "session.user_agents must not be empty".to_string(),
            ));
        }
        if self.session.viewport_width == 0 || self.session.viewport_height == 0 {
            return Err(ConfigError::Invalid(
                "session viewport must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The run budget, `None` when disabled.
    pub fn run_budget(&self) -> Option<Duration> {
        (self.run.timeout_secs > 0).then(|| Duration::from_secs(self.run.timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_pacing() {
        let config = HarvestConfig::default();
        assert_eq!(config.session.settle, Jitter::new(4_000, 6_000));
        assert_eq!(config.session.consent_timeout_ms, 10_000);
        assert_eq!(config.disclosure.pagination_settle, Jitter::new(3_000, 5_000));
        assert_eq!(config.disclosure.section_gap, Jitter::new(300, 500));
        assert_eq!(config.extraction.spoiler_window_chars, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_jitter_sample_in_bounds() {
        let jitter = Jitter::new(300, 500);
        for _ in 0..100 {
            let d = jitter.sample();
            assert!(d >= Duration::from_millis(300) && d <= Duration::from_millis(500));
        }
        assert_eq!(Jitter::ZERO.sample(), Duration::ZERO);
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[disclosure]\nfollow_up_rounds = 1\n\n[run]\ntimeout_secs = 0\n"
        )
        .unwrap();

        let config = HarvestConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.disclosure.follow_up_rounds, 1);
        assert_eq!(config.run_budget(), None);
        // untouched sections keep their defaults
        assert_eq!(config.session.viewport_width, 1920);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let err = HarvestConfig::load(Some(Path::new("/nonexistent/harvest.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_inverted_jitter_rejected() {
        let mut config = HarvestConfig::default();
        config.disclosure.section_gap = Jitter::new(900, 100);
        assert!(config.validate().is_err());
    }
}

//! Error tiers for a harvest run.
//!
//! Only [`SessionError`] and [`Interrupted`] end a run. Field-level problems
//! are carried as [`ExtractError`] inside a `FieldResult::Failed` and never
//! propagate; disclosure problems are logged and swallowed at the call site.

use std::time::Duration;

/// The browser session could not be established or the target could not be
/// reached. Fatal: no partial batch is produced.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("invalid target locator {locator:?}: {source}")]
    InvalidTarget {
        locator: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("session is closed")]
    Closed,
}

/// The run's deadline elapsed or the operator cancelled it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Interrupted {
    #[error("deadline of {budget:?} exceeded during {stage}")]
    DeadlineExceeded { stage: &'static str, budget: Duration },

    #[error("run cancelled during {stage}")]
    Cancelled { stage: &'static str },
}

/// Why a single field on a single fragment could not be resolved.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("invalid selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },

    #[error("fragment markup unavailable: {0}")]
    MarkupUnavailable(String),

    #[error("{rule}: {reason}")]
    Rule { rule: String, reason: String },
}

/// Configuration could not be loaded.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("failed to read rule book {path}: {source}")]
    RulesIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid rule book: {0}")]
    RulesJson(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Figment(Box::new(e))
    }
}

/// Anything that aborts a run.
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl HarvestError {
    /// Whether the run ended because of the deadline or an operator cancel.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, HarvestError::Interrupted(_))
    }
}

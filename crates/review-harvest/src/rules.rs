//! Structural rules for the review listing markup.
//!
//! The listing has been redesigned several times and pages from different
//! revisions are live at once, so every concern carries an ordered list of
//! CSS selectors, most specific first. The defaults are embedded at compile
//! time from `rules.json`; an operator can point `run.rules_path` at a
//! replacement file with the same shape.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Raw JSON of the embedded rule book.
const RULES_JSON: &str = include_str!("rules.json");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleBook {
    /// The consent prompt's accept control.
    pub consent: String,
    pub pagination: PaginationRules,
    /// Collapsed ("spoiler") section toggles.
    pub sections: Vec<String>,
    /// Containers of a single review. Overlapping on purpose.
    pub fragments: Vec<String>,
    /// Attributes checked, in order, for a stable review identifier.
    pub native_id_attributes: Vec<String>,
    pub fields: FieldRules,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationRules {
    pub selectors: Vec<String>,
    /// Lower-case phrases; a control qualifies if its text contains one.
    pub keywords: Vec<String>,
    /// Elements considered by the free-text fallback scan.
    pub scan_targets: String,
}

/// Selector chains for each field, evaluated inside one fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRules {
    pub title: Vec<String>,
    pub body: Vec<String>,
    pub rating: Vec<String>,
    pub votes: Vec<String>,
    pub spoiler_toggle: Vec<String>,
}

impl RuleBook {
    /// The rule book compiled into the binary.
    pub fn embedded() -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(RULES_JSON)?)
    }

    /// Read a replacement rule book from disk.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::RulesIo {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// `path` when given, the embedded book otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::embedded(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_rules_parse() {
        let rules = RuleBook::embedded().unwrap();
        assert_eq!(rules.consent, r#"button[data-testid="accept-button"]"#);
        assert_eq!(rules.fragments.len(), 6);
        assert_eq!(rules.fragments[0], r#"[data-testid="review-card-parent"]"#);
        assert!(rules.pagination.keywords.contains(&"see all".to_string()));
        assert_eq!(rules.fields.title[0], ".ipc-title.ipc-title--title");
    }

    #[test]
    fn test_keywords_are_lower_case() {
        let rules = RuleBook::embedded().unwrap();
        for keyword in &rules.pagination.keywords {
            assert_eq!(keyword, &keyword.to_lowercase());
        }
    }

    #[test]
    fn test_missing_rules_file() {
        let err = RuleBook::load(Some(Path::new("/nonexistent/rules.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::RulesIo { .. }));
    }
}

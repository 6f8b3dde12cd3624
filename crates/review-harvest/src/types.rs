//! Core data types shared by every stage of a harvest run.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::SessionError;

/// The page to harvest and the caller's identifier for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub locator: Url,
    pub id: u64,
}

impl Target {
    /// Parse `locator` and pair it with `id`.
    pub fn new(locator: &str, id: u64) -> Result<Self, SessionError> {
        let locator = Url::parse(locator).map_err(|source| SessionError::InvalidTarget {
            locator: locator.to_string(),
            source,
        })?;
        Ok(Self { locator, id })
    }
}

/// Identity used to collapse duplicate fragments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FragmentKey {
    /// A stable identifier attribute carried by the element itself.
    Native(String),
    /// Hex digest of the fragment's title and leading body text.
    Signature(String),
    /// Position in the raw candidate list; never merges anything.
    Ordinal(usize),
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(id) => write!(f, "id:{id}"),
            Self::Signature(digest) => write!(f, "sig:{digest}"),
            Self::Ordinal(n) => write!(f, "ord:{n}"),
        }
    }
}

/// The semantic attributes resolved for every review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Title,
    Body,
    Rating,
    HelpfulCount,
    UnhelpfulCount,
    SpoilerFlag,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Title,
        Field::Body,
        Field::Rating,
        Field::HelpfulCount,
        Field::UnhelpfulCount,
        Field::SpoilerFlag,
    ];
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Title => write!(f, "title"),
            Self::Body => write!(f, "body"),
            Self::Rating => write!(f, "rating"),
            Self::HelpfulCount => write!(f, "helpful_count"),
            Self::UnhelpfulCount => write!(f, "unhelpful_count"),
            Self::SpoilerFlag => write!(f, "spoiler_flag"),
        }
    }
}

/// Resolution status of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Resolved,
    Absent,
    Failed,
}

/// Outcome of resolving one field on one fragment.
///
/// `Absent` means every rule ran cleanly and found nothing; `Failed` means at
/// least one rule errored and none produced a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum FieldResult<T> {
    Resolved(T),
    Absent,
    Failed(String),
}

impl<T> FieldResult<T> {
    pub fn status(&self) -> FieldStatus {
        match self {
            Self::Resolved(_) => FieldStatus::Resolved,
            Self::Absent => FieldStatus::Absent,
            Self::Failed(_) => FieldStatus::Failed,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Resolved(v) => Some(v),
            _ => None,
        }
    }

    /// The reason, when `Failed`.
    pub fn failure(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FieldResult<U> {
        match self {
            Self::Resolved(v) => FieldResult::Resolved(f(v)),
            Self::Absent => FieldResult::Absent,
            Self::Failed(reason) => FieldResult::Failed(reason),
        }
    }
}

/// The six field results extracted from one fragment, before the aggregator
/// gives them a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFields {
    pub title: FieldResult<String>,
    pub body: FieldResult<String>,
    pub rating: FieldResult<String>,
    pub helpful: FieldResult<u32>,
    pub unhelpful: FieldResult<u32>,
    pub spoiler: FieldResult<bool>,
}

impl ReviewFields {
    /// Every field marked `Failed` with the same reason.
    pub fn all_failed(reason: &str) -> Self {
        Self {
            title: FieldResult::Failed(reason.to_string()),
            body: FieldResult::Failed(reason.to_string()),
            rating: FieldResult::Failed(reason.to_string()),
            helpful: FieldResult::Failed(reason.to_string()),
            unhelpful: FieldResult::Failed(reason.to_string()),
            spoiler: FieldResult::Failed(reason.to_string()),
        }
    }

    pub fn status(&self, field: Field) -> FieldStatus {
        match field {
            Field::Title => self.title.status(),
            Field::Body => self.body.status(),
            Field::Rating => self.rating.status(),
            Field::HelpfulCount => self.helpful.status(),
            Field::UnhelpfulCount => self.unhelpful.status(),
            Field::SpoilerFlag => self.spoiler.status(),
        }
    }

    pub fn failure(&self, field: Field) -> Option<&str> {
        match field {
            Field::Title => self.title.failure(),
            Field::Body => self.body.failure(),
            Field::Rating => self.rating.failure(),
            Field::HelpfulCount => self.helpful.failure(),
            Field::UnhelpfulCount => self.unhelpful.failure(),
            Field::SpoilerFlag => self.spoiler.failure(),
        }
    }

    /// Fields that ended in `Failed`, in declaration order.
    pub fn failed_fields(&self) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|f| self.status(*f) == FieldStatus::Failed)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_rejects_garbage_locator() {
        let err = Target::new("not a url", 1).unwrap_err();
        assert!(matches!(err, SessionError::InvalidTarget { .. }));
        let ok = Target::new("https://www.imdb.com/title/tt2948356/reviews/", 7).unwrap();
        assert_eq!(ok.id, 7);
    }

    #[test]
    fn test_field_result_serializes_status_tag() {
        let json = serde_json::to_string(&FieldResult::Resolved("8/10".to_string())).unwrap();
        assert_eq!(json, r#"{"status":"resolved","value":"8/10"}"#);
        let json = serde_json::to_string(&FieldResult::<String>::Absent).unwrap();
        assert_eq!(json, r#"{"status":"absent"}"#);
    }

    #[test]
    fn test_all_failed_marks_every_field() {
        let fields = ReviewFields::all_failed("boom");
        assert_eq!(fields.failed_fields(), Field::ALL.to_vec());
    }

    #[test]
    fn test_fragment_key_display() {
        assert_eq!(FragmentKey::Native("rw1".into()).to_string(), "id:rw1");
        assert_eq!(FragmentKey::Ordinal(3).to_string(), "ord:3");
    }
}

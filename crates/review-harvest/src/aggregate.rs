//! Batch assembly: ordered records, batch metadata, and on-demand summaries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{FieldResult, FragmentKey, ReviewFields, Target};

/// One review, positioned within its batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// 1-based, in first-seen fragment order.
    pub position: usize,
    pub target_id: u64,
    pub key: FragmentKey,
    pub fields: ReviewFields,
}

/// Flat rendering of a record for delimited output.
///
/// Missing text is empty, a missing rating is `"No rating"`, missing vote
/// counts are 0. Failed fields are left empty (`None` for counts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRow {
    pub review_index: usize,
    pub review_title: String,
    pub review_content: String,
    pub has_spoiler: String,
    pub rating: String,
    pub helpful_votes: Option<u32>,
    pub unhelpful_votes: Option<u32>,
    pub movie_id: u64,
}

fn text_cell(field: &FieldResult<String>) -> String {
    match field {
        FieldResult::Resolved(text) => text.clone(),
        FieldResult::Absent | FieldResult::Failed(_) => String::new(),
    }
}

fn count_cell(field: &FieldResult<u32>) -> Option<u32> {
    match field {
        FieldResult::Resolved(n) => Some(*n),
        FieldResult::Absent => Some(0),
        FieldResult::Failed(_) => None,
    }
}

impl Record {
    pub fn row(&self) -> ReviewRow {
        let fields = &self.fields;
        ReviewRow {
            review_index: self.position,
            review_title: text_cell(&fields.title),
            review_content: text_cell(&fields.body),
            has_spoiler: match fields.spoiler {
                FieldResult::Resolved(true) => "Yes".to_string(),
                FieldResult::Resolved(false) | FieldResult::Absent => "No".to_string(),
                FieldResult::Failed(_) => String::new(),
            },
            rating: match &fields.rating {
                FieldResult::Resolved(rating) => rating.clone(),
                FieldResult::Absent => "No rating".to_string(),
                FieldResult::Failed(_) => String::new(),
            },
            helpful_votes: count_cell(&fields.helpful),
            unhelpful_votes: count_cell(&fields.unhelpful),
            movie_id: self.target_id,
        }
    }
}

/// The terminal artifact of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub run_id: String,
    pub target: Target,
    pub document_title: String,
    pub collected_at: DateTime<Utc>,
    pub records: Vec<Record>,
}

/// Counters over a batch. Always derived from the records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub with_title: usize,
    /// Bodies longer than the configured minimum.
    pub with_body: usize,
    pub with_spoiler: usize,
    pub helpful_total: u64,
    pub unhelpful_total: u64,
    pub target_id: u64,
    pub locator: String,
    pub document_title: String,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn rows(&self) -> Vec<ReviewRow> {
        self.records.iter().map(Record::row).collect()
    }

    /// Computed on each call; `min_body_chars` is the length a body must
    /// exceed to count.
    pub fn summary(&self, min_body_chars: usize) -> BatchSummary {
        let mut summary = BatchSummary {
            total: self.records.len(),
            with_title: 0,
            with_body: 0,
            with_spoiler: 0,
            helpful_total: 0,
            unhelpful_total: 0,
            target_id: self.target.id,
            locator: self.target.locator.to_string(),
            document_title: self.document_title.clone(),
        };
        for record in &self.records {
            let fields = &record.fields;
            if fields.title.value().is_some_and(|t| !t.is_empty()) {
                summary.with_title += 1;
            }
            if fields
                .body
                .value()
                .is_some_and(|b| b.chars().count() > min_body_chars)
            {
                summary.with_body += 1;
            }
            if fields.spoiler.value() == Some(&true) {
                summary.with_spoiler += 1;
            }
            summary.helpful_total += u64::from(fields.helpful.value().copied().unwrap_or(0));
            summary.unhelpful_total += u64::from(fields.unhelpful.value().copied().unwrap_or(0));
        }
        summary
    }
}

/// Assign positions in first-seen order and attach batch metadata.
pub fn finalize(
    extracted: Vec<(FragmentKey, ReviewFields)>,
    target: &Target,
    document_title: &str,
    run_id: &str,
) -> BatchResult {
    let records = extracted
        .into_iter()
        .enumerate()
        .map(|(i, (key, fields))| Record {
            position: i + 1,
            target_id: target.id,
            key,
            fields,
        })
        .collect();
    BatchResult {
        run_id: run_id.to_string(),
        target: target.clone(),
        document_title: document_title.to_string(),
        collected_at: Utc::now(),
        records,
    }
}

/// Receives finished batches. Persistence lives outside the core.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn accept(&self, batch: &BatchResult) -> anyhow::Result<()>;
}

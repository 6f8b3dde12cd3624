//! JSON hand-off of finished batches.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use review_harvest::{BatchResult, BatchSink, BatchSummary, ReviewRow};

/// What the CLI writes: the summary row, the flat review rows, and the full
/// batch with per-field statuses.
#[derive(Serialize)]
struct HarvestOutput<'a> {
    summary: BatchSummary,
    rows: Vec<ReviewRow>,
    batch: &'a BatchResult,
}

/// Writes a batch as pretty JSON to a file, or to stdout.
pub struct JsonSink {
    path: Option<PathBuf>,
    min_body_chars: usize,
}

impl JsonSink {
    pub fn new(path: Option<PathBuf>, min_body_chars: usize) -> Self {
        Self {
            path,
            min_body_chars,
        }
    }
}

#[async_trait]
impl BatchSink for JsonSink {
    async fn accept(&self, batch: &BatchResult) -> Result<()> {
        let output = HarvestOutput {
            summary: batch.summary(self.min_body_chars),
            rows: batch.rows(),
            batch,
        };
        let json = serde_json::to_string_pretty(&output).context("failed to serialize batch")?;
        match &self.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                tokio::fs::write(path, json)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                tracing::info!(path = %path.display(), records = batch.len(), "batch written");
            }
            None => println!("{json}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_harvest::aggregate::finalize;
    use review_harvest::Target;

    #[tokio::test]
    async fn test_writes_file_with_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/batch.json");
        let target = Target::new("https://example.com/reviews", 5).unwrap();
        let batch = finalize(Vec::new(), &target, "Example", "run-x");

        JsonSink::new(Some(path.clone()), 10)
            .accept(&batch)
            .await
            .unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["summary"]["total"], 0);
        assert_eq!(written["summary"]["target_id"], 5);
        assert_eq!(written["batch"]["run_id"], "run-x");
    }
}

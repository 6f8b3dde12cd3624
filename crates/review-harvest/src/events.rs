// Copyright 2026 Review Harvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Harvest events and the broadcast channel that carries them.
//!
//! Each pipeline stage reports what it did through an [`EventSink`] in
//! addition to its `tracing` output. Subscribers (the CLI's `--events`
//! stream, tests) receive typed values instead of scraping log lines. When
//! nobody listens, events are dropped.

use serde::{Deserialize, Serialize};

use crate::types::{Field, FragmentKey};

/// A single event emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestEvent {
    /// The run this event belongs to.
    pub run_id: String,
    /// Monotonically increasing sequence number within the run.
    pub seq: u64,
    pub event: HarvestEventKind,
}

/// What happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HarvestEventKind {
    /// The target was reached and has settled.
    SessionOpened {
        locator: String,
        document_title: String,
        elapsed_ms: u64,
    },
    /// The consent prompt was clicked away (or was not there).
    ConsentHandled { dismissed: bool },
    /// One pagination attempt.
    PaginationAttempted {
        rule: String,
        matched: usize,
        triggered: bool,
        content_delta: i64,
    },
    /// One round of collapsed-section expansion.
    SectionsExpanded { candidates: usize, activated: usize },
    /// The document was scrolled to its end to trigger lazy loading.
    ScrolledToEnd,
    /// A disclosure step failed and was skipped.
    DisclosureSkipped { step: String, reason: String },
    /// Fragments were collected and deduplicated.
    FragmentsCollected { raw: usize, unique: usize },
    /// A field on one fragment could not be resolved.
    FieldFailed {
        key: FragmentKey,
        field: Field,
        reason: String,
    },
    /// The batch is ready for hand-off.
    BatchFinalized { records: usize, elapsed_ms: u64 },
    /// The browser session was released.
    SessionClosed,
}

/// Sender half. Backed by `tokio::sync::broadcast` so several listeners can
/// subscribe independently.
pub type EventSender = tokio::sync::broadcast::Sender<HarvestEvent>;

/// Receiver half.
pub type EventReceiver = tokio::sync::broadcast::Receiver<HarvestEvent>;

/// Create a new event channel with a bounded buffer.
///
/// 512 covers a full listing page: a handful of disclosure events plus at
/// most one `FieldFailed` per field per review.
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(512)
}

/// Per-run emitter handed to every stage.
#[derive(Debug)]
pub struct EventSink {
    sender: Option<EventSender>,
    run_id: String,
    seq: std::sync::atomic::AtomicU64,
}

impl EventSink {
    pub fn new(sender: Option<EventSender>, run_id: impl Into<String>) -> Self {
        Self {
            sender,
            run_id: run_id.into(),
            seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self::new(None, "")
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Emit an event, silently ignoring send errors (no receivers).
    pub fn emit(&self, event: HarvestEventKind) {
        if let Some(ref sender) = self.sender {
            let seq = self.seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
            let _ = sender.send(HarvestEvent {
                run_id: self.run_id.clone(),
                seq,
                event,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = HarvestEvent {
            run_id: "run-1".to_string(),
            seq: 3,
            event: HarvestEventKind::FragmentsCollected { raw: 12, unique: 10 },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("FragmentsCollected"));
        assert!(json.contains("\"unique\":10"));

        let parsed: HarvestEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.seq, 3);
    }

    #[test]
    fn test_sink_sequences_events() {
        let (tx, mut rx) = channel();
        let sink = EventSink::new(Some(tx), "run-2");
        sink.emit(HarvestEventKind::ScrolledToEnd);
        sink.emit(HarvestEventKind::SessionClosed);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!((first.seq, second.seq), (1, 2));
        assert_eq!(second.run_id, "run-2");
    }

    #[test]
    fn test_sink_without_receivers() {
        let (tx, rx) = channel();
        drop(rx);
        // Should not panic
        EventSink::new(Some(tx), "run-3").emit(HarvestEventKind::ScrolledToEnd);
        EventSink::disabled().emit(HarvestEventKind::ScrolledToEnd);
    }
}

// Copyright 2026 Review Harvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! One harvest run: open a session, disclose, collect, extract, aggregate.
//!
//! The session is closed on every path out of [`Harvester::run`], including
//! disclosure or extraction being interrupted by the deadline.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::Instrument;

use crate::aggregate::{finalize, BatchResult, BatchSink};
use crate::config::HarvestConfig;
use crate::deadline::Deadline;
use crate::disclosure::DisclosureEngine;
use crate::error::HarvestError;
use crate::events::{EventSender, EventSink, HarvestEventKind};
use crate::extraction::FieldExtractor;
use crate::fragments::Deduplicator;
use crate::renderer::Renderer;
use crate::rules::RuleBook;
use crate::session::Session;
use crate::types::{FragmentKey, ReviewFields, Target};

/// Runs the harvest pipeline against one renderer.
pub struct Harvester {
    renderer: Arc<dyn Renderer>,
    config: HarvestConfig,
    rules: RuleBook,
    extractor: FieldExtractor,
    events: Option<EventSender>,
}

impl Harvester {
    pub fn new(renderer: Arc<dyn Renderer>, config: HarvestConfig, rules: RuleBook) -> Self {
        let extractor = FieldExtractor::from_rules(&rules.fields, &config.extraction);
        Self {
            renderer,
            config,
            rules,
            extractor,
            events: None,
        }
    }

    /// Publish progress on `sender`.
    pub fn with_events(mut self, sender: EventSender) -> Self {
        self.events = Some(sender);
        self
    }

    /// Replace the field extractor built from the rule book.
    pub fn with_extractor(mut self, extractor: FieldExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleBook {
        &self.rules
    }

    /// Harvest every review on `target`.
    ///
    /// Zero fragments is an empty batch, not an error. Only session failures
    /// and interruption abort the run.
    pub async fn run(&self, target: &Target, deadline: &Deadline) -> Result<BatchResult, HarvestError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("harvest", run_id = %run_id, target_id = target.id);
        self.run_inner(target, deadline, run_id).instrument(span).await
    }

    /// [`run`](Self::run), then hand the batch to `sink`.
    pub async fn run_into(
        &self,
        target: &Target,
        deadline: &Deadline,
        sink: &dyn BatchSink,
    ) -> anyhow::Result<BatchResult> {
        let batch = self.run(target, deadline).await?;
        sink.accept(&batch).await?;
        Ok(batch)
    }

    async fn run_inner(
        &self,
        target: &Target,
        deadline: &Deadline,
        run_id: String,
    ) -> Result<BatchResult, HarvestError> {
        let started = Instant::now();
        let events = EventSink::new(self.events.clone(), run_id.clone());

        let mut session = Session::open(
            self.renderer.as_ref(),
            target,
            &self.config.session,
            &self.rules.consent,
            deadline,
            &events,
        )
        .await?;

        let outcome = self.harvest(&session, deadline, &events).await;
        session.close().await;
        events.emit(HarvestEventKind::SessionClosed);

        let extracted = match outcome {
            Ok(extracted) => extracted,
            Err(e) => {
                tracing::warn!(error = %e, "run aborted");
                return Err(e);
            }
        };

        let batch = finalize(extracted, target, session.document_title(), &run_id);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(records = batch.len(), elapsed_ms, "batch finalized");
        events.emit(HarvestEventKind::BatchFinalized {
            records: batch.len(),
            elapsed_ms,
        });
        Ok(batch)
    }

    async fn harvest(
        &self,
        session: &Session,
        deadline: &Deadline,
        events: &EventSink,
    ) -> Result<Vec<(FragmentKey, ReviewFields)>, HarvestError> {
        let doc = session.document()?;

        let report = DisclosureEngine::new(&self.rules, &self.config.disclosure)
            .expand_all(doc, deadline, events)
            .await?;
        tracing::debug!(actions = report.actions.len(), rounds = report.rounds, "disclosure report");

        let fragments = Deduplicator::new(&self.rules, &self.config.extraction)
            .collect_unique(doc, deadline, events)
            .await?;

        let mut extracted = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            deadline.check("extraction")?;
            let fields = self.extractor.extract(&fragment);
            self.report_failures(&fragment.key, &fields, events);
            extracted.push((fragment.key, fields));
        }
        Ok(extracted)
    }

    fn report_failures(&self, key: &FragmentKey, fields: &ReviewFields, events: &EventSink) {
        for field in fields.failed_fields() {
            let reason = fields.failure(field).unwrap_or_default().to_string();
            tracing::warn!(key = %key, field = %field, reason = %reason, "field failed");
            events.emit(HarvestEventKind::FieldFailed {
                key: key.clone(),
                field,
                reason,
            });
        }
    }
}

//! `review-harvest harvest <url> --id N`: run the pipeline once.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use review_harvest::config::{DisclosureConfig, Jitter};
use review_harvest::events::{self, EventReceiver};
use review_harvest::renderer::chromium::ChromiumRenderer;
use review_harvest::renderer::snapshot::SnapshotRenderer;
use review_harvest::renderer::Renderer;
use review_harvest::{Deadline, HarvestConfig, Harvester, RuleBook, Target};

use super::output::JsonSink;

pub struct HarvestArgs {
    pub url: String,
    pub id: u64,
    pub output: Option<PathBuf>,
    pub snapshot: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub rules: Option<PathBuf>,
    pub timeout: Option<u64>,
    pub events: bool,
    pub headed: bool,
}

/// Run the harvest command.
pub async fn run(args: HarvestArgs) -> Result<()> {
    let mut config = HarvestConfig::load(args.config.as_deref())?;
    if let Some(timeout) = args.timeout {
        config.run.timeout_secs = timeout;
    }
    if args.headed {
        config.session.headless = false;
    }

    let rules_path = args.rules.clone().or_else(|| config.run.rules_path.clone());
    let rules = RuleBook::load(rules_path.as_deref())?;
    let target = Target::new(&args.url, args.id)?;

    let renderer: Arc<dyn Renderer> = match &args.snapshot {
        Some(path) => {
            // A saved page has nothing to wait for.
            config.session.settle = Jitter::ZERO;
            config.session.consent_timeout_ms = 0;
            config.session.consent_pause_ms = 0;
            config.disclosure = DisclosureConfig::immediate();
            Arc::new(SnapshotRenderer::from_file(path)?)
        }
        None => Arc::new(ChromiumRenderer::new()),
    };

    let token = CancellationToken::new();
    let deadline = match config.run_budget() {
        Some(budget) => Deadline::after(budget),
        None => Deadline::unbounded(),
    }
    .with_token(token.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            token.cancel();
        }
    });

    let min_body_chars = config.extraction.min_body_chars;
    let sink = JsonSink::new(args.output.clone(), min_body_chars);
    let mut harvester = Harvester::new(renderer, config, rules);
    let event_stream = if args.events {
        let (tx, rx) = events::channel();
        harvester = harvester.with_events(tx);
        Some(tokio::spawn(stream_events(rx)))
    } else {
        None
    };

    tracing::info!(url = %target.locator, id = target.id, "starting harvest");
    let result = harvester.run_into(&target, &deadline, &sink).await;

    // Dropping the harvester closes the event channel.
    drop(harvester);
    if let Some(stream) = event_stream {
        stream.await.context("event stream task failed")?;
    }

    let batch = result?;
    let summary = batch.summary(min_body_chars);
    eprintln!(
        "Harvested {} reviews ({} with title, {} with body, {} spoilers) from {}",
        summary.total, summary.with_title, summary.with_body, summary.with_spoiler, summary.locator
    );
    Ok(())
}

/// Print every event as one JSON line on stderr until the channel closes.
async fn stream_events(mut rx: EventReceiver) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => eprintln!("{line}"),
                Err(e) => tracing::debug!(error = %e, "event not serializable"),
            },
            Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "event stream lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

//! End-to-end runs against saved review pages.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use review_harvest::config::{DisclosureConfig, Jitter};
use review_harvest::error::Interrupted;
use review_harvest::events::{self, HarvestEventKind};
use review_harvest::extraction::{Chain, FieldExtractor, Strategy};
use review_harvest::renderer::snapshot::SnapshotRenderer;
use review_harvest::renderer::Renderer;
use review_harvest::{
    BatchResult, BatchSink, Deadline, Field, FieldResult, FragmentKey, HarvestConfig, HarvestError,
    Harvester, RuleBook, SessionError, Target,
};

fn offline_config() -> HarvestConfig {
    let mut config = HarvestConfig::default();
    config.session.settle = Jitter::ZERO;
    config.session.consent_timeout_ms = 0;
    config.session.consent_pause_ms = 0;
    config.disclosure = DisclosureConfig::immediate();
    config
}

fn target() -> Target {
    Target::new("https://www.imdb.com/title/tt2948356/reviews/", 2948356).unwrap()
}

fn card(id: Option<&str>, title: &str, body: &str, rating: &str) -> String {
    let id_attr = id
        .map(|id| format!(r#" data-review-id="{id}""#))
        .unwrap_or_default();
    format!(
        r#"<article class="user-review-item" data-testid="review-card-parent"{id_attr}>
             <span class="ipc-rating-star">{rating}</span>
             <h3 class="ipc-title ipc-title--title">{title}</h3>
             <div class="ipc-html-content-inner-div">{body}</div>
             <div class="ipc-voting">
               <button aria-label="Helpful"><span class="count--up">4</span></button>
               <button aria-label="Not helpful"><span class="count--down">1</span></button>
             </div>
           </article>"#
    )
}

fn page(cards: &[String], extra: &str) -> String {
    format!(
        r#"<html><head><title>Zootopia (2016) - User reviews - IMDb</title></head>
           <body>
             <button data-testid="accept-button">Accept</button>
             {}
             {extra}
           </body></html>"#,
        cards.join("\n")
    )
}

fn harvester(renderer: Arc<SnapshotRenderer>) -> Harvester {
    Harvester::new(renderer, offline_config(), RuleBook::embedded().unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_native_ids_collapse() {
    let html = page(
        &[
            card(Some("rw1"), "Great", "Loved it from start to end", "9"),
            card(Some("rw1"), "Great", "Loved it from start to end", "9"),
            card(None, "Meh", "Not for me at all, sorry", "4"),
        ],
        "",
    );
    let renderer = Arc::new(SnapshotRenderer::new(html));
    let batch = harvester(renderer.clone())
        .run(&target(), &Deadline::unbounded())
        .await
        .unwrap();

    assert_eq!(batch.records.len(), 2);
    assert_eq!(batch.records[0].key, FragmentKey::Native("rw1".to_string()));
    assert!(matches!(batch.records[1].key, FragmentKey::Signature(_)));
    assert_eq!(
        batch.records.iter().map(|r| r.position).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert!(batch.records.iter().all(|r| r.target_id == 2948356));
    assert_eq!(batch.document_title, "Zootopia (2016) - User reviews - IMDb");
    assert_eq!(renderer.active_documents(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shared_id_pair_and_bare_card_give_two_records() {
    let titled = r#"<div data-testid="review-card-parent" data-review-id="rw1">
                      <h3 class="ipc-title ipc-title--title">Great</h3></div>"#;
    let bare = r#"<div data-testid="review-card-parent"><span class="ipc-rating-star">4</span></div>"#;
    let html = page(&[titled.to_string(), titled.to_string(), bare.to_string()], "");
    let renderer = Arc::new(SnapshotRenderer::new(html));
    let (tx, mut rx) = events::channel();
    let batch = harvester(renderer)
        .with_events(tx)
        .run(&target(), &Deadline::unbounded())
        .await
        .unwrap();

    let keys: Vec<_> = batch.records.iter().map(|r| r.key.clone()).collect();
    assert_eq!(
        keys,
        vec![FragmentKey::Native("rw1".to_string()), FragmentKey::Ordinal(2)]
    );
    let bare_row = batch.records[1].row();
    assert_eq!(bare_row.review_index, 2);
    assert_eq!(bare_row.review_title, "");
    assert_eq!(bare_row.rating, "4/10");

    let mut collected = None;
    while let Ok(event) = rx.try_recv() {
        if let HarvestEventKind::FragmentsCollected { raw, unique } = event.event {
            collected = Some((raw, unique));
        }
    }
    assert_eq!(collected, Some((3, 2)));
}

#[tokio::test(start_paused = true)]
async fn test_fields_resolved_end_to_end() {
    let html = page(
        &[card(
            Some("rw7"),
            "Amazing Movie",
            "7/10 Amazing Movie Amazing Movie was great",
            "Rated 8",
        )],
        "",
    );
    let renderer = Arc::new(SnapshotRenderer::new(html));
    let batch = harvester(renderer)
        .run(&target(), &Deadline::unbounded())
        .await
        .unwrap();

    let fields = &batch.records[0].fields;
    assert_eq!(fields.title, FieldResult::Resolved("Amazing Movie".to_string()));
    assert_eq!(fields.body, FieldResult::Resolved("was great".to_string()));
    assert_eq!(fields.rating, FieldResult::Resolved("8/10".to_string()));
    assert_eq!(fields.helpful, FieldResult::Resolved(4));
    assert_eq!(fields.unhelpful, FieldResult::Resolved(1));
    assert_eq!(fields.spoiler, FieldResult::Resolved(false));

    let summary = batch.summary(10);
    assert_eq!(summary.total, 1);
    assert_eq!(summary.with_body, 0);
    assert_eq!(summary.helpful_total, 4);
}

#[tokio::test(start_paused = true)]
async fn test_no_fragments_is_empty_batch() {
    let renderer = Arc::new(SnapshotRenderer::new(page(&[], "<p>No reviews yet</p>")));
    let batch = harvester(renderer.clone())
        .run(&target(), &Deadline::unbounded())
        .await
        .unwrap();
    assert!(batch.is_empty());
    assert_eq!(batch.summary(10).total, 0);
    assert_eq!(renderer.log().closed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_see_all_reveals_more_reviews() {
    let first = vec![card(Some("rw1"), "One", "First body text", "7")];
    let all = vec![
        card(Some("rw1"), "One", "First body text", "7"),
        card(Some("rw2"), "Two", "Second body text", "6"),
        card(Some("rw3"), "Three", "Third body text", "5"),
    ];
    let stage_0 = page(
        &first,
        r#"<button class="ipc-see-more__button" data-reveals="1">See all</button>"#,
    );
    let stage_1 = page(&all, "");
    let renderer = Arc::new(SnapshotRenderer::with_stages(vec![stage_0, stage_1]));
    let batch = harvester(renderer.clone())
        .run(&target(), &Deadline::unbounded())
        .await
        .unwrap();

    assert_eq!(batch.records.len(), 3);
    let keys: Vec<_> = batch.records.iter().map(|r| r.key.to_string()).collect();
    assert_eq!(keys, vec!["id:rw1", "id:rw2", "id:rw3"]);
    // consent click plus one pagination click
    assert_eq!(renderer.log().activations.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failing_rating_rule_spares_other_fields() {
    let html = page(
        &[
            card(Some("rw1"), "One", "A body long enough", "7"),
            card(Some("rw2"), "Two", "Another long body", "8"),
        ],
        "",
    );
    let renderer = Arc::new(SnapshotRenderer::new(html));
    let rules = RuleBook::embedded().unwrap();
    let config = offline_config();
    let extractor = FieldExtractor::from_rules(&rules.fields, &config.extraction).map_rating(|_| {
        Chain::new().push(Strategy::new("exploding rating", |_| {
            Err(review_harvest::error::ExtractError::Rule {
                rule: "exploding rating".to_string(),
                reason: "layout changed".to_string(),
            })
        }))
    });
    let (tx, mut rx) = events::channel();
    let harvester = Harvester::new(renderer, config, rules)
        .with_extractor(extractor)
        .with_events(tx);

    let batch = harvester.run(&target(), &Deadline::unbounded()).await.unwrap();
    assert_eq!(batch.records.len(), 2);
    for record in &batch.records {
        assert_eq!(record.fields.failed_fields(), vec![Field::Rating]);
        assert!(record.fields.title.is_resolved());
        assert!(record.fields.body.is_resolved());
        assert_eq!(record.row().rating, "");
    }

    let mut failures = 0;
    let mut closed = false;
    while let Ok(event) = rx.try_recv() {
        match event.event {
            HarvestEventKind::FieldFailed { field, .. } => {
                assert_eq!(field, Field::Rating);
                failures += 1;
            }
            HarvestEventKind::SessionClosed => closed = true,
            _ => {}
        }
    }
    assert_eq!(failures, 2);
    assert!(closed);
}

#[tokio::test(start_paused = true)]
async fn test_repeat_runs_yield_same_keys() {
    let html = page(
        &[
            card(None, "Alpha", "Body alpha here", "1"),
            card(None, "Beta", "Body beta here", "2"),
        ],
        "",
    );
    let renderer = Arc::new(SnapshotRenderer::new(html));
    let h = harvester(renderer);
    let first = h.run(&target(), &Deadline::unbounded()).await.unwrap();
    let second = h.run(&target(), &Deadline::unbounded()).await.unwrap();
    let keys = |b: &BatchResult| b.records.iter().map(|r| r.key.clone()).collect::<Vec<_>>();
    assert_eq!(keys(&first), keys(&second));
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_target_is_session_error() {
    let renderer = Arc::new(SnapshotRenderer::new("<html></html>").failing_navigation());
    let err = harvester(renderer.clone())
        .run(&target(), &Deadline::unbounded())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HarvestError::Session(SessionError::Navigation { .. })
    ));
    assert_eq!(renderer.active_documents(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_during_disclosure_still_closes_session() {
    let renderer = Arc::new(SnapshotRenderer::new(page(
        &[card(Some("rw1"), "One", "Body", "7")],
        "",
    )));
    let mut config = offline_config();
    config.disclosure.final_settle_ms = 60_000;
    let harvester = Harvester::new(renderer.clone(), config, RuleBook::embedded().unwrap());

    let err = harvester
        .run(&target(), &Deadline::after(std::time::Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HarvestError::Interrupted(Interrupted::DeadlineExceeded { .. })
    ));
    assert_eq!(renderer.active_documents(), 0);
    assert_eq!(renderer.log().closed, 1);
}

#[derive(Default)]
struct CollectingSink {
    batches: Mutex<Vec<usize>>,
}

#[async_trait]
impl BatchSink for CollectingSink {
    async fn accept(&self, batch: &BatchResult) -> anyhow::Result<()> {
        self.batches.lock().unwrap().push(batch.len());
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_run_into_hands_batch_to_sink() {
    let renderer = Arc::new(SnapshotRenderer::new(page(
        &[card(Some("rw1"), "One", "Body", "7")],
        "",
    )));
    let sink = CollectingSink::default();
    harvester(renderer)
        .run_into(&target(), &Deadline::unbounded(), &sink)
        .await
        .unwrap();
    assert_eq!(*sink.batches.lock().unwrap(), vec![1]);
}

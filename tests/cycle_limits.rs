// tests/cycle_limits.rs
//! Resource-model behavior: fetch timeouts, bounded parallelism, and
//! cancellation before dispatch.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use noticewatch::classify::Taxonomy;
use noticewatch::config::{CategoryEntry, UnmatchedPolicy};
use noticewatch::cycle::{run_cycle, CycleContext, PreparedSource};
use noticewatch::dedup::NoopSeenStore;
use noticewatch::notify::Dispatcher;
use noticewatch::record::{RawItem, Record};
use noticewatch::sources::SourceAdapter;

struct SlowAdapter {
    id: String,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_seen: Arc<AtomicUsize>,
}

#[async_trait]
impl SourceAdapter for SlowAdapter {
    async fn fetch(&self) -> Result<Vec<RawItem>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![RawItem {
            title: Some(format!("Tax notice from {}", self.id)),
            url: Some(format!("https://{}.test/notice", self.id)),
            ..Default::default()
        }])
    }

    fn parse(&self, raw: RawItem) -> Result<Record> {
        let title = raw.title.unwrap_or_default();
        if title.trim().is_empty() {
            bail!("item without title");
        }
        Ok(Record::new(
            title,
            raw.url.unwrap_or_default(),
            String::new(),
            self.id.clone(),
        ))
    }

    fn source_id(&self) -> &str {
        &self.id
    }
}

#[derive(Default)]
struct CountingDispatcher {
    delivered: Mutex<Vec<String>>,
}

#[async_trait]
impl Dispatcher for CountingDispatcher {
    async fn deliver(&self, record: &Record) -> Result<()> {
        self.delivered.lock().unwrap().push(record.title.clone());
        Ok(())
    }
}

fn taxonomy() -> Arc<Taxonomy> {
    let entries = vec![CategoryEntry {
        id: "finance".into(),
        keywords: vec!["tax".into()],
        threshold: Some(0.25),
        priority: 1,
    }];
    Arc::new(Taxonomy::compile(&entries, 0.25).unwrap())
}

fn slow_source(
    id: &str,
    delay: Duration,
    fetch_timeout: Duration,
    in_flight: Arc<AtomicUsize>,
    max_seen: Arc<AtomicUsize>,
) -> PreparedSource {
    PreparedSource {
        adapter: Arc::new(SlowAdapter {
            id: id.to_string(),
            delay,
            in_flight,
            max_seen,
        }),
        fetch_timeout,
        confidence_override: None,
    }
}

#[tokio::test]
async fn fetch_timeout_counts_as_source_failure() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let dispatcher = Arc::new(CountingDispatcher::default());

    let summary = run_cycle(&CycleContext {
        sources: vec![
            slow_source(
                "stuck",
                Duration::from_secs(60),
                Duration::from_millis(50),
                in_flight.clone(),
                max_seen.clone(),
            ),
            slow_source(
                "quick",
                Duration::from_millis(1),
                Duration::from_secs(5),
                in_flight.clone(),
                max_seen.clone(),
            ),
        ],
        taxonomy: taxonomy(),
        store: Arc::new(NoopSeenStore),
        dispatcher: dispatcher.clone(),
        unmatched_policy: UnmatchedPolicy::Drop,
        max_in_flight: 2,
        dry_run: false,
        cancel: Arc::new(AtomicBool::new(false)),
    })
    .await;

    assert_eq!(summary.sources_failed, 1);
    let stuck = &summary.sources[0];
    assert!(stuck.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(summary.sources[1].delivered, 1);
}

#[tokio::test]
async fn fetches_never_exceed_max_in_flight() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let sources: Vec<PreparedSource> = (0..6)
        .map(|i| {
            slow_source(
                &format!("src-{i}"),
                Duration::from_millis(30),
                Duration::from_secs(5),
                in_flight.clone(),
                max_seen.clone(),
            )
        })
        .collect();

    let summary = run_cycle(&CycleContext {
        sources,
        taxonomy: taxonomy(),
        store: Arc::new(NoopSeenStore),
        dispatcher: Arc::new(CountingDispatcher::default()),
        unmatched_policy: UnmatchedPolicy::Drop,
        max_in_flight: 2,
        dry_run: false,
        cancel: Arc::new(AtomicBool::new(false)),
    })
    .await;

    assert_eq!(summary.sources.len(), 6);
    assert_eq!(summary.sources_failed, 0);
    assert!(
        max_seen.load(Ordering::SeqCst) <= 2,
        "observed {} concurrent fetches",
        max_seen.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn cancellation_stops_before_dispatch() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let dispatcher = Arc::new(CountingDispatcher::default());

    // flag already set: items are fetched and classified but never dispatched
    let summary = run_cycle(&CycleContext {
        sources: vec![slow_source(
            "src",
            Duration::from_millis(1),
            Duration::from_secs(5),
            in_flight,
            max_seen,
        )],
        taxonomy: taxonomy(),
        store: Arc::new(NoopSeenStore),
        dispatcher: dispatcher.clone(),
        unmatched_policy: UnmatchedPolicy::Drop,
        max_in_flight: 1,
        dry_run: false,
        cancel: Arc::new(AtomicBool::new(true)),
    })
    .await;

    assert!(summary.cancelled);
    assert_eq!(summary.delivered_total(), 0);
    assert!(dispatcher.delivered.lock().unwrap().is_empty());
}

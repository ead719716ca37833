// src/cycle.rs
//! One bounded pipeline cycle across all enabled sources: fetch -> parse ->
//! classify -> dedup -> dispatch -> commit. Sources are isolated from each
//! other; the summary is the cycle's only output.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::classify::Taxonomy;
use crate::config::{AppConfig, UnmatchedPolicy};
use crate::dedup::{SeenEntry, SeenStore};
use crate::notify::Dispatcher;
use crate::sources::{self, SourceAdapter};

/// One-time metrics registration (so series show up once a recorder is
/// installed by the embedding process).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("cycle_fetched_total", "Raw items fetched from sources.");
        describe_counter!("cycle_parsed_total", "Items parsed into records.");
        describe_counter!(
            "cycle_duplicates_total",
            "Records skipped as already delivered."
        );
        describe_counter!("cycle_delivered_total", "Records delivered and committed.");
        describe_counter!("cycle_source_errors_total", "Sources that failed a cycle.");
        describe_gauge!("cycle_last_run_ts", "Unix ts when a cycle last finished.");
    });
}

/// A source ready to run: adapter plus its resolved per-source knobs.
#[derive(Clone)]
pub struct PreparedSource {
    pub adapter: Arc<dyn SourceAdapter>,
    pub fetch_timeout: Duration,
    pub confidence_override: Option<f32>,
}

/// Build adapters for every enabled source entry. Fails on the first
/// misconfigured entry, before anything is fetched.
pub fn prepare_sources(cfg: &AppConfig) -> Result<Vec<PreparedSource>> {
    cfg.enabled_sources()
        .map(|entry| {
            let adapter = sources::build_adapter(entry, &cfg.pipeline)?;
            Ok(PreparedSource {
                adapter: Arc::from(adapter),
                fetch_timeout: Duration::from_secs(entry.fetch_timeout_secs(&cfg.pipeline)),
                confidence_override: entry.confidence_threshold,
            })
        })
        .collect()
}

pub struct CycleContext {
    pub sources: Vec<PreparedSource>,
    pub taxonomy: Arc<Taxonomy>,
    pub store: Arc<dyn SeenStore>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub unmatched_policy: UnmatchedPolicy,
    pub max_in_flight: usize,
    /// Full pipeline, but `deliver()` and `record()` are suppressed and the
    /// summary carries what would have gone out.
    pub dry_run: bool,
    /// Checked before each dispatch; a started dispatch/commit unit always
    /// completes.
    pub cancel: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source_id: String,
    pub fetched: usize,
    pub parsed: usize,
    pub classified: usize,
    pub unmatched: usize,
    pub duplicates: usize,
    pub delivered: usize,
    pub failed_items: usize,
    /// Set when the source as a whole failed (transport error, timeout).
    pub error: Option<String>,
}

impl SourceReport {
    fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            fetched: 0,
            parsed: 0,
            classified: 0,
            unmatched: 0,
            duplicates: 0,
            delivered: 0,
            failed_items: 0,
            error: None,
        }
    }
}

/// What a dry run would have sent.
#[derive(Debug, Clone, Serialize)]
pub struct PendingDelivery {
    pub source_id: String,
    pub fingerprint: String,
    pub title: String,
    pub category: Option<String>,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct CycleSummary {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub dry_run: bool,
    pub cancelled: bool,
    pub sources: Vec<SourceReport>,
    /// Degraded-vs-quiet must stay distinguishable: this is the count of
    /// sources that errored, independent of how many records matched.
    pub sources_failed: usize,
    pub would_deliver: Vec<PendingDelivery>,
}

impl CycleSummary {
    pub fn delivered_total(&self) -> usize {
        self.sources.iter().map(|s| s.delivered).sum()
    }
}

struct SourceOutcome {
    report: SourceReport,
    would_deliver: Vec<PendingDelivery>,
    cancelled: bool,
}

/// Run one cycle. Per-source failures land in the summary, never abort the
/// cycle; the store must already be open (fail-closed happens at startup).
pub async fn run_cycle(ctx: &CycleContext) -> CycleSummary {
    ensure_metrics_described();
    let started_at = Utc::now();
    let t0 = std::time::Instant::now();

    let semaphore = Arc::new(Semaphore::new(ctx.max_in_flight.max(1)));
    // Fingerprints claimed this cycle, so two sources emitting the same item
    // cannot both dispatch between `has` and `record`.
    let claimed: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

    let source_ids: Vec<String> = ctx
        .sources
        .iter()
        .map(|s| s.adapter.source_id().to_string())
        .collect();

    let mut join = JoinSet::new();
    for (idx, src) in ctx.sources.iter().enumerate() {
        let src = src.clone();
        let semaphore = semaphore.clone();
        let taxonomy = ctx.taxonomy.clone();
        let store = ctx.store.clone();
        let dispatcher = ctx.dispatcher.clone();
        let claimed = claimed.clone();
        let cancel = ctx.cancel.clone();
        let unmatched_policy = ctx.unmatched_policy;
        let dry_run = ctx.dry_run;
        join.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let outcome = run_source(
                src,
                taxonomy,
                store,
                dispatcher,
                claimed,
                unmatched_policy,
                dry_run,
                cancel,
            )
            .await;
            (idx, outcome)
        });
    }

    let mut slots: Vec<Option<SourceOutcome>> = source_ids.iter().map(|_| None).collect();
    while let Some(res) = join.join_next().await {
        match res {
            Ok((idx, outcome)) => slots[idx] = Some(outcome),
            Err(e) => tracing::error!(error = ?e, "source task aborted"),
        }
    }

    let mut sources_out = Vec::with_capacity(slots.len());
    let mut would_deliver = Vec::new();
    let mut cancelled = false;
    for (idx, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(outcome) => {
                cancelled |= outcome.cancelled;
                would_deliver.extend(outcome.would_deliver);
                sources_out.push(outcome.report);
            }
            None => {
                let mut report = SourceReport::new(&source_ids[idx]);
                report.error = Some("source task aborted".to_string());
                sources_out.push(report);
            }
        }
    }

    let sources_failed = sources_out.iter().filter(|s| s.error.is_some()).count();
    for s in &sources_out {
        counter!("cycle_fetched_total").increment(s.fetched as u64);
        counter!("cycle_parsed_total").increment(s.parsed as u64);
        counter!("cycle_duplicates_total").increment(s.duplicates as u64);
        counter!("cycle_delivered_total").increment(s.delivered as u64);
    }
    counter!("cycle_source_errors_total").increment(sources_failed as u64);
    gauge!("cycle_last_run_ts").set(Utc::now().timestamp().max(0) as f64);

    CycleSummary {
        started_at,
        duration_ms: t0.elapsed().as_millis() as u64,
        dry_run: ctx.dry_run,
        cancelled,
        sources: sources_out,
        sources_failed,
        would_deliver,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_source(
    src: PreparedSource,
    taxonomy: Arc<Taxonomy>,
    store: Arc<dyn SeenStore>,
    dispatcher: Arc<dyn Dispatcher>,
    claimed: Arc<Mutex<HashSet<String>>>,
    unmatched_policy: UnmatchedPolicy,
    dry_run: bool,
    cancel: Arc<AtomicBool>,
) -> SourceOutcome {
    let source_id = src.adapter.source_id().to_string();
    let mut report = SourceReport::new(&source_id);
    let mut would_deliver = Vec::new();
    let mut cancelled = false;

    let raw_items = match tokio::time::timeout(src.fetch_timeout, src.adapter.fetch()).await {
        Ok(Ok(items)) => items,
        Ok(Err(e)) => {
            tracing::warn!(source = %source_id, error = ?e, "fetch failed, skipping source");
            report.error = Some(format!("{e:#}"));
            return SourceOutcome {
                report,
                would_deliver,
                cancelled,
            };
        }
        Err(_) => {
            tracing::warn!(
                source = %source_id,
                timeout_secs = src.fetch_timeout.as_secs(),
                "fetch timed out, skipping source"
            );
            report.error = Some(format!(
                "fetch timed out after {}s",
                src.fetch_timeout.as_secs()
            ));
            return SourceOutcome {
                report,
                would_deliver,
                cancelled,
            };
        }
    };
    report.fetched = raw_items.len();

    for raw in raw_items {
        let mut record = match src.adapter.parse(raw) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(source = %source_id, error = ?e, "dropping unparsable item");
                continue;
            }
        };
        report.parsed += 1;

        taxonomy.classify_record(&mut record, src.confidence_override);
        if record.category.is_some() {
            report.classified += 1;
        } else {
            report.unmatched += 1;
            if unmatched_policy == UnmatchedPolicy::Drop {
                continue;
            }
        }

        let fingerprint = record.fingerprint();
        match store.has(&fingerprint) {
            Ok(true) => {
                report.duplicates += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(source = %source_id, error = ?e, "seen store unavailable");
                report.error = Some(format!("seen store unavailable: {e:#}"));
                break;
            }
        }
        {
            let mut guard = claimed.lock().expect("claimed set lock poisoned");
            if !guard.insert(fingerprint.clone()) {
                report.duplicates += 1;
                continue;
            }
        }

        if dry_run {
            would_deliver.push(PendingDelivery {
                source_id: source_id.clone(),
                fingerprint,
                title: record.title.clone(),
                category: record.category.clone(),
                url: record.url.clone(),
            });
            continue;
        }

        if cancel.load(Ordering::Relaxed) {
            tracing::info!(source = %source_id, "cycle cancelled, abandoning remaining items");
            cancelled = true;
            break;
        }

        match dispatcher.deliver(&record).await {
            Ok(()) => {
                let entry = SeenEntry {
                    source_id: source_id.clone(),
                    title: record.title.clone(),
                    category: record.category.clone(),
                    first_seen: Utc::now(),
                };
                match store.record(&fingerprint, entry) {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        // delivered but not committed: the next cycle may
                        // re-deliver this item
                        tracing::error!(
                            source = %source_id,
                            %fingerprint,
                            error = ?e,
                            "delivered but failed to record fingerprint"
                        );
                        report.delivered += 1;
                        report.failed_items += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(source = %source_id, error = ?e, "dispatch failed, not committing");
                report.failed_items += 1;
            }
        }
    }

    SourceOutcome {
        report,
        would_deliver,
        cancelled,
    }
}

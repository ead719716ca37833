// src/sources/mod.rs
pub mod browser;
pub mod html_list;
pub mod rss;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;

use crate::config::{PipelineCfg, SourceEntry};
use crate::record::{RawItem, Record};

/// One implementation per external source kind. `fetch` owns the transport
/// entirely (static document, rendered DOM, whatever the source needs);
/// `parse` is pure. The orchestrator only ever sees this surface.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Pull the current batch of raw items. An empty vec is a normal,
    /// successful outcome; errors are transport failures the orchestrator
    /// scopes to this source.
    async fn fetch(&self) -> Result<Vec<RawItem>>;

    /// Convert one raw item into a record, category unset. No I/O. Missing
    /// optional fields stay unset; a missing/blank title is an error so the
    /// caller can drop just that item.
    fn parse(&self, raw: RawItem) -> Result<Record>;

    fn source_id(&self) -> &str;
}

type AdapterFactory = fn(&SourceEntry, Duration) -> Result<Box<dyn SourceAdapter>>;

/// Adapter kind -> constructor. Adding a source kind means one entry here
/// plus one `[[sources]]` row; the orchestrator never changes.
static REGISTRY: Lazy<HashMap<&'static str, AdapterFactory>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, AdapterFactory> = HashMap::new();
    m.insert("rss", rss::RssAdapter::factory);
    m.insert("html_list", html_list::HtmlListAdapter::factory);
    m.insert("browser", browser::BrowserAdapter::factory);
    m
});

pub fn adapter_kinds() -> Vec<&'static str> {
    let mut kinds: Vec<_> = REGISTRY.keys().copied().collect();
    kinds.sort_unstable();
    kinds
}

/// Instantiate the adapter a source entry names. Unknown kinds and invalid
/// params fail here, at startup.
pub fn build_adapter(entry: &SourceEntry, pipeline: &PipelineCfg) -> Result<Box<dyn SourceAdapter>> {
    let factory = REGISTRY.get(entry.adapter.as_str()).ok_or_else(|| {
        anyhow!(
            "source `{}`: unknown adapter kind `{}` (known: {})",
            entry.id,
            entry.adapter,
            adapter_kinds().join(", ")
        )
    })?;
    let timeout = Duration::from_secs(entry.fetch_timeout_secs(pipeline));
    factory(entry, timeout)
        .with_context(|| format!("building `{}` adapter for source `{}`", entry.adapter, entry.id))
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("building http client")
}

/// Normalize scraped text: decode HTML entities, strip tags, normalize
/// curly quotes, collapse whitespace, cap length. Deterministic, so titles
/// normalized here keep their fingerprints stable across fetches.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: Lazy<regex::Regex> =
        Lazy::new(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = RE_TAGS.replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: Lazy<regex::Regex> =
        Lazy::new(|| regex::Regex::new(r"\s+").expect("ws regex"));
    out = RE_WS.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }
    out
}

/// Shared `parse` for the listing-style adapters (html_list, browser):
/// both produce RawItems with title/url/date only.
pub(crate) fn parse_listing_item(source_id: &str, raw: RawItem) -> Result<Record> {
    let title = normalize_text(raw.title.as_deref().unwrap_or_default());
    if title.is_empty() {
        return Err(anyhow!("item without title"));
    }
    let url = raw.url.unwrap_or_default().trim().to_string();
    let body = normalize_text(raw.body.as_deref().unwrap_or_default());

    let mut record = Record::new(title, url, body, source_id.to_string());
    record.published_at = raw.published.as_deref().and_then(parse_datetime);
    record.extra = raw.extra;
    Ok(record)
}

/// Best-effort date parsing: RFC 2822 (RSS pubDate), then RFC 3339, then
/// bare `YYYY-MM-DD`. Unparseable dates leave the field unset.
pub(crate) fn parse_datetime(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc2822) {
        let secs = dt.to_offset(UtcOffset::UTC).unix_timestamp();
        return Utc.timestamp_opt(secs, 0).single();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|ndt| Utc.from_utc_datetime(&ndt));
    }
    None
}

/// Resolve a possibly-relative href against a base. Absolute URLs pass
/// through untouched.
pub(crate) fn resolve_url(base: &str, href: &str) -> String {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") || base.is_empty() {
        return href.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        href.trim_start_matches('/')
    )
}

// src/sources/html_list.rs
//! Static-HTML adapter for announcement board pages. Extraction is driven
//! by a per-source `item_pattern` regex with named captures rather than DOM
//! traversal; board layouts differ per source, so the pattern lives in the
//! source's config row.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use regex::Regex;

use super::{http_client, parse_listing_item, resolve_url, SourceAdapter};
use crate::config::SourceEntry;
use crate::record::{RawItem, Record};

pub struct HtmlListAdapter {
    source_id: String,
    endpoint: String,
    client: reqwest::Client,
    pattern: Regex,
    base_url: String,
}

impl HtmlListAdapter {
    pub fn factory(entry: &SourceEntry, timeout: Duration) -> Result<Box<dyn SourceAdapter>> {
        let pattern = compile_item_pattern(entry)?;
        let base_url = entry
            .params
            .get("base_url")
            .cloned()
            .unwrap_or_else(|| entry.endpoint.clone());
        Ok(Box::new(Self {
            source_id: entry.id.clone(),
            endpoint: entry.endpoint.clone(),
            client: http_client(timeout)?,
            pattern,
            base_url,
        }))
    }
}

/// Compile and shape-check the `item_pattern` param: it must have `url` and
/// `title` named captures (`date` is optional).
pub(crate) fn compile_item_pattern(entry: &SourceEntry) -> Result<Regex> {
    let raw = entry
        .params
        .get("item_pattern")
        .ok_or_else(|| anyhow!("source `{}` needs an `item_pattern` param", entry.id))?;
    let re = Regex::new(raw)
        .with_context(|| format!("source `{}` item_pattern is not a valid regex", entry.id))?;
    for required in ["url", "title"] {
        if !re.capture_names().flatten().any(|n| n == required) {
            return Err(anyhow!(
                "source `{}` item_pattern lacks the `{required}` named capture",
                entry.id
            ));
        }
    }
    Ok(re)
}

/// Run the configured pattern over a page and build raw items. Shared with
/// the rendered-DOM adapter, which ends up with the same kind of HTML.
pub(crate) fn extract_items(html: &str, pattern: &Regex, base_url: &str) -> Vec<RawItem> {
    let mut out = Vec::new();
    for caps in pattern.captures_iter(html) {
        let title = caps.name("title").map(|m| m.as_str().to_string());
        let url = caps
            .name("url")
            .map(|m| resolve_url(base_url, m.as_str()));
        let published = caps.name("date").map(|m| m.as_str().to_string());
        out.push(RawItem {
            title,
            url,
            published,
            ..Default::default()
        });
    }
    out
}

#[async_trait::async_trait]
impl SourceAdapter for HtmlListAdapter {
    async fn fetch(&self) -> Result<Vec<RawItem>> {
        let html = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .with_context(|| format!("GET {}", self.endpoint))?
            .error_for_status()
            .context("board page non-2xx")?
            .text()
            .await
            .context("reading board page")?;
        Ok(extract_items(&html, &self.pattern, &self.base_url))
    }

    fn parse(&self, raw: RawItem) -> Result<Record> {
        parse_listing_item(&self.source_id, raw)
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<table class="board">
  <tr><td class="num">12</td>
      <td><a href="/board/view?id=12" class="subject">2026 수시모집 요강 안내</a></td>
      <td class="date">2025-06-02</td></tr>
  <tr><td class="num">11</td>
      <td><a href="/board/view?id=11" class="subject">Orchestra &amp; vocal auditions</a></td>
      <td class="date">2025-05-28</td></tr>
</table>"#;

    const PATTERN: &str = concat!(
        r#"<a href="(?P<url>[^"]+)" class="subject">(?P<title>[^<]+)</a></td>\s*"#,
        r#"<td class="date">(?P<date>[0-9-]+)</td>"#
    );

    fn entry_with_pattern() -> SourceEntry {
        let mut params = std::collections::BTreeMap::new();
        params.insert("item_pattern".to_string(), PATTERN.to_string());
        params.insert("base_url".to_string(), "https://board.example.test".to_string());
        SourceEntry {
            id: "khcu-board".into(),
            enabled: true,
            adapter: "html_list".into(),
            endpoint: "https://board.example.test/board/list".into(),
            poll_interval_secs: None,
            confidence_threshold: None,
            fetch_timeout_secs: None,
            params,
        }
    }

    #[test]
    fn extracts_items_with_resolved_urls() {
        let entry = entry_with_pattern();
        let re = compile_item_pattern(&entry).unwrap();
        let items = extract_items(PAGE, &re, "https://board.example.test");
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0].url.as_deref(),
            Some("https://board.example.test/board/view?id=12")
        );
        assert_eq!(items[0].published.as_deref(), Some("2025-06-02"));
    }

    #[test]
    fn parse_normalizes_entities_in_titles() {
        let entry = entry_with_pattern();
        let re = compile_item_pattern(&entry).unwrap();
        let items = extract_items(PAGE, &re, "https://board.example.test");
        let rec = parse_listing_item("khcu-board", items[1].clone()).unwrap();
        assert_eq!(rec.title, "Orchestra & vocal auditions");
        assert!(rec.published_at.is_some());
    }

    #[test]
    fn missing_pattern_fails_at_build() {
        let mut entry = entry_with_pattern();
        entry.params.remove("item_pattern");
        assert!(compile_item_pattern(&entry).is_err());
    }

    #[test]
    fn pattern_without_named_captures_fails_at_build() {
        let mut entry = entry_with_pattern();
        entry
            .params
            .insert("item_pattern".to_string(), r#"<a href="[^"]+">"#.to_string());
        let err = compile_item_pattern(&entry).unwrap_err();
        assert!(err.to_string().contains("named capture"));
    }

    #[test]
    fn no_matches_is_empty_not_error() {
        let entry = entry_with_pattern();
        let re = compile_item_pattern(&entry).unwrap();
        let items = extract_items("<html><body>maintenance</body></html>", &re, "");
        assert!(items.is_empty());
    }
}

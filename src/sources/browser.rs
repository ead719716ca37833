// src/sources/browser.rs
//! Rendered-DOM adapter for portals that build their announcement lists
//! client-side. The page is rendered by a Browserless instance (POST to its
//! /content endpoint) and the resulting HTML goes through the same
//! configured-pattern extraction as the static board adapter.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use regex::Regex;

use super::html_list::{compile_item_pattern, extract_items};
use super::{http_client, parse_listing_item, SourceAdapter};
use crate::config::SourceEntry;
use crate::record::{RawItem, Record};

const ENV_BROWSERLESS_TOKEN: &str = "BROWSERLESS_TOKEN";

pub struct BrowserAdapter {
    source_id: String,
    endpoint: String,
    content_url: String,
    token: Option<String>,
    client: reqwest::Client,
    pattern: Regex,
    base_url: String,
}

impl BrowserAdapter {
    pub fn factory(entry: &SourceEntry, timeout: Duration) -> Result<Box<dyn SourceAdapter>> {
        let renderer = entry
            .params
            .get("browserless_url")
            .ok_or_else(|| anyhow!("source `{}` needs a `browserless_url` param", entry.id))?;
        let pattern = compile_item_pattern(entry)?;
        let base_url = entry
            .params
            .get("base_url")
            .cloned()
            .unwrap_or_else(|| entry.endpoint.clone());
        Ok(Box::new(Self {
            source_id: entry.id.clone(),
            endpoint: entry.endpoint.clone(),
            content_url: format!("{}/content", renderer.trim_end_matches('/')),
            token: std::env::var(ENV_BROWSERLESS_TOKEN).ok(),
            client: http_client(timeout)?,
            pattern,
            base_url,
        }))
    }

    fn render_url(&self) -> String {
        match &self.token {
            Some(token) => format!("{}?token={token}", self.content_url),
            None => self.content_url.clone(),
        }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for BrowserAdapter {
    async fn fetch(&self) -> Result<Vec<RawItem>> {
        let body = serde_json::json!({ "url": self.endpoint });
        let resp = self
            .client
            .post(self.render_url())
            .json(&body)
            .send()
            .await
            .with_context(|| format!("rendering {} via browserless", self.endpoint))?;

        let status = resp.status();
        if !status.is_success() {
            // token stays out of the error; the URL carries it
            return Err(anyhow!("browserless render failed with status {status}"));
        }
        let html = resp.text().await.context("reading rendered html")?;
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
    use crate::config::PipelineCfg;

    fn entry() -> SourceEntry {
        let mut params = std::collections::BTreeMap::new();
        params.insert(
            "item_pattern".to_string(),
            r#"<a class="item" href="(?P<url>[^"]+)">(?P<title>[^<]+)</a>"#.to_string(),
        );
        params.insert(
            "browserless_url".to_string(),
            "http://localhost:3000".to_string(),
        );
        SourceEntry {
            id: "adiga".into(),
            enabled: true,
            adapter: "browser".into(),
            endpoint: "https://portal.example.test/notices".into(),
            poll_interval_secs: None,
            confidence_threshold: None,
            fetch_timeout_secs: None,
            params,
        }
    }

    #[test]
    fn factory_requires_browserless_url() {
        let mut e = entry();
        e.params.remove("browserless_url");
        assert!(super::super::build_adapter(&e, &PipelineCfg::default()).is_err());
    }

    #[test]
    fn factory_builds_with_full_params() {
        let built = super::super::build_adapter(&entry(), &PipelineCfg::default()).unwrap();
        assert_eq!(built.source_id(), "adiga");
    }

    #[test]
    fn rendered_html_goes_through_listing_extraction() {
        let e = entry();
        let pattern = compile_item_pattern(&e).unwrap();
        let html = r#"<div><a class="item" href="/notices/77">전형일정 변경 안내</a></div>"#;
        let items = extract_items(html, &pattern, "https://portal.example.test");
        assert_eq!(items.len(), 1);
        let rec = parse_listing_item("adiga", items[0].clone()).unwrap();
        assert_eq!(rec.url, "https://portal.example.test/notices/77");
        assert_eq!(rec.title, "전형일정 변경 안내");
    }
}

// src/sources/rss.rs
//! Static-document adapter for RSS 2.0 feeds (admission news feeds and the
//! like). Fetch is one GET; items map 1:1 onto `<item>` elements.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use quick_xml::de::from_str;
use serde::Deserialize;

use super::{http_client, normalize_text, parse_datetime, SourceAdapter};
use crate::config::SourceEntry;
use crate::record::{RawItem, Record};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    guid: Option<String>,
}

pub struct RssAdapter {
    source_id: String,
    endpoint: String,
    client: reqwest::Client,
}

impl RssAdapter {
    pub fn factory(entry: &SourceEntry, timeout: Duration) -> Result<Box<dyn SourceAdapter>> {
        Ok(Box::new(Self {
            source_id: entry.id.clone(),
            endpoint: entry.endpoint.clone(),
            client: http_client(timeout)?,
        }))
    }

    /// Decode a feed body into raw items. Separated from `fetch` so feed
    /// fixtures can be parsed without a network.
    pub fn parse_feed(xml: &str) -> Result<Vec<RawItem>> {
        let xml_clean = scrub_html_entities_for_xml(xml);
        let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let mut raw = RawItem {
                title: it.title,
                url: it.link,
                body: it.description,
                published: it.pub_date,
                ..Default::default()
            };
            if let Some(guid) = it.guid {
                raw.extra.insert("guid".to_string(), guid);
            }
            out.push(raw);
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl SourceAdapter for RssAdapter {
    async fn fetch(&self) -> Result<Vec<RawItem>> {
        let body = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .with_context(|| format!("GET {}", self.endpoint))?
            .error_for_status()
            .context("rss feed non-2xx")?
            .text()
            .await
            .context("reading rss body")?;
        Self::parse_feed(&body)
    }

    fn parse(&self, raw: RawItem) -> Result<Record> {
        let title = normalize_text(raw.title.as_deref().unwrap_or_default());
        if title.is_empty() {
            return Err(anyhow!("feed item without title"));
        }
        let url = raw.url.unwrap_or_default().trim().to_string();
        let body = normalize_text(raw.body.as_deref().unwrap_or_default());

        let mut record = Record::new(title, url, body, self.source_id.clone());
        record.published_at = raw.published.as_deref().and_then(parse_datetime);
        record.extra = raw.extra;
        Ok(record)
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

/// quick-xml rejects bare HTML entities inside element text; replace the
/// usual offenders before deserializing.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

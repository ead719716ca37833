// src/record.rs
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Raw item as an adapter's fetch produced it, before normalization.
/// Everything is optional; `parse` decides what is fatal for the item.
/// Source-specific fields go into `extra` and never leak into typed fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawItem {
    pub title: Option<String>,
    pub url: Option<String>,
    pub body: Option<String>,
    pub published: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Canonical announcement flowing through one cycle. Created by an adapter,
/// enriched by classification, consulted by the seen-store, handed to the
/// dispatcher. Never persisted as a whole; only its fingerprint survives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub title: String,
    pub url: String,
    pub body: String,
    pub source_id: String,
    pub published_at: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub category_confidence: Option<f32>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Record {
    pub fn new(title: String, url: String, body: String, source_id: String) -> Self {
        Self {
            title,
            url,
            body,
            source_id,
            published_at: None,
            category: None,
            category_confidence: None,
            extra: BTreeMap::new(),
        }
    }

    /// Stable identity for deduplication: SHA-256 over `(title, url)`, or
    /// `(title, source_id)` when the source has no stable link. Re-fetching
    /// the same logical item yields the same fingerprint across runs.
    pub fn fingerprint(&self) -> String {
        let scope = if self.url.is_empty() {
            &self.source_id
        } else {
            &self.url
        };
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update([0x1f]);
        hasher.update(scope.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(32);
        for b in digest.iter().take(16) {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out
    }

    /// First ~200 chars of the body, for notification messages.
    pub fn excerpt(&self) -> &str {
        let mut end = self.body.len().min(200);
        while end < self.body.len() && !self.body.is_char_boundary(end) {
            end += 1;
        }
        &self.body[..end]
    }
}

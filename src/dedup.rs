// src/dedup.rs
//! Persistent "already delivered" store. The store is the sole source of
//! truth for seen-ness; records never carry their own flag. Once `record`
//! succeeds for a fingerprint, no later cycle re-delivers it, including
//! across process restarts.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata kept per fingerprint. Enough to audit what was delivered and
/// when; the full record is not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenEntry {
    pub source_id: String,
    pub title: String,
    pub category: Option<String>,
    pub first_seen: DateTime<Utc>,
}

pub trait SeenStore: Send + Sync {
    fn has(&self, fingerprint: &str) -> Result<bool>;
    /// Idempotent: recording a fingerprint that is already present is a
    /// no-op, never an error.
    fn record(&self, fingerprint: &str, entry: SeenEntry) -> Result<()>;
}

/// JSON-file backed store. The whole map is loaded at open (a failure there
/// aborts the cycle before any dispatch) and rewritten atomically on every
/// new fingerprint via temp file + rename. One global lock serializes
/// has/record across concurrently running sources.
pub struct JsonSeenStore {
    path: PathBuf,
    inner: Mutex<HashMap<String, SeenEntry>>,
}

impl JsonSeenStore {
    pub fn open(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading seen store {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing seen store {}", path.display()))?
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).with_context(|| {
                        format!("creating store directory {}", parent.display())
                    })?;
                }
            }
            HashMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(entries),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("seen store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, entries: &HashMap<String, SeenEntry>) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("writing seen store {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing seen store {}", self.path.display()))?;
        Ok(())
    }
}

impl SeenStore for JsonSeenStore {
    fn has(&self, fingerprint: &str) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .expect("seen store lock poisoned")
            .contains_key(fingerprint))
    }

    fn record(&self, fingerprint: &str, entry: SeenEntry) -> Result<()> {
        let mut guard = self.inner.lock().expect("seen store lock poisoned");
        if guard.contains_key(fingerprint) {
            return Ok(());
        }
        guard.insert(fingerprint.to_string(), entry);
        self.persist(&guard)
    }
}

/// Store that remembers nothing: `has` is always false, `record` discards.
/// Backs tests and embedders that want the pipeline without persistence.
#[derive(Debug, Default)]
pub struct NoopSeenStore;

impl SeenStore for NoopSeenStore {
    fn has(&self, _fingerprint: &str) -> Result<bool> {
        Ok(false)
    }

    fn record(&self, _fingerprint: &str, _entry: SeenEntry) -> Result<()> {
        Ok(())
    }
}

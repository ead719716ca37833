// src/config.rs
//! Typed configuration: sources, category taxonomy, pipeline knobs.
//! Loaded once at startup; every shape problem is a startup error, never a
//! cycle-time one.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "config/noticewatch.toml";
pub const ENV_CONFIG_PATH: &str = "NOTICEWATCH_CONFIG";

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// What to do with a record no category claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedPolicy {
    /// Skip the record (counted in the summary, not delivered).
    #[default]
    Drop,
    /// Deliver it with `category: None`.
    Deliver,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineCfg,
    pub store: StoreCfg,
    #[serde(default)]
    pub dispatch: DispatchCfg,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
    #[serde(default)]
    pub categories: Vec<CategoryEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineCfg {
    pub default_confidence_threshold: f32,
    pub max_in_flight: usize,
    pub fetch_timeout_secs: u64,
    pub unmatched_policy: UnmatchedPolicy,
}

impl Default for PipelineCfg {
    fn default() -> Self {
        Self {
            default_confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            unmatched_policy: UnmatchedPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreCfg {
    /// Path to the JSON seen-file.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchCfg {
    /// "telegram" | "console"
    pub kind: String,
    pub timeout_secs: u64,
    pub max_retries: u8,
}

impl Default for DispatchCfg {
    fn default() -> Self {
        Self {
            kind: "console".to_string(),
            timeout_secs: 10,
            max_retries: 3,
        }
    }
}

/// One row of the source registry. `adapter` selects the implementation via
/// the adapter registry; `params` carries adapter-specific settings
/// (e.g. `item_pattern` for HTML extraction) without widening this struct.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub adapter: String,
    pub endpoint: String,
    /// For the external scheduler's benefit; the core does not self-schedule.
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    /// Overrides every category threshold for this source.
    #[serde(default)]
    pub confidence_threshold: Option<f32>,
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryEntry {
    pub id: String,
    pub keywords: Vec<String>,
    /// Falls back to `pipeline.default_confidence_threshold` when absent.
    #[serde(default)]
    pub threshold: Option<f32>,
    /// Tie-break between equally confident categories; lower value wins.
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u32 {
    99
}

impl AppConfig {
    /// Resolve the config path: explicit argument, then $NOTICEWATCH_CONFIG,
    /// then `config/noticewatch.toml`.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let cfg = Self::from_toml_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: AppConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Startup validation. A config that passes here cannot produce a
    /// classification error at cycle time.
    pub fn validate(&self) -> Result<()> {
        let t = self.pipeline.default_confidence_threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(anyhow!(
                "pipeline.default_confidence_threshold {t} outside [0, 1]"
            ));
        }
        if self.pipeline.max_in_flight == 0 {
            return Err(anyhow!("pipeline.max_in_flight must be at least 1"));
        }
        match self.dispatch.kind.as_str() {
            "telegram" | "console" => {}
            other => return Err(anyhow!("unknown dispatch.kind `{other}`")),
        }

        let mut seen_sources = HashSet::new();
        for s in &self.sources {
            if s.id.trim().is_empty() {
                return Err(anyhow!("source with empty id"));
            }
            if !seen_sources.insert(s.id.as_str()) {
                return Err(anyhow!("duplicate source id `{}`", s.id));
            }
            if let Some(t) = s.confidence_threshold {
                if !(0.0..=1.0).contains(&t) {
                    return Err(anyhow!(
                        "source `{}` confidence_threshold {t} outside [0, 1]",
                        s.id
                    ));
                }
            }
        }

        let mut seen_categories = HashSet::new();
        for c in &self.categories {
            if c.id.trim().is_empty() {
                return Err(anyhow!("category with empty id"));
            }
            if !seen_categories.insert(c.id.as_str()) {
                return Err(anyhow!("duplicate category id `{}`", c.id));
            }
            let threshold = c
                .threshold
                .unwrap_or(self.pipeline.default_confidence_threshold);
            if !(0.0..=1.0).contains(&threshold) {
                return Err(anyhow!(
                    "category `{}` threshold {threshold} outside [0, 1]",
                    c.id
                ));
            }
            let has_keywords = c.keywords.iter().any(|k| !k.trim().is_empty());
            if !has_keywords && threshold > 0.0 {
                // zero keywords + positive threshold = unreachable category
                return Err(anyhow!(
                    "category `{}` has no keywords but threshold {threshold} > 0",
                    c.id
                ));
            }
        }
        Ok(())
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceEntry> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

impl SourceEntry {
    pub fn fetch_timeout_secs(&self, pipeline: &PipelineCfg) -> u64 {
        self.fetch_timeout_secs.unwrap_or(pipeline.fetch_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[pipeline]
default_confidence_threshold = 0.25
max_in_flight = 2
fetch_timeout_secs = 15
unmatched_policy = "drop"

[store]
path = "data/seen.json"

[dispatch]
kind = "console"

[[sources]]
id = "unn-news"
adapter = "rss"
endpoint = "https://news.example.test/rss"
poll_interval_secs = 900
confidence_threshold = 0.3

[[sources]]
id = "old-board"
enabled = false
adapter = "html_list"
endpoint = "https://board.example.test/list"
params = { item_pattern = '<a href="(?P<url>[^"]+)">(?P<title>[^<]+)</a>' }

[[categories]]
id = "music"
keywords = ["music", "orchestra"]
threshold = 0.25
priority = 1

[[categories]]
id = "korean"
keywords = ["korean", "hangul"]
threshold = 0.25
priority = 2
"#;

    #[test]
    fn sample_parses_and_validates() {
        let cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.sources.len(), 2);
        assert_eq!(cfg.enabled_sources().count(), 1);
        assert_eq!(cfg.categories.len(), 2);
        assert_eq!(cfg.pipeline.unmatched_policy, UnmatchedPolicy::Drop);
        assert_eq!(
            cfg.sources[1].params.get("item_pattern").map(String::as_str),
            Some(r#"<a href="(?P<url>[^"]+)">(?P<title>[^<]+)</a>"#)
        );
    }

    #[test]
    fn source_timeout_override_wins() {
        let mut cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.sources[0].fetch_timeout_secs(&cfg.pipeline), 15);
        cfg.sources[0].fetch_timeout_secs = Some(5);
        assert_eq!(cfg.sources[0].fetch_timeout_secs(&cfg.pipeline), 5);
    }

    #[test]
    fn rejects_keywordless_category_with_positive_threshold() {
        let bad = r#"
[store]
path = "data/seen.json"

[[categories]]
id = "ghost"
keywords = []
threshold = 0.5
"#;
        let err = AppConfig::from_toml_str(bad).unwrap_err();
        assert!(err.to_string().contains("ghost"), "got: {err:#}");
    }

    #[test]
    fn allows_keywordless_category_at_zero_threshold() {
        // threshold 0 with no keywords is inert rather than unreachable
        let ok = r#"
[store]
path = "data/seen.json"

[[categories]]
id = "inert"
keywords = []
threshold = 0.0
"#;
        assert!(AppConfig::from_toml_str(ok).is_ok());
    }

    #[test]
    fn rejects_out_of_range_thresholds_and_duplicates() {
        let bad_threshold = r#"
[store]
path = "s.json"

[[categories]]
id = "x"
keywords = ["a"]
threshold = 1.5
"#;
        assert!(AppConfig::from_toml_str(bad_threshold).is_err());

        let dup = r#"
[store]
path = "s.json"

[[sources]]
id = "a"
adapter = "rss"
endpoint = "https://x.test"

[[sources]]
id = "a"
adapter = "rss"
endpoint = "https://y.test"
"#;
        assert!(AppConfig::from_toml_str(dup).is_err());
    }

    #[test]
    fn rejects_unknown_dispatch_kind() {
        let bad = r#"
[store]
path = "s.json"

[dispatch]
kind = "pigeon"
"#;
        assert!(AppConfig::from_toml_str(bad).is_err());
    }

    #[serial_test::serial]
    #[test]
    fn path_resolution_order() {
        std::env::remove_var(ENV_CONFIG_PATH);
        assert_eq!(
            AppConfig::resolve_path(None),
            PathBuf::from(DEFAULT_CONFIG_PATH)
        );

        std::env::set_var(ENV_CONFIG_PATH, "/tmp/alt.toml");
        assert_eq!(AppConfig::resolve_path(None), PathBuf::from("/tmp/alt.toml"));
        // explicit flag wins over env
        assert_eq!(
            AppConfig::resolve_path(Some(Path::new("cli.toml"))),
            PathBuf::from("cli.toml")
        );
        std::env::remove_var(ENV_CONFIG_PATH);
    }
}

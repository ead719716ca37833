// src/classify.rs
//! Keyword-based category classification. Deterministic and side-effect
//! free: the same record against the same taxonomy always yields the same
//! `(category, confidence)` pair.

use anyhow::{anyhow, Result};

use crate::config::CategoryEntry;
use crate::record::Record;

/// Winning category for a record.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryMatch {
    pub category: String,
    pub confidence: f32,
}

#[derive(Debug)]
struct CompiledCategory {
    id: String,
    /// Lowercased, blank entries removed.
    keywords: Vec<String>,
    threshold: f32,
    priority: u32,
}

/// The full category definition set, compiled once at startup.
#[derive(Debug)]
pub struct Taxonomy {
    categories: Vec<CompiledCategory>,
}

impl Taxonomy {
    /// Compile category entries, resolving absent thresholds to
    /// `default_threshold`. Shape problems (unreachable categories,
    /// out-of-range thresholds) are errors here, not at cycle time.
    pub fn compile(entries: &[CategoryEntry], default_threshold: f32) -> Result<Self> {
        let mut categories = Vec::with_capacity(entries.len());
        for e in entries {
            let threshold = e.threshold.unwrap_or(default_threshold);
            if !(0.0..=1.0).contains(&threshold) {
                return Err(anyhow!(
                    "category `{}` threshold {threshold} outside [0, 1]",
                    e.id
                ));
            }
            let keywords: Vec<String> = e
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
            if keywords.is_empty() && threshold > 0.0 {
                return Err(anyhow!(
                    "category `{}` has no keywords but threshold {threshold} > 0",
                    e.id
                ));
            }
            categories.push(CompiledCategory {
                id: e.id.clone(),
                keywords,
                threshold,
                priority: e.priority,
            });
        }
        Ok(Self { categories })
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Classify case-folded `title + " " + body` against every category.
    /// Keywords match by substring containment, including inside longer
    /// words ("tax" hits "taxonomy"). `source_override`, when set, replaces
    /// every category threshold for this record's source.
    ///
    /// Winner: highest confidence; ties broken by lowest priority value,
    /// then category id, so the result is total and reproducible.
    pub fn classify(
        &self,
        title: &str,
        body: &str,
        source_override: Option<f32>,
    ) -> Option<CategoryMatch> {
        let text = format!("{} {}", title, body).to_lowercase();

        let mut best: Option<(&CompiledCategory, f32)> = None;
        for c in &self.categories {
            if c.keywords.is_empty() {
                // no keywords: non-matchable
                continue;
            }
            let matched = c.keywords.iter().filter(|k| text.contains(k.as_str())).count();
            let confidence = matched as f32 / c.keywords.len() as f32;
            let threshold = source_override.unwrap_or(c.threshold);
            if confidence < threshold {
                continue;
            }
            best = match best {
                None => Some((c, confidence)),
                Some((cur, cur_conf)) => {
                    if confidence > cur_conf
                        || (confidence == cur_conf
                            && (c.priority, c.id.as_str()) < (cur.priority, cur.id.as_str()))
                    {
                        Some((c, confidence))
                    } else {
                        Some((cur, cur_conf))
                    }
                }
            };
        }

        best.map(|(c, confidence)| CategoryMatch {
            category: c.id.clone(),
            confidence,
        })
    }

    /// Classify a record in place, setting `category` and
    /// `category_confidence` when a category wins.
    pub fn classify_record(&self, record: &mut Record, source_override: Option<f32>) {
        if let Some(m) = self.classify(&record.title, &record.body, source_override) {
            record.category = Some(m.category);
            record.category_confidence = Some(m.confidence);
        }
    }
}

//! Tunables for building and serving an index.
//!
//! Every field has a default, so a config file only needs the values it changes:
//!
//! ```json
//! { "build": { "batch_size": 5000, "similarity_threshold": 1 } }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub build: BuildConfig,
    pub pagerank: PageRankConfig,
    pub search: SearchConfig,
}

impl EngineConfig {
    /// Load from a JSON file, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else { return Ok(Self::default()) };
        let text = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Accepted documents per partial index file.
    pub batch_size: usize,
    /// Maximum Hamming distance at which two fingerprints count as duplicates.
    pub similarity_threshold: u32,
    pub field_weights: FieldWeights,
    pub stop_words: StopWordPolicy,
    /// Documents read and analysed in parallel before the sequential reduction.
    pub read_chunk: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            similarity_threshold: 3,
            field_weights: FieldWeights::default(),
            stop_words: StopWordPolicy::Exclude,
            read_chunk: 256,
        }
    }
}

/// Per-occurrence weights. A token scores `base` plus the largest weight of
/// any structural element (title, headings, bold) that also contains it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldWeights {
    pub base: f64,
    pub title: f64,
    pub h1: f64,
    pub h2: f64,
    pub h3: f64,
    pub bold: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self { base: 1.0, title: 4.0, h1: 3.0, h2: 2.0, h3: 2.0, bold: 1.5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopWordPolicy {
    /// Stop words get no postings; they still advance token positions.
    Exclude,
    /// Stop words are indexed with the base weight only, never a structural boost.
    BaseWeight,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PageRankConfig {
    pub damping: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self { damping: 0.85, max_iterations: 100, tolerance: 1e-6 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    pub max_limit: usize,
    /// Drop results that look like non-content resources.
    pub filter_non_content: bool,
    pub excluded_extensions: Vec<String>,
    /// Drop results whose URL carries a query string.
    pub drop_query_urls: bool,
    pub timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let excluded = [
            ".pdf", ".zip", ".gz", ".tar", ".jpg", ".jpeg", ".png", ".gif", ".svg", ".ico", ".mp3", ".mp4", ".avi",
            ".ppt", ".pptx", ".doc", ".docx", ".xls", ".xlsx", ".txt", ".csv", ".bib", ".tex",
        ];
        Self {
            default_limit: 10,
            max_limit: 1000,
            filter_non_content: true,
            excluded_extensions: excluded.iter().map(|s| s.to_string()).collect(),
            drop_query_urls: true,
            timeout_ms: 2000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_other_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"build":{"batch_size":5,"stop_words":"base_weight"},"pagerank":{"damping":0.9}}"#)
                .unwrap();
        assert_eq!(cfg.build.batch_size, 5);
        assert_eq!(cfg.build.stop_words, StopWordPolicy::BaseWeight);
        assert_eq!(cfg.build.similarity_threshold, 3);
        assert_eq!(cfg.pagerank.damping, 0.9);
        assert_eq!(cfg.pagerank.max_iterations, 100);
        assert_eq!(cfg.search.default_limit, 10);
    }

    #[test]
    fn load_without_path_uses_defaults() {
        let cfg = EngineConfig::load(None).unwrap();
        assert_eq!(cfg.build.field_weights.title, 4.0);
    }
}

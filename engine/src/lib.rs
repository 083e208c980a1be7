//! Offline full-text search: ingestion, sharded merge with TF-IDF, seekable
//! retrieval files, PageRank, and ranked querying.
//!
//! Build stages run in order: [`builder`] -> [`merger`] -> [`offsets`], with
//! [`pagerank`] reading the link graph produced by the builder. [`search`]
//! serves queries from the finished directory.

pub mod builder;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod links;
pub mod merger;
pub mod offsets;
pub mod pagerank;
pub mod persist;
pub mod search;
pub mod shard;
pub mod stats;
pub mod tokenizer;

pub use error::IndexError;
pub use index::{DocId, RawPosting, ScoredPosting};
pub use search::{QueryEngine, QuerySession, SearchHit};

use anyhow::Result;
use config::EngineConfig;
use persist::IndexPaths;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub build: builder::BuildReport,
    pub merge: merger::MergeReport,
    pub pagerank: pagerank::PageRankOutcome,
}

/// Run every build stage from `corpus` into `out`.
pub fn build_index(corpus: &Path, out: &Path, cfg: &EngineConfig) -> Result<PipelineReport> {
    let paths = IndexPaths::new(out);
    let build = builder::build_partial_indexes(corpus, &paths, &cfg.build)?;
    let merge = merger::merge_partial_indexes(&paths)?;
    offsets::compile_offsets(&paths)?;
    let pagerank = pagerank::run_pagerank(&paths, &cfg.pagerank)?;
    Ok(PipelineReport { build, merge, pagerank })
}

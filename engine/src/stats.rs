use crate::offsets::load_offset_maps;
use crate::persist::{load_doc_mapping, IndexPaths};
use anyhow::Result;
use serde::Serialize;
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub unique_terms: usize,
    pub final_index_kb: f64,
}

/// Document count, vocabulary size and on-disk size of the final index directory.
pub fn index_stats(paths: &IndexPaths) -> Result<IndexStats> {
    let documents = load_doc_mapping(paths)?.len();
    let unique_terms = load_offset_maps(paths)?.values().map(|m| m.len()).sum();
    let bytes: u64 = WalkDir::new(paths.final_dir())
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum();
    Ok(IndexStats { documents, unique_terms, final_index_kb: bytes as f64 / 1024.0 })
}

//! Ingestion: corpus files -> partial indexes, document mapping, link graph.
//!
//! Documents are analysed in parallel a chunk at a time. Duplicate checks, id
//! assignment and posting accumulation then run sequentially in traversal order,
//! so ids and partial contents do not depend on thread scheduling.

use crate::config::BuildConfig;
use crate::error::IndexError;
use crate::fingerprint::{fingerprint, DuplicateDetector, Fingerprint, Verdict};
use crate::index::{DocId, RawPosting, TermTable};
use crate::links::{extract_links, LinkGraph, LinkResolver};
use crate::persist::{save_analysis, save_doc_mapping, save_links, save_terms, AnalysisFile, DocumentMapping, IndexPaths};
use crate::tokenizer::{main_text, TermHits, Tokenizer};
use anyhow::{Context, Result};
use rayon::prelude::*;
use scraper::Html;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One pre-fetched page as stored in the corpus.
#[derive(Debug, Deserialize)]
struct InputDoc {
    url: String,
    content: String,
}

/// Everything the sequential stage needs from one document.
#[derive(Debug)]
struct Analysis {
    url: String,
    fingerprint: Fingerprint,
    terms: BTreeMap<String, TermHits>,
    links: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub accepted: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub partials: usize,
    pub edges: usize,
}

fn analyze(path: &Path, tokenizer: &Tokenizer) -> Result<Analysis> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let raw = String::from_utf8_lossy(&bytes);
    let doc: InputDoc = serde_json::from_str(&raw)
        .map_err(|e| IndexError::MalformedDocument { path: path.to_path_buf(), reason: e.to_string() })?;
    if doc.url.trim().is_empty() {
        return Err(IndexError::MalformedDocument { path: path.to_path_buf(), reason: "empty url".into() }.into());
    }
    let html = Html::parse_document(&doc.content);
    let text = main_text(&html);
    Ok(Analysis {
        fingerprint: fingerprint(&text),
        terms: tokenizer.weigh(&html, &text),
        links: extract_links(&html, &doc.url),
        url: doc.url,
    })
}

/// Corpus files in a deterministic order: every `*.json` below `root`, sorted by name per directory.
fn corpus_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() || fs::read_dir(root).is_err() {
        return Err(IndexError::CorpusUnreadable(root.to_path_buf()).into());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(%err, "skipping unreadable corpus entry");
                continue;
            }
        };
        let p = entry.path();
        if p.is_file() && p.extension().and_then(|s| s.to_str()) == Some("json") {
            files.push(p.to_path_buf());
        }
    }
    Ok(files)
}

pub struct IndexBuilder<'a> {
    paths: &'a IndexPaths,
    cfg: BuildConfig,
    tokenizer: Tokenizer,
    detector: DuplicateDetector,
    mapping: DocumentMapping,
    outbound: Vec<(DocId, Vec<String>)>,
    partial: TermTable<RawPosting>,
    batch_docs: usize,
    next_doc_id: DocId,
    report: BuildReport,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(paths: &'a IndexPaths, cfg: &BuildConfig) -> Self {
        Self {
            paths,
            cfg: cfg.clone(),
            tokenizer: Tokenizer::new(cfg),
            detector: DuplicateDetector::new(cfg.similarity_threshold),
            mapping: DocumentMapping::new(),
            outbound: Vec::new(),
            partial: TermTable::new(),
            batch_docs: 0,
            next_doc_id: 1,
            report: BuildReport::default(),
        }
    }

    /// Ingest every document under `corpus` and persist partials, mapping and link graph.
    pub fn run(mut self, corpus: &Path) -> Result<BuildReport> {
        let files = corpus_files(corpus)?;
        tracing::info!(corpus = %corpus.display(), files = files.len(), "starting ingestion");
        self.reset_partials()?;

        for chunk in files.chunks(self.cfg.read_chunk.max(1)) {
            let tokenizer = &self.tokenizer;
            let analysed: Vec<Result<Analysis>> = chunk.par_iter().map(|p| analyze(p, tokenizer)).collect();
            for (path, result) in chunk.iter().zip(analysed) {
                match result {
                    Ok(analysis) => self.admit(path, analysis)?,
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "skipping document");
                        self.report.skipped += 1;
                    }
                }
            }
        }
        if !self.partial.is_empty() {
            self.flush()?;
        }

        save_doc_mapping(self.paths, &self.mapping)?;
        save_analysis(self.paths, &AnalysisFile { stop_words: self.cfg.stop_words })?;
        let graph = self.link_graph();
        self.report.edges = graph.values().map(|e| e.len()).sum();
        save_links(self.paths, &graph)?;

        tracing::info!(
            accepted = self.report.accepted,
            duplicates = self.report.duplicates,
            skipped = self.report.skipped,
            partials = self.report.partials,
            edges = self.report.edges,
            "ingestion complete"
        );
        Ok(self.report)
    }

    fn reset_partials(&self) -> Result<()> {
        let dir = self.paths.partial_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir).with_context(|| format!("clearing {}", dir.display()))?;
        }
        fs::create_dir_all(&dir)?;
        Ok(())
    }

    /// Duplicate check first: a rejected document never consumes an id.
    fn admit(&mut self, path: &Path, analysis: Analysis) -> Result<()> {
        match self.detector.check(analysis.fingerprint) {
            Verdict::Accepted => {}
            verdict => {
                tracing::debug!(path = %path.display(), ?verdict, "duplicate document");
                self.report.duplicates += 1;
                return Ok(());
            }
        }

        let doc_id = self.next_doc_id;
        self.next_doc_id += 1;
        for (term, hits) in analysis.terms {
            self.partial.push(&term, RawPosting { doc_id, weight: hits.weight, positions: hits.positions });
        }
        self.mapping.insert(doc_id, analysis.url);
        self.outbound.push((doc_id, analysis.links));
        self.report.accepted += 1;
        self.batch_docs += 1;

        if self.batch_docs >= self.cfg.batch_size.max(1) {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.report.partials += 1;
        let path = self.paths.partial(self.report.partials);
        let table = std::mem::take(&mut self.partial);
        tracing::debug!(path = %path.display(), terms = table.len(), postings = table.posting_count(), "flushing partial index");
        save_terms(&path, table.into_sorted())?;
        self.batch_docs = 0;
        Ok(())
    }

    fn link_graph(&self) -> LinkGraph {
        let resolver = LinkResolver::new(self.mapping.iter().map(|(&id, url)| (id, url.as_str())));
        resolver.graph(self.outbound.iter().map(|(id, urls)| (*id, urls.as_slice())))
    }
}

/// Build entry point for the ingestion stage.
pub fn build_partial_indexes(corpus: &Path, paths: &IndexPaths, cfg: &BuildConfig) -> Result<BuildReport> {
    IndexBuilder::new(paths, cfg).run(corpus)
}

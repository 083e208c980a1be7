//! Partial indexes -> term-sharded final index with df, idf and TF-IDF scores.
//!
//! Each partial is split by [`ShardKey`] and appended to the matching shard file;
//! buckets are independent, so the appends for one partial run in parallel with a
//! single writer per bucket. Once every partial is in, idf is computed from the
//! running document frequencies and every shard is rewritten from raw weights to
//! TF-IDF scores.

use crate::error::IndexError;
use crate::index::{idf, RawPosting, ScoredPosting, TermTable};
use crate::persist::{load_doc_mapping, load_terms, save_json, save_terms, IndexPaths};
use crate::shard::ShardKey;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs;

pub type DocumentFrequency = BTreeMap<String, u32>;
pub type InverseDocumentFrequency = BTreeMap<String, f64>;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MergeReport {
    pub total_docs: u32,
    pub partials_merged: usize,
    pub partials_failed: usize,
    pub terms: usize,
    pub postings: usize,
}

type ShardGroups = BTreeMap<ShardKey, BTreeMap<String, Vec<RawPosting>>>;

fn group_by_shard(terms: BTreeMap<String, Vec<RawPosting>>) -> ShardGroups {
    let mut groups = ShardGroups::new();
    for (term, postings) in terms {
        groups.entry(ShardKey::for_term(&term)).or_default().insert(term, postings);
    }
    groups
}

fn append_to_shard(paths: &IndexPaths, key: ShardKey, terms: BTreeMap<String, Vec<RawPosting>>) -> Result<()> {
    let path = paths.shard(key);
    let mut table = TermTable::from(load_terms::<RawPosting>(&path)?.terms);
    for (term, postings) in terms {
        table.extend(&term, postings);
    }
    save_terms(&path, table.into_sorted())
}

/// Sort a term's postings by document and refuse a document that appears twice.
fn check_unique(term: &str, postings: &mut [RawPosting]) -> Result<()> {
    postings.sort_by_key(|p| p.doc_id);
    if let Some(pair) = postings.windows(2).find(|w| w[0].doc_id == w[1].doc_id) {
        let doc_id = pair[0].doc_id;
        tracing::error!(term, doc_id, "duplicate posting across partial indexes");
        return Err(IndexError::DuplicatePosting { term: term.to_string(), doc_id }.into());
    }
    Ok(())
}

/// Rewrite one raw shard as TF-IDF. Loading refuses a shard that is already scored.
fn score_shard(paths: &IndexPaths, key: ShardKey, idf_table: &InverseDocumentFrequency) -> Result<()> {
    let path = paths.shard(key);
    let raw = load_terms::<RawPosting>(&path)?;
    let mut scored: BTreeMap<String, Vec<ScoredPosting>> = BTreeMap::new();
    for (term, mut postings) in raw.terms {
        check_unique(&term, &mut postings)?;
        let idf = idf_table.get(&term).copied().unwrap_or(0.0);
        scored.insert(term, postings.into_iter().map(|p| p.into_scored(idf)).collect());
    }
    save_terms(&path, scored)
}

pub struct IndexMerger<'a> {
    paths: &'a IndexPaths,
    df: HashMap<String, u32>,
    report: MergeReport,
}

impl<'a> IndexMerger<'a> {
    pub fn new(paths: &'a IndexPaths) -> Self {
        Self { paths, df: HashMap::new(), report: MergeReport::default() }
    }

    pub fn run(mut self) -> Result<MergeReport> {
        let mapping = load_doc_mapping(self.paths)?;
        self.report.total_docs = mapping.len() as u32;
        self.init_shards()?;

        let partials = self.paths.partials()?;
        tracing::info!(partials = partials.len(), total_docs = self.report.total_docs, "merging partial indexes");
        for path in &partials {
            let partial = match load_terms::<RawPosting>(path) {
                Ok(p) => p,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "skipping partial index");
                    self.report.partials_failed += 1;
                    continue;
                }
            };
            for (term, postings) in &partial.terms {
                *self.df.entry(term.clone()).or_insert(0) += postings.len() as u32;
            }
            let groups = group_by_shard(partial.terms);
            groups
                .into_par_iter()
                .try_for_each(|(key, terms)| append_to_shard(self.paths, key, terms))
                .with_context(|| format!("merging {}", path.display()))?;
            self.report.partials_merged += 1;
            tracing::debug!(path = %path.display(), "merged partial index");
        }

        let (df, idf_table) = self.frequency_tables();
        save_json(&self.paths.df(), &df)?;
        save_json(&self.paths.idf(), &idf_table)?;

        let keys: Vec<ShardKey> = ShardKey::all().collect();
        keys.par_iter().try_for_each(|&key| score_shard(self.paths, key, &idf_table))?;

        self.report.terms = df.len();
        self.report.postings = df.values().map(|&n| n as usize).sum();
        tracing::info!(
            merged = self.report.partials_merged,
            failed = self.report.partials_failed,
            terms = self.report.terms,
            postings = self.report.postings,
            "merge complete"
        );
        Ok(self.report)
    }

    /// Start every bucket, including ones that will stay empty, from an empty raw shard.
    fn init_shards(&self) -> Result<()> {
        let dir = self.paths.final_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir).with_context(|| format!("clearing {}", dir.display()))?;
        }
        fs::create_dir_all(&dir)?;
        for key in ShardKey::all() {
            save_terms::<RawPosting>(&self.paths.shard(key), BTreeMap::new())?;
        }
        Ok(())
    }

    fn frequency_tables(&self) -> (DocumentFrequency, InverseDocumentFrequency) {
        let df: DocumentFrequency = self.df.iter().map(|(t, &n)| (t.clone(), n)).collect();
        let idf_table = df.iter().map(|(t, &n)| (t.clone(), idf(self.report.total_docs, n))).collect();
        (df, idf_table)
    }
}

/// Build entry point for the merge stage.
pub fn merge_partial_indexes(paths: &IndexPaths) -> Result<MergeReport> {
    IndexMerger::new(paths).run()
}

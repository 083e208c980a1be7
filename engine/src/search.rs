//! Query-time ranking over the compiled index.
//!
//! A [`QuerySession`] is loaded once from disk and never mutated; any number of
//! [`QueryEngine`]s may borrow it concurrently, each opening its own file handles.
//! Republishing an index means building a new session and swapping it in.

use crate::config::{SearchConfig, StopWordPolicy};
use crate::error::IndexError;
use crate::index::DocId;
use crate::offsets::{load_offset_maps, FlatReader, OffsetMap};
use crate::persist::{load_analysis, load_doc_mapping, load_pagerank, DocumentMapping, IndexPaths, PageRankScores};
use crate::shard::ShardKey;
use crate::tokenizer::stem_query;
use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub url: String,
    pub title: String,
    pub score: f64,
}

/// Immutable serving state: document mapping, offset maps, PageRank scores.
pub struct QuerySession {
    paths: IndexPaths,
    /// Stop-word policy recorded by the build; query terms are filtered the same way.
    stop_words: StopWordPolicy,
    mapping: DocumentMapping,
    offsets: BTreeMap<ShardKey, OffsetMap>,
    pagerank: PageRankScores,
    config: SearchConfig,
}

impl QuerySession {
    /// Missing document mapping, analysis settings or offset maps are fatal;
    /// missing PageRank scores count as zero.
    pub fn open<P: AsRef<Path>>(root: P, config: SearchConfig) -> Result<Self> {
        let paths = IndexPaths::new(root);
        let mapping = load_doc_mapping(&paths)?;
        let stop_words = load_analysis(&paths)?.stop_words;
        let offsets = load_offset_maps(&paths)?;
        let pagerank = if paths.pagerank().is_file() {
            load_pagerank(&paths)?
        } else {
            tracing::warn!(root = %paths.root.display(), "no pagerank scores, ranking by text only");
            PageRankScores::new()
        };
        tracing::info!(docs = mapping.len(), terms = offsets.values().map(|m| m.len()).sum::<usize>(), "query session loaded");
        Ok(Self { paths, stop_words, mapping, offsets, pagerank, config })
    }

    pub fn num_docs(&self) -> usize { self.mapping.len() }

    pub fn url(&self, doc_id: DocId) -> Option<&str> { self.mapping.get(&doc_id).map(String::as_str) }

    pub fn pagerank(&self, doc_id: DocId) -> f64 { self.pagerank.get(&doc_id).copied().unwrap_or(0.0) }

    pub fn config(&self) -> &SearchConfig { &self.config }

    /// Run a query without a deadline.
    pub fn search<S: AsRef<str>>(&self, terms: &[S], limit: usize) -> Result<Vec<SearchHit>> {
        QueryEngine::new(self).search(terms, limit)
    }
}

/// Smallest gap between any position in `a` and any position in `b`; both must be sorted.
pub fn min_distance(a: &[u32], b: &[u32]) -> Option<u32> {
    let (mut i, mut j) = (0, 0);
    let mut best: Option<u32> = None;
    while i < a.len() && j < b.len() {
        let d = a[i].abs_diff(b[j]);
        best = Some(best.map_or(d, |x| x.min(d)));
        if a[i] < b[j] { i += 1 } else { j += 1 }
    }
    best
}

/// `2 / (1 + distance)`: 2 for adjacent-at-zero, tending to 0 as terms drift apart.
pub fn proximity_bonus(avg_distance: f64) -> f64 { 2.0 / (1.0 + avg_distance) }

/// Last path segment of the URL, or the whole URL when that segment is empty.
pub fn title_for(url: &str) -> String {
    match url.rsplit('/').next() {
        Some(seg) if !seg.is_empty() => seg.to_string(),
        _ => url.to_string(),
    }
}

pub struct QueryEngine<'s> {
    session: &'s QuerySession,
    deadline: Option<Instant>,
}

impl<'s> QueryEngine<'s> {
    pub fn new(session: &'s QuerySession) -> Self {
        Self { session, deadline: None }
    }

    /// Fail with [`IndexError::DeadlineExceeded`] once `deadline` passes.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn check_deadline(&self) -> Result<()> {
        match self.deadline {
            Some(d) if Instant::now() >= d => Err(IndexError::DeadlineExceeded.into()),
            _ => Ok(()),
        }
    }

    /// Distinct stems of the query, ordered by shard so each flat file is opened once.
    fn stems<S: AsRef<str>>(&self, terms: &[S]) -> Vec<(ShardKey, String)> {
        let policy = self.session.stop_words;
        let distinct: BTreeSet<(ShardKey, String)> = terms
            .iter()
            .flat_map(|t| stem_query(t.as_ref(), policy))
            .map(|s| (ShardKey::for_term(&s), s))
            .collect();
        distinct.into_iter().collect()
    }

    pub fn search<S: AsRef<str>>(&self, terms: &[S], limit: usize) -> Result<Vec<SearchHit>> {
        let stems = self.stems(terms);
        if stems.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut scores: HashMap<DocId, f64> = HashMap::new();
        // doc -> (stem index -> positions)
        let mut hits: HashMap<DocId, HashMap<usize, Vec<u32>>> = HashMap::new();

        let mut open: Option<(ShardKey, FlatReader)> = None;
        for (idx, (key, stem)) in stems.iter().enumerate() {
            self.check_deadline()?;
            let Some(at) = self.session.offsets.get(key).and_then(|m| m.get(stem)).copied() else { continue };
            if open.as_ref().map(|(k, _)| k) != Some(key) {
                open = Some((*key, FlatReader::open(&self.session.paths, *key)?));
            }
            let Some((_, reader)) = open.as_mut() else { continue };
            for p in reader.postings(at)? {
                *scores.entry(p.doc_id).or_insert(0.0) += p.score;
                hits.entry(p.doc_id).or_default().insert(idx, p.positions);
            }
        }

        if stems.len() >= 2 {
            self.add_proximity(stems.len(), &hits, &mut scores)?;
        }
        for (doc_id, score) in scores.iter_mut() {
            *score += self.session.pagerank(*doc_id);
        }

        let mut ranked: Vec<(DocId, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        Ok(self.collect_hits(ranked, limit))
    }

    fn add_proximity(
        &self,
        n_terms: usize,
        hits: &HashMap<DocId, HashMap<usize, Vec<u32>>>,
        scores: &mut HashMap<DocId, f64>,
    ) -> Result<()> {
        for (doc_id, by_term) in hits {
            if by_term.len() < n_terms {
                continue;
            }
            self.check_deadline()?;
            let mut total = 0u64;
            let mut pairs = 0u64;
            for a in 0..n_terms {
                for b in a + 1..n_terms {
                    if let Some(d) = min_distance(&by_term[&a], &by_term[&b]) {
                        total += d as u64;
                        pairs += 1;
                    }
                }
            }
            if pairs > 0 {
                let avg = total as f64 / pairs as f64;
                *scores.entry(*doc_id).or_insert(0.0) += proximity_bonus(avg);
            }
        }
        Ok(())
    }

    fn keep(&self, url: &str) -> bool {
        let cfg = &self.session.config;
        if !cfg.filter_non_content {
            return true;
        }
        let lower = url.to_lowercase();
        if cfg.drop_query_urls && lower.contains('?') {
            return false;
        }
        !cfg.excluded_extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
    }

    fn collect_hits(&self, ranked: Vec<(DocId, f64)>, limit: usize) -> Vec<SearchHit> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut out = Vec::new();
        for (doc_id, score) in ranked {
            let Some(url) = self.session.url(doc_id) else {
                tracing::warn!(doc_id, "posting refers to an unmapped document");
                continue;
            };
            if !self.keep(url) || !seen.insert(url) {
                continue;
            }
            out.push(SearchHit { doc_id, url: url.to_string(), title: title_for(url), score });
            if out.len() == limit {
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ScoredPosting;
    use crate::offsets::write_flat;
    use crate::persist::{save_analysis, save_doc_mapping, save_json, save_pagerank, AnalysisFile};
    use tempfile::tempdir;

    fn p(doc_id: u32, score: f64, positions: &[u32]) -> ScoredPosting {
        ScoredPosting { doc_id, score, positions: positions.to_vec() }
    }

    /// Writes flat files and offset maps directly, one per bucket.
    fn index(dir: &Path, urls: &[(DocId, &str)], terms: &[(&str, Vec<ScoredPosting>)], pagerank: &[(DocId, f64)]) -> IndexPaths {
        let paths = IndexPaths::new(dir);
        std::fs::create_dir_all(paths.final_dir()).unwrap();
        save_doc_mapping(&paths, &urls.iter().map(|(d, u)| (*d, u.to_string())).collect()).unwrap();
        save_analysis(&paths, &AnalysisFile { stop_words: StopWordPolicy::Exclude }).unwrap();
        for key in ShardKey::all() {
            let shard: BTreeMap<String, Vec<ScoredPosting>> = terms
                .iter()
                .filter(|(t, _)| ShardKey::for_term(t) == key)
                .map(|(t, ps)| (t.to_string(), ps.clone()))
                .collect();
            let offsets = write_flat(&paths.flat(key), &shard).unwrap();
            save_json(&paths.offsets(key), &offsets).unwrap();
        }
        if !pagerank.is_empty() {
            save_pagerank(&paths, &pagerank.iter().copied().collect()).unwrap();
        }
        paths
    }

    #[test]
    fn min_distance_is_symmetric() {
        assert_eq!(min_distance(&[3, 10], &[4, 20]), Some(1));
        assert_eq!(min_distance(&[4, 20], &[3, 10]), Some(1));
        assert_eq!(min_distance(&[1, 50, 90], &[60]), Some(10));
        assert_eq!(min_distance(&[], &[1]), None);
    }

    #[test]
    fn bonus_is_bounded() {
        assert_eq!(proximity_bonus(0.0), 2.0);
        assert_eq!(proximity_bonus(1.0), 1.0);
        assert!(proximity_bonus(1e9) > 0.0 && proximity_bonus(1e9) < 1e-8);
    }

    #[test]
    fn titles_fall_back_to_url() {
        assert_eq!(title_for("https://s.org/docs/intro.html"), "intro.html");
        assert_eq!(title_for("https://s.org/docs/"), "https://s.org/docs/");
    }

    #[test]
    fn proximity_bonus_is_added_for_cooccurring_terms() {
        let dir = tempdir().unwrap();
        index(
            dir.path(),
            &[(5, "https://s.org/five"), (6, "https://s.org/six")],
            &[("cat", vec![p(5, 0.25, &[3, 10]), p(6, 0.5, &[0])]), ("dog", vec![p(5, 0.25, &[4, 20])])],
            &[],
        );
        let session = QuerySession::open(dir.path(), SearchConfig::default()).unwrap();
        let hits = session.search(&["cats", "dog"], 10).unwrap();
        assert_eq!(hits[0].doc_id, 5);
        assert!((hits[0].score - (0.5 + 1.0)).abs() < 1e-12);
        assert_eq!(hits[1].doc_id, 6);
        assert!((hits[1].score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn proximity_averages_every_term_pair() {
        let dir = tempdir().unwrap();
        index(
            dir.path(),
            &[(7, "https://s.org/seven")],
            &[
                ("cat", vec![p(7, 0.1, &[0])]),
                ("dog", vec![p(7, 0.1, &[2])]),
                ("bird", vec![p(7, 0.1, &[10])]),
            ],
            &[],
        );
        let session = QuerySession::open(dir.path(), SearchConfig::default()).unwrap();
        let hits = session.search(&["cat", "dog", "bird"], 10).unwrap();
        // pairwise minimums 2, 10, 8 -> average 20/3
        let expected = 0.3 + proximity_bonus(20.0 / 3.0);
        assert!((hits[0].score - expected).abs() < 1e-12);
        assert!((proximity_bonus(20.0 / 3.0) - 6.0 / 23.0).abs() < 1e-12);

        // a document missing one of the terms gets no bonus
        let hits = session.search(&["cat", "dog", "fish"], 10).unwrap();
        assert!((hits[0].score - 0.2).abs() < 1e-12);
    }

    #[test]
    fn documents_sharing_a_url_are_returned_once() {
        let dir = tempdir().unwrap();
        index(
            dir.path(),
            &[(1, "https://s.org/same"), (2, "https://s.org/same"), (3, "https://s.org/other")],
            &[("rust", vec![p(1, 0.2, &[0]), p(2, 0.7, &[0]), p(3, 0.5, &[0])])],
            &[],
        );
        let session = QuerySession::open(dir.path(), SearchConfig::default()).unwrap();
        let hits = session.search(&["rust"], 10).unwrap();
        assert_eq!(hits.iter().map(|h| h.doc_id).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(hits[0].url, "https://s.org/same");
    }

    #[test]
    fn pagerank_is_blended_and_unknown_terms_are_ignored() {
        let dir = tempdir().unwrap();
        index(
            dir.path(),
            &[(1, "https://s.org/a"), (2, "https://s.org/b")],
            &[("rust", vec![p(1, 0.3, &[0]), p(2, 0.2, &[0])])],
            &[(1, 0.1), (2, 0.4)],
        );
        let session = QuerySession::open(dir.path(), SearchConfig::default()).unwrap();
        let hits = session.search(&["rust", "zyzzyva"], 10).unwrap();
        assert_eq!(hits.iter().map(|h| h.doc_id).collect::<Vec<_>>(), vec![2, 1]);
        assert!(session.search(&["zyzzyva"], 10).unwrap().is_empty());
        assert!(session.search::<&str>(&[], 10).unwrap().is_empty());
    }

    #[test]
    fn non_content_urls_are_filtered_and_limit_applies() {
        let dir = tempdir().unwrap();
        index(
            dir.path(),
            &[(1, "https://s.org/paper.PDF"), (2, "https://s.org/page?id=2"), (3, "https://s.org/x"), (4, "https://s.org/y")],
            &[("rust", vec![p(1, 0.9, &[0]), p(2, 0.8, &[0]), p(3, 0.7, &[0]), p(4, 0.6, &[0])])],
            &[],
        );
        let session = QuerySession::open(dir.path(), SearchConfig::default()).unwrap();
        let hits = session.search(&["rust"], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://s.org/x");
        assert_eq!(hits[0].title, "x");

        let unfiltered = SearchConfig { filter_non_content: false, ..SearchConfig::default() };
        let session = QuerySession::open(dir.path(), unfiltered).unwrap();
        assert_eq!(session.search(&["rust"], 10).unwrap().len(), 4);
    }

    #[test]
    fn missing_offset_maps_are_fatal() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        save_doc_mapping(&paths, &DocumentMapping::new()).unwrap();
        let err = QuerySession::open(dir.path(), SearchConfig::default()).err().unwrap();
        assert!(matches!(err.downcast_ref::<IndexError>(), Some(IndexError::MissingFile(_))));
    }

    #[test]
    fn expired_deadline_aborts_the_query() {
        let dir = tempdir().unwrap();
        index(dir.path(), &[(1, "https://s.org/a")], &[("rust", vec![p(1, 0.3, &[0])])], &[]);
        let session = QuerySession::open(dir.path(), SearchConfig::default()).unwrap();
        let err = QueryEngine::new(&session).with_deadline(Instant::now()).search(&["rust"], 10).unwrap_err();
        assert!(matches!(err.downcast_ref::<IndexError>(), Some(IndexError::DeadlineExceeded)));
    }
}

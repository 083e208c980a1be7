use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub type DocId = u32;

/// Build-phase posting: `weight` is the accumulated structural weight of the term in one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(DocId, f64, Vec<u32>)", into = "(DocId, f64, Vec<u32>)")]
pub struct RawPosting {
    pub doc_id: DocId,
    pub weight: f64,
    pub positions: Vec<u32>,
}

/// Serve-phase posting: `score` is the TF-IDF value computed by the merger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(DocId, f64, Vec<u32>)", into = "(DocId, f64, Vec<u32>)")]
pub struct ScoredPosting {
    pub doc_id: DocId,
    pub score: f64,
    pub positions: Vec<u32>,
}

impl RawPosting {
    /// The single transition from raw weight to TF-IDF.
    ///
    /// `tf_idf = (1 + log10(weight)) * idf` for positive weights, `0` otherwise.
    /// Consuming `self` means a posting can only be converted once.
    pub fn into_scored(self, idf: f64) -> ScoredPosting {
        ScoredPosting { doc_id: self.doc_id, score: tf_idf(self.weight, idf), positions: self.positions }
    }
}

pub fn tf_idf(weight: f64, idf: f64) -> f64 {
    if weight > 0.0 { (1.0 + weight.log10()) * idf } else { 0.0 }
}

/// `log10(total_docs / df)`, or `0` when the term has no postings.
pub fn idf(total_docs: u32, df: u32) -> f64 {
    if df == 0 || total_docs == 0 {
        return 0.0;
    }
    (total_docs as f64 / df as f64).log10()
}

impl From<(DocId, f64, Vec<u32>)> for RawPosting {
    fn from((doc_id, weight, positions): (DocId, f64, Vec<u32>)) -> Self {
        Self { doc_id, weight, positions }
    }
}

impl From<RawPosting> for (DocId, f64, Vec<u32>) {
    fn from(p: RawPosting) -> Self { (p.doc_id, p.weight, p.positions) }
}

impl From<(DocId, f64, Vec<u32>)> for ScoredPosting {
    fn from((doc_id, score, positions): (DocId, f64, Vec<u32>)) -> Self {
        Self { doc_id, score, positions }
    }
}

impl From<ScoredPosting> for (DocId, f64, Vec<u32>) {
    fn from(p: ScoredPosting) -> Self { (p.doc_id, p.score, p.positions) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Raw,
    Scored,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Raw => f.write_str("raw"),
            Phase::Scored => f.write_str("scored"),
        }
    }
}

/// Posting types that may appear in a persisted term file.
pub trait PhasedPosting: Clone {
    const PHASE: Phase;
    fn doc_id(&self) -> DocId;
}

impl PhasedPosting for RawPosting {
    const PHASE: Phase = Phase::Raw;
    fn doc_id(&self) -> DocId { self.doc_id }
}

impl PhasedPosting for ScoredPosting {
    const PHASE: Phase = Phase::Scored;
    fn doc_id(&self) -> DocId { self.doc_id }
}

/// On-disk shape of partial indexes and final shards: a phase tag plus `term -> postings`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TermFile<P> {
    pub phase: Phase,
    pub terms: BTreeMap<String, Vec<P>>,
}

impl<P: PhasedPosting> TermFile<P> {
    pub fn new(terms: BTreeMap<String, Vec<P>>) -> Self {
        Self { phase: P::PHASE, terms }
    }
}

/// Append-only postings table: one contiguous `Vec` per term, addressed through a
/// `term -> slot` map so growing a term never reallocates the others.
#[derive(Debug)]
pub struct TermTable<P> {
    slots: HashMap<String, usize>,
    terms: Vec<String>,
    postings: Vec<Vec<P>>,
}

impl<P> Default for TermTable<P> {
    fn default() -> Self {
        Self { slots: HashMap::new(), terms: Vec::new(), postings: Vec::new() }
    }
}

impl<P> TermTable<P> {
    pub fn new() -> Self { Self::default() }

    fn slot(&mut self, term: &str) -> usize {
        if let Some(&slot) = self.slots.get(term) {
            return slot;
        }
        let slot = self.terms.len();
        self.slots.insert(term.to_string(), slot);
        self.terms.push(term.to_string());
        self.postings.push(Vec::new());
        slot
    }

    pub fn push(&mut self, term: &str, posting: P) {
        let slot = self.slot(term);
        self.postings[slot].push(posting);
    }

    pub fn extend<I: IntoIterator<Item = P>>(&mut self, term: &str, postings: I) {
        let slot = self.slot(term);
        self.postings[slot].extend(postings);
    }

    pub fn len(&self) -> usize { self.terms.len() }

    pub fn is_empty(&self) -> bool { self.terms.is_empty() }

    pub fn posting_count(&self) -> usize { self.postings.iter().map(Vec::len).sum() }

    /// Drain into a term-sorted map, ready to persist.
    pub fn into_sorted(self) -> BTreeMap<String, Vec<P>> {
        self.terms.into_iter().zip(self.postings).collect()
    }
}

impl<P> From<BTreeMap<String, Vec<P>>> for TermTable<P> {
    fn from(map: BTreeMap<String, Vec<P>>) -> Self {
        let mut table = Self::new();
        for (term, postings) in map {
            table.extend(&term, postings);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idf_and_tf_idf_match_reference_values() {
        let idf_cat = idf(3, 2);
        assert!((idf_cat - 0.176_091).abs() < 1e-5);
        assert!((tf_idf(4.0, idf_cat) - 0.282_106).abs() < 1e-5);
        assert!((tf_idf(1.0, idf_cat) - idf_cat).abs() < 1e-12);
        assert_eq!(tf_idf(0.0, idf_cat), 0.0);
        assert_eq!(idf(3, 0), 0.0);
    }

    #[test]
    fn postings_serialize_as_triples() {
        let p = RawPosting { doc_id: 7, weight: 2.5, positions: vec![1, 4] };
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "[7,2.5,[1,4]]");
        let back: ScoredPosting = serde_json::from_str(&json).unwrap();
        assert_eq!(back.score, 2.5);
    }

    #[test]
    fn term_file_records_phase() {
        let mut terms = BTreeMap::new();
        terms.insert("cat".to_string(), vec![ScoredPosting { doc_id: 1, score: 0.5, positions: vec![0] }]);
        let json = serde_json::to_value(TermFile::new(terms)).unwrap();
        assert_eq!(json["phase"], "scored");
    }

    #[test]
    fn term_table_appends_per_term() {
        let mut table = TermTable::new();
        table.push("b", 1u32);
        table.push("a", 2);
        table.extend("b", [3, 4]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.posting_count(), 4);
        let sorted = table.into_sorted();
        assert_eq!(sorted.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(sorted["b"], vec![1, 3, 4]);
    }
}

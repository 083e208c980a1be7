use crate::config::{BuildConfig, FieldWeights, StopWordPolicy};
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use scraper::{Html, Selector};
use std::collections::{BTreeMap, HashSet};
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref RE: Regex = Regex::new(r"[\p{L}\p{N}]+").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref TITLE: Selector = Selector::parse("title").expect("valid selector");
    static ref H1: Selector = Selector::parse("h1").expect("valid selector");
    static ref H2: Selector = Selector::parse("h2").expect("valid selector");
    static ref H3: Selector = Selector::parse("h3").expect("valid selector");
    static ref BOLD: Selector = Selector::parse("b, strong").expect("valid selector");
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","cannot","could",
            "did","do","does","doing","down","during",
            "each","few","for","from","further",
            "had","has","have","having","he","her","here","hers","herself","him","himself","his","how",
            "i","if","in","into","is","it","its","itself",
            "me","more","most","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","should","so","some","such",
            "than","that","the","their","theirs","them","themselves","then","there","these","they","this","those","through","to","too",
            "under","until","up","very",
            "was","we","were","what","when","where","which","while","who","whom","why","with","would",
            "you","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

/// Elements whose text never reaches the index.
const SKIPPED_TAGS: &[&str] = &["script", "style", "nav", "footer", "form", "noscript", "template"];

pub fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

pub fn stem(token: &str) -> String { STEMMER.stem(token).into_owned() }

/// NFKC-normalized, lowercased alphanumeric tokens, unstemmed.
pub fn words(text: &str) -> Vec<String> {
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    RE.find_iter(&normalized).map(|m| m.as_str().to_string()).collect()
}

/// Tokenize text into (stem, position), dropping stop words but keeping their positions.
pub fn tokenize(text: &str) -> Vec<(String, usize)> {
    words(text)
        .into_iter()
        .enumerate()
        .filter(|(_, token)| !is_stopword(token))
        .map(|(pos, token)| (stem(&token), pos))
        .collect()
}

/// Stem a single query term the same way document tokens are stemmed.
/// A term that normalizes to several tokens yields several stems.
pub fn stem_query(term: &str, policy: StopWordPolicy) -> Vec<String> {
    words(term)
        .into_iter()
        .filter(|t| policy == StopWordPolicy::BaseWeight || !is_stopword(t))
        .map(|t| stem(&t))
        .collect()
}

/// Visible text of a page with non-content elements removed.
pub fn main_text(doc: &Html) -> String {
    let mut out = String::new();
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else { continue };
        let skipped = node
            .ancestors()
            .any(|a| a.value().as_element().map_or(false, |e| SKIPPED_TAGS.contains(&e.name())));
        if skipped {
            continue;
        }
        out.push_str(text);
        out.push(' ');
    }
    out
}

/// Accumulated weight and ordered token positions of one term in one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermHits {
    pub weight: f64,
    pub positions: Vec<u32>,
}

#[derive(Debug, Default)]
struct StructuralSets {
    title: HashSet<String>,
    h1: HashSet<String>,
    h2: HashSet<String>,
    h3: HashSet<String>,
    bold: HashSet<String>,
}

impl StructuralSets {
    fn extract(doc: &Html) -> Self {
        let collect = |sel: &Selector| -> HashSet<String> {
            doc.select(sel)
                .flat_map(|el| el.text())
                .flat_map(|t| words(t))
                .map(|w| stem(&w))
                .collect()
        };
        Self {
            title: collect(&*TITLE),
            h1: collect(&*H1),
            h2: collect(&*H2),
            h3: collect(&*H3),
            bold: collect(&*BOLD),
        }
    }

    fn boost(&self, stem: &str, w: &FieldWeights) -> f64 {
        [(&self.title, w.title), (&self.h1, w.h1), (&self.h2, w.h2), (&self.h3, w.h3), (&self.bold, w.bold)]
            .iter()
            .filter(|(set, _)| set.contains(stem))
            .map(|(_, weight)| *weight)
            .fold(0.0, f64::max)
    }
}

/// Turns a parsed page into `stem -> (weight, positions)`.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    weights: FieldWeights,
    policy: StopWordPolicy,
}

impl Tokenizer {
    pub fn new(cfg: &BuildConfig) -> Self {
        Self { weights: cfg.field_weights.clone(), policy: cfg.stop_words }
    }

    /// Weigh every token of `text` (the page's main text, see [`main_text`]).
    pub fn weigh(&self, doc: &Html, text: &str) -> BTreeMap<String, TermHits> {
        let sets = StructuralSets::extract(doc);
        let mut terms: BTreeMap<String, TermHits> = BTreeMap::new();
        for (pos, token) in words(text).into_iter().enumerate() {
            let stop = is_stopword(&token);
            if stop && self.policy == StopWordPolicy::Exclude {
                continue;
            }
            let stemmed = stem(&token);
            let boost = if stop { 0.0 } else { sets.boost(&stemmed, &self.weights) };
            let hits = terms.entry(stemmed).or_default();
            hits.weight += self.weights.base + boost;
            hits.positions.push(pos as u32);
        }
        terms
    }
}

use lazy_static::lazy_static;
use scraper::{Html, Selector};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use url::Url;

use crate::index::DocId;

lazy_static! {
    static ref ANCHOR: Selector = Selector::parse("a[href]").expect("valid selector");
}

/// doc_id -> outbound doc_ids.
pub type LinkGraph = BTreeMap<DocId, BTreeSet<DocId>>;

/// Canonical string form used to compare link targets with indexed URLs.
pub fn normalize(url: &str) -> Option<String> {
    Url::parse(url.trim()).ok().map(|u| u.to_string())
}

/// Absolute http(s) targets of every anchor in the page, resolved against `base`.
/// Targets carrying a fragment are dropped.
pub fn extract_links(doc: &Html, base: &str) -> Vec<String> {
    let Ok(base) = Url::parse(base) else { return Vec::new() };
    let mut out = Vec::new();
    for a in doc.select(&ANCHOR) {
        let Some(href) = a.value().attr("href") else { continue };
        let Ok(target) = base.join(href.trim()) else { continue };
        if !target.scheme().starts_with("http") || target.fragment().is_some() {
            continue;
        }
        out.push(target.to_string());
    }
    out
}

/// Resolves outbound URLs to document ids.
pub struct LinkResolver {
    by_url: HashMap<String, DocId>,
}

impl LinkResolver {
    pub fn new<'a, I: IntoIterator<Item = (DocId, &'a str)>>(mapping: I) -> Self {
        let mut by_url = HashMap::new();
        for (doc_id, url) in mapping {
            if let Some(key) = normalize(url) {
                by_url.entry(key).or_insert(doc_id);
            }
        }
        Self { by_url }
    }

    pub fn resolve(&self, url: &str) -> Option<DocId> {
        normalize(url).and_then(|key| self.by_url.get(&key).copied())
    }

    /// Build the graph: every document is a node, unresolved targets and self-links are dropped.
    pub fn graph<'a, I>(&self, outbound: I) -> LinkGraph
    where
        I: IntoIterator<Item = (DocId, &'a [String])>,
    {
        let mut graph = LinkGraph::new();
        for (doc_id, urls) in outbound {
            let edges = graph.entry(doc_id).or_default();
            edges.extend(urls.iter().filter_map(|u| self.resolve(u)).filter(|&target| target != doc_id));
        }
        graph
    }
}

//! Static document importance from the link graph, by power iteration.
//!
//! Each iteration computes, for every node,
//! `(1-d)/N + d*dangling/N + d * sum(PR(u)/outdeg(u))` over its inbound edges,
//! reading only the previous iteration's ranks. The update is parallel across
//! nodes; iterations are sequential.

use crate::config::PageRankConfig;
use crate::index::DocId;
use crate::links::LinkGraph;
use crate::persist::{load_links, save_pagerank, IndexPaths, PageRankScores};
use anyhow::Result;
use rayon::prelude::*;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct PageRankOutcome {
    pub scores: PageRankScores,
    pub iterations: usize,
    /// False when the iteration cap was hit first; the scores are still usable.
    pub converged: bool,
    /// L1 change of the last iteration.
    pub delta: f64,
}

/// Strip self-loops and make every link target a node of its own.
pub fn prepare(graph: &LinkGraph) -> LinkGraph {
    let mut out = LinkGraph::new();
    for (&doc, targets) in graph {
        out.entry(doc).or_default().extend(targets.iter().copied().filter(|&t| t != doc));
        for &t in targets {
            out.entry(t).or_default();
        }
    }
    out
}

pub fn compute_pagerank(graph: &LinkGraph, cfg: &PageRankConfig) -> PageRankOutcome {
    let graph = prepare(graph);
    let nodes: Vec<DocId> = graph.keys().copied().collect();
    let n = nodes.len();
    if n == 0 {
        return PageRankOutcome { scores: PageRankScores::new(), iterations: 0, converged: true, delta: 0.0 };
    }
    let index: HashMap<DocId, usize> = nodes.iter().enumerate().map(|(i, &d)| (d, i)).collect();

    let out_degree: Vec<usize> = graph.values().map(|t| t.len()).collect();
    let mut inbound: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (src, targets) in graph.values().enumerate() {
        for t in targets {
            inbound[index[t]].push(src);
        }
    }
    let dangling: Vec<usize> = (0..n).filter(|&i| out_degree[i] == 0).collect();

    let d = cfg.damping;
    let nf = n as f64;
    let mut ranks = vec![1.0 / nf; n];
    let mut iterations = 0;
    let mut delta = f64::INFINITY;

    while iterations < cfg.max_iterations {
        let dangling_sum: f64 = dangling.iter().map(|&i| ranks[i]).sum();
        let base = (1.0 - d) / nf + d * dangling_sum / nf;
        let prev = &ranks;
        let next: Vec<f64> = (0..n)
            .into_par_iter()
            .map(|i| base + d * inbound[i].iter().map(|&u| prev[u] / out_degree[u] as f64).sum::<f64>())
            .collect();
        delta = next.iter().zip(&ranks).map(|(a, b)| (a - b).abs()).sum();
        ranks = next;
        iterations += 1;
        if delta < cfg.tolerance {
            break;
        }
    }

    let converged = delta < cfg.tolerance;
    if !converged {
        tracing::warn!(iterations, delta, "pagerank stopped at the iteration cap");
    }
    PageRankOutcome { scores: nodes.into_iter().zip(ranks).collect(), iterations, converged, delta }
}

/// Build entry point: read the link graph, solve, persist the scores.
pub fn run_pagerank(paths: &IndexPaths, cfg: &PageRankConfig) -> Result<PageRankOutcome> {
    let graph = load_links(paths)?;
    let outcome = compute_pagerank(&graph, cfg);
    save_pagerank(paths, &outcome.scores)?;
    tracing::info!(nodes = outcome.scores.len(), iterations = outcome.iterations, converged = outcome.converged, "pagerank computed");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn graph(edges: &[(DocId, &[DocId])]) -> LinkGraph {
        edges.iter().map(|(d, t)| (*d, t.iter().copied().collect::<BTreeSet<_>>())).collect()
    }

    fn total(scores: &PageRankScores) -> f64 { scores.values().sum() }

    #[test]
    fn dangling_graph_ranks_node_one_highest() {
        let g = graph(&[(1, &[2, 3]), (2, &[]), (3, &[1])]);
        let out = compute_pagerank(&g, &PageRankConfig::default());
        assert!(out.converged);
        assert!((total(&out.scores) - 1.0).abs() < 1e-6);
        assert!(out.scores[&1] > out.scores[&2]);
        assert!(out.scores[&1] > out.scores[&3]);
        assert!((out.scores[&2] - out.scores[&3]).abs() < 1e-6);
    }

    #[test]
    fn self_loops_earn_nothing() {
        let with_loop = compute_pagerank(&graph(&[(1, &[1, 2]), (2, &[1])]), &PageRankConfig::default());
        let without = compute_pagerank(&graph(&[(1, &[2]), (2, &[1])]), &PageRankConfig::default());
        assert!((with_loop.scores[&1] - without.scores[&1]).abs() < 1e-9);
    }

    #[test]
    fn missing_targets_become_dangling_nodes() {
        let prepared = prepare(&graph(&[(1, &[5])]));
        assert!(prepared[&5].is_empty());
        let out = compute_pagerank(&graph(&[(1, &[5])]), &PageRankConfig::default());
        assert_eq!(out.scores.len(), 2);
        assert!(out.scores[&5] > out.scores[&1]);
    }

    #[test]
    fn iteration_cap_returns_best_effort_ranks() {
        let cfg = PageRankConfig { max_iterations: 2, tolerance: 0.0, ..PageRankConfig::default() };
        let out = compute_pagerank(&graph(&[(1, &[2]), (2, &[3]), (3, &[])]), &cfg);
        assert_eq!(out.iterations, 2);
        assert!(!out.converged);
        assert!(out.scores.values().all(|&s| s >= 0.0));
        assert!((total(&out.scores) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_graph_is_empty() {
        let out = compute_pagerank(&LinkGraph::new(), &PageRankConfig::default());
        assert!(out.scores.is_empty());
    }
}

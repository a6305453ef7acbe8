use std::collections::{BTreeMap, BTreeSet};

const DAMPING: f64 = 0.85;
const TOLERANCE: f64 = 1e-6;
const MAX_ITERATIONS: usize = 100;
const SCORE_SCALE: f64 = 10_000.0;

/// Directed weighted link graph over document paths, rebuilt from scratch
/// each scheduling pass. `BTreeMap` keying keeps iteration (and therefore
/// floating-point accumulation) deterministic across runs.
#[derive(Clone, Debug, Default)]
pub struct LinkGraph {
    nodes: BTreeSet<String>,
    edges: BTreeMap<String, BTreeMap<String, f64>>,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a weighted edge. Self-links are dropped; repeated links between
    /// the same pair accumulate weight.
    pub fn link(&mut self, source: &str, target: &str, weight: f64) {
        if source == target || weight <= 0.0 {
            return;
        }
        self.nodes.insert(source.to_string());
        self.nodes.insert(target.to_string());
        *self
            .edges
            .entry(source.to_string())
            .or_default()
            .entry(target.to_string())
            .or_insert(0.0) += weight;
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Stationary-distribution importance per node: power iteration with
    /// damping 0.85, stopping when the largest per-node delta falls below
    /// 1e-6, capped at 100 iterations so degenerate graphs still terminate.
    /// Dangling-node mass is redistributed uniformly. Scores are scaled by
    /// 10 000 for numeric convenience; only their relative order matters.
    pub fn rank(&self) -> BTreeMap<String, f64> {
        let n = self.nodes.len();
        if n == 0 {
            return BTreeMap::new();
        }
        let uniform = 1.0 / n as f64;

        let out_weight: BTreeMap<&str, f64> = self
            .edges
            .iter()
            .map(|(src, targets)| (src.as_str(), targets.values().sum()))
            .collect();

        let mut ranks: BTreeMap<&str, f64> = self
            .nodes
            .iter()
            .map(|node| (node.as_str(), uniform))
            .collect();

        for _ in 0..MAX_ITERATIONS {
            let dangling: f64 = ranks
                .iter()
                .filter(|(node, _)| !out_weight.contains_key(*node))
                .map(|(_, rank)| rank)
                .sum();

            let mut next: BTreeMap<&str, f64> = self
                .nodes
                .iter()
                .map(|node| {
                    (
                        node.as_str(),
                        (1.0 - DAMPING) * uniform + DAMPING * dangling * uniform,
                    )
                })
                .collect();

            for (src, targets) in &self.edges {
                let rank = ranks[src.as_str()];
                let total = out_weight[src.as_str()];
                for (target, weight) in targets {
                    if let Some(r) = next.get_mut(target.as_str()) {
                        *r += DAMPING * rank * weight / total;
                    }
                }
            }

            let delta = self
                .nodes
                .iter()
                .map(|node| (next[node.as_str()] - ranks[node.as_str()]).abs())
                .fold(0.0_f64, f64::max);
            ranks = next;
            if delta < TOLERANCE {
                break;
            }
        }

        ranks
            .into_iter()
            .map(|(node, rank)| (node.to_string(), rank * SCORE_SCALE))
            .collect()
    }
}

/// Convenience over `LinkGraph` for callers that already hold an edge list.
pub fn compute_importance<I>(edges: I) -> BTreeMap<String, f64>
where
    I: IntoIterator<Item = (String, String, f64)>,
{
    let mut graph = LinkGraph::new();
    for (source, target, weight) in edges {
        graph.link(&source, &target, weight);
    }
    graph.rank()
}

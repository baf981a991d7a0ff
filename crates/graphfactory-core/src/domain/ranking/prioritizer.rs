//! Centrality-based node ranking
//!
//! Weighted PageRank over the undirected view of the graph:
//!
//! ```text
//! PR(v) = (1-d)/N + d * ( Σ PR(u) * w(u,v) / W(u)  +  Σ PR(z) / N )
//!                        u~v                         z: W(z)=0
//! ```
//!
//! where `w(u,v)` sums the effective weights of all edges between `u` and
//! `v` in either direction and `W(u)` is the total weight around `u`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RankingConfig;
use crate::domain::graph::{InvestmentGraph, NodeId};

/// Scores are compared at this resolution so numerically equal values tie
const SCORE_QUANTUM: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrioritizerSettings {
    pub damping: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for PrioritizerSettings {
    fn default() -> Self {
        Self::from(&RankingConfig::default())
    }
}

impl From<&RankingConfig> for PrioritizerSettings {
    fn from(config: &RankingConfig) -> Self {
        Self {
            damping: config.damping.clamp(0.0, 0.99),
            tolerance: config.tolerance.max(0.0),
            max_iterations: config.max_iterations.max(1),
        }
    }
}

/// A node with its importance score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedNode {
    pub id: NodeId,
    pub name: String,
    pub score: f64,
    pub occurrence_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct NodePrioritizer {
    settings: PrioritizerSettings,
}

impl NodePrioritizer {
    pub fn new(settings: PrioritizerSettings) -> Self {
        Self { settings }
    }

    /// Every node, most important first.
    ///
    /// Ties break by occurrence count descending, then id ascending.
    pub fn rank(&self, graph: &InvestmentGraph) -> Vec<RankedNode> {
        let scores = self.compute_scores(graph);

        let mut ranked: Vec<RankedNode> = graph
            .nodes()
            .zip(scores)
            .map(|(node, score)| RankedNode {
                id: node.id,
                name: node.name.clone(),
                score,
                occurrence_count: node.occurrence_count(),
            })
            .collect();

        ranked.sort_by(|a, b| {
            quantize(b.score)
                .cmp(&quantize(a.score))
                .then_with(|| b.occurrence_count.cmp(&a.occurrence_count))
                .then_with(|| a.id.cmp(&b.id))
        });
        ranked
    }

    /// The `min(n, |nodes|)` highest-ranked node ids
    pub fn select_top_n(&self, graph: &InvestmentGraph, n: usize) -> Vec<NodeId> {
        self.rank(graph).into_iter().take(n).map(|r| r.id).collect()
    }

    /// Scores in node id order
    fn compute_scores(&self, graph: &InvestmentGraph) -> Vec<f64> {
        let n = graph.node_count();
        if n == 0 {
            return Vec::new();
        }

        let index: HashMap<NodeId, usize> =
            graph.nodes().enumerate().map(|(i, node)| (node.id, i)).collect();

        // Sparse symmetric adjacency, indexed by position in id order
        let mut neighbours: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        for edge in graph.edges() {
            let (Some(&s), Some(&t)) = (index.get(&edge.source()), index.get(&edge.target())) else {
                continue;
            };
            let w = edge.effective_weight().max(0.0);
            if w == 0.0 {
                continue;
            }
            neighbours[s].push((t, w));
            neighbours[t].push((s, w));
        }
        let totals: Vec<f64> = neighbours
            .iter()
            .map(|list| list.iter().map(|(_, w)| w).sum())
            .collect();

        let damping = self.settings.damping;
        let uniform = 1.0 / n as f64;
        let mut scores = vec![uniform; n];

        for iteration in 0..self.settings.max_iterations {
            let dangling: f64 = scores
                .iter()
                .zip(&totals)
                .filter(|(_, total)| **total == 0.0)
                .map(|(score, _)| score)
                .sum();

            let mut next = vec![(1.0 - damping) * uniform + damping * dangling * uniform; n];
            for (u, list) in neighbours.iter().enumerate() {
                if totals[u] == 0.0 {
                    continue;
                }
                let share = damping * scores[u] / totals[u];
                for &(v, w) in list {
                    next[v] += share * w;
                }
            }

            let sum: f64 = next.iter().sum();
            if sum > 0.0 {
                for value in &mut next {
                    *value /= sum;
                }
            }

            let delta: f64 = next
                .iter()
                .zip(&scores)
                .map(|(a, b)| (a - b).abs())
                .sum();
            scores = next;

            if delta < self.settings.tolerance {
                debug!(iteration, delta, "Node ranking converged");
                break;
            }
        }

        scores
    }
}

fn quantize(score: f64) -> i64 {
    (score / SCORE_QUANTUM).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{
        CandidateEdge, CandidateNode, CandidateSubgraph, ConnectionStrength, GraphMerger, NodeType,
    };

    fn star(reversed: bool) -> InvestmentGraph {
        let mut merger = GraphMerger::new(InvestmentGraph::new("Hub"));
        let leaves = ["Leaf A", "Leaf B", "Leaf C"];
        let order: Vec<_> = if reversed {
            leaves.iter().rev().collect()
        } else {
            leaves.iter().collect()
        };
        for leaf in order {
            merger.merge(
                &CandidateSubgraph::new(format!("f-{leaf}"))
                    .with_node(CandidateNode::new("leaf", *leaf, NodeType::Company))
                    .with_node(CandidateNode::new("hub", "Hub", NodeType::Company))
                    .with_edge(CandidateEdge::new("leaf", "hub", "supplies", ConnectionStrength::Neutral)),
            );
        }
        merger.into_graph()
    }

    #[test]
    fn test_star_center_ranks_first() {
        for reversed in [false, true] {
            let graph = star(reversed);
            let hub = graph.find_node("Hub", NodeType::Company).unwrap().id;
            let ranked = NodePrioritizer::default().rank(&graph);

            assert_eq!(ranked.len(), 4);
            assert_eq!(ranked[0].id, hub);
            assert!(ranked[0].score > ranked[1].score);
        }
    }

    #[test]
    fn test_center_ranks_first_with_outgoing_edges_too() {
        let mut merger = GraphMerger::new(InvestmentGraph::new("Hub"));
        for leaf in ["A", "B", "C"] {
            merger.merge(
                &CandidateSubgraph::new(format!("f-{leaf}"))
                    .with_node(CandidateNode::new("hub", "Hub", NodeType::Company))
                    .with_node(CandidateNode::new("leaf", leaf, NodeType::Product))
                    .with_edge(CandidateEdge::new("hub", "leaf", "makes", ConnectionStrength::Strong)),
            );
        }
        let graph = merger.into_graph();
        let ranked = NodePrioritizer::default().select_top_n(&graph, 1);
        assert_eq!(ranked, vec![graph.find_node("Hub", NodeType::Company).unwrap().id]);
    }

    #[test]
    fn test_scores_sum_to_one() {
        let graph = star(false);
        let ranked = NodePrioritizer::default().rank(&graph);
        let total: f64 = ranked.iter().map(|r| r.score).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_equal_leaves_tie_break_by_id() {
        let graph = star(false);
        let ranked = NodePrioritizer::default().rank(&graph);
        let leaf_ids: Vec<_> = ranked[1..].iter().map(|r| r.id).collect();
        let mut sorted = leaf_ids.clone();
        sorted.sort();
        assert_eq!(leaf_ids, sorted);
    }

    #[test]
    fn test_select_top_n_bounds_and_determinism() {
        let graph = star(false);
        let prioritizer = NodePrioritizer::default();
        assert_eq!(prioritizer.select_top_n(&graph, 2).len(), 2);
        assert_eq!(prioritizer.select_top_n(&graph, 10).len(), 4);
        assert!(prioritizer.select_top_n(&graph, 0).is_empty());
        assert_eq!(
            prioritizer.select_top_n(&graph, 4),
            prioritizer.select_top_n(&graph, 4)
        );
        assert!(prioritizer.select_top_n(&InvestmentGraph::new("x"), 3).is_empty());
    }

    #[test]
    fn test_isolated_nodes_break_ties_by_occurrence() {
        let mut merger = GraphMerger::new(InvestmentGraph::new("x"));
        merger.merge(&CandidateSubgraph::new("f1").with_node(CandidateNode::new("a", "Rare", NodeType::Event)));
        for id in ["f1", "f2", "f3"] {
            merger.merge(&CandidateSubgraph::new(id).with_node(CandidateNode::new("b", "Common", NodeType::Event)));
        }
        let graph = merger.into_graph();
        let ranked = NodePrioritizer::default().rank(&graph);
        assert_eq!(ranked[0].name, "Common");
        assert_eq!(ranked[1].name, "Rare");
    }
}

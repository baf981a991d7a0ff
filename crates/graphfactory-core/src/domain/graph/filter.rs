//! Low-signal pruning

use tracing::debug;

use crate::config::FilterConfig;

use super::node::NodeId;
use super::store::InvestmentGraph;

/// Thresholds below which nodes and edges are removed
#[derive(Debug, Clone, PartialEq)]
pub struct GraphFilter {
    pub min_occurrence_count: usize,
    pub min_aggregated_strength: f64,
    pub drop_orphans: bool,
}

impl Default for GraphFilter {
    fn default() -> Self {
        Self {
            min_occurrence_count: 1,
            min_aggregated_strength: 0.0,
            drop_orphans: false,
        }
    }
}

impl From<&FilterConfig> for GraphFilter {
    fn from(config: &FilterConfig) -> Self {
        Self {
            min_occurrence_count: config.min_occurrence_count,
            min_aggregated_strength: config.min_aggregated_strength,
            drop_orphans: config.drop_orphans,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    pub nodes_removed: usize,
    pub edges_removed: usize,
}

impl GraphFilter {
    pub(crate) fn apply(&self, graph: &mut InvestmentGraph, protected: &[NodeId]) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();

        let weak_edges: Vec<_> = graph
            .edges()
            .filter(|e| {
                e.occurrence_count() < self.min_occurrence_count
                    || e.aggregated_strength() < self.min_aggregated_strength
            })
            .map(|e| e.key().clone())
            .collect();
        for key in weak_edges {
            if graph.remove_edge(&key).is_some() {
                outcome.edges_removed += 1;
            }
        }

        let rare_nodes: Vec<NodeId> = graph
            .nodes()
            .filter(|n| !protected.contains(&n.id))
            .filter(|n| n.occurrence_count() < self.min_occurrence_count)
            .map(|n| n.id)
            .collect();
        for id in rare_nodes {
            if let Some(edges) = graph.remove_node(id) {
                outcome.nodes_removed += 1;
                outcome.edges_removed += edges;
            }
        }

        if self.drop_orphans {
            let orphans: Vec<NodeId> = graph
                .degrees()
                .into_iter()
                .filter(|(id, degree)| *degree == 0 && !protected.contains(id))
                .map(|(id, _)| id)
                .collect();
            for id in orphans {
                if graph.remove_node(id).is_some() {
                    outcome.nodes_removed += 1;
                }
            }
        }

        debug!(
            nodes_removed = outcome.nodes_removed,
            edges_removed = outcome.edges_removed,
            "Applied graph filter"
        );
        outcome
    }
}

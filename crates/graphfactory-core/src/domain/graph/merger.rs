//! Folding candidate sub-graphs into the global graph

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::MergeDataError;

use super::edge::{EdgeKey, EdgeTypeCanonicalizer, Observation, WeightConfidence};
use super::filter::{FilterOutcome, GraphFilter};
use super::fragment::CandidateSubgraph;
use super::node::{IdentityKey, NodeId, NodeType};
use super::store::InvestmentGraph;

/// What a single merge did to the graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub edges_created: usize,
    pub edges_updated: usize,
    /// Edge observations skipped because the fragment was already recorded
    pub duplicates_skipped: usize,
    /// Malformed candidates that were dropped
    pub dropped: Vec<MergeDataError>,
}

impl MergeOutcome {
    /// Whether the merge added any node or edge
    pub fn grew(&self) -> bool {
        self.nodes_created > 0 || self.edges_created > 0
    }
}

/// Final weight to write onto one edge
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightAssignment {
    pub weight: f64,
    pub confidence: WeightConfidence,
}

/// The single writer of an [`InvestmentGraph`].
///
/// Merging is commutative and idempotent: node fields use order-free
/// policies, and edge observations are keyed by fragment id.
#[derive(Debug, Clone)]
pub struct GraphMerger {
    graph: InvestmentGraph,
    canonicalizer: EdgeTypeCanonicalizer,
}

impl GraphMerger {
    pub fn new(graph: InvestmentGraph) -> Self {
        Self {
            graph,
            canonicalizer: EdgeTypeCanonicalizer::default(),
        }
    }

    pub fn with_canonicalizer(mut self, canonicalizer: EdgeTypeCanonicalizer) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }

    pub fn graph(&self) -> &InvestmentGraph {
        &self.graph
    }

    pub fn into_graph(self) -> InvestmentGraph {
        self.graph
    }

    /// Make sure a node exists for `name`, without recording a mention
    pub fn seed(&mut self, name: &str, node_type: NodeType) -> NodeId {
        let key = IdentityKey::new(name, node_type);
        match self.graph.node_id_for(&key) {
            Some(id) => id,
            None => {
                let id = self.graph.create_node(name, node_type);
                debug!(node_id = id, name = %name, "Seeded node");
                id
            }
        }
    }

    /// Fold one fragment's candidates into the graph
    pub fn merge(&mut self, subgraph: &CandidateSubgraph) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let fragment_id = subgraph.fragment_id.as_str();
        let mut resolved: HashMap<&str, NodeId> = HashMap::new();

        for candidate in &subgraph.nodes {
            let missing = if candidate.temp_id.trim().is_empty() {
                Some("tempId")
            } else if candidate.name.trim().is_empty() {
                Some("name")
            } else if candidate.node_type.is_none() {
                Some("type")
            } else {
                None
            };
            let node_type = match (missing, candidate.node_type) {
                (None, Some(node_type)) => node_type,
                (field, _) => {
                    outcome.dropped.push(MergeDataError::MissingField {
                        fragment_id: fragment_id.to_string(),
                        candidate: candidate.temp_id.clone(),
                        field: field.unwrap_or("type"),
                    });
                    continue;
                }
            };

            let key = IdentityKey::new(&candidate.name, node_type);
            let (id, created) = match self.graph.node_id_for(&key) {
                Some(id) => (id, false),
                None => (self.graph.create_node(&candidate.name, node_type), true),
            };

            if let Some(node) = self.graph.node_mut(id) {
                let mut changed = node.record_mention(fragment_id);
                changed |= node.observe_name(&candidate.name);
                for alias in &candidate.aliases {
                    changed |= node.add_alias(alias);
                }
                if let Some(description) = &candidate.description {
                    changed |= node.offer_description(description);
                }

                if created {
                    outcome.nodes_created += 1;
                    debug!(fragment_id = %fragment_id, node_id = id, name = %node.name, "Created node");
                } else if changed {
                    outcome.nodes_updated += 1;
                }
            }

            resolved.entry(candidate.temp_id.as_str()).or_insert(id);
        }

        for candidate in &subgraph.edges {
            let endpoint = |temp_id: &str| {
                resolved
                    .get(temp_id)
                    .copied()
                    .ok_or_else(|| MergeDataError::UnresolvedEndpoint {
                        fragment_id: fragment_id.to_string(),
                        temp_id: temp_id.to_string(),
                    })
            };
            let (source, target) = match (
                endpoint(&candidate.source_temp_id),
                endpoint(&candidate.target_temp_id),
            ) {
                (Ok(s), Ok(t)) => (s, t),
                (Err(e), _) | (_, Err(e)) => {
                    outcome.dropped.push(e);
                    continue;
                }
            };

            let Some(edge_type) = self.canonicalizer.canonicalize(&candidate.edge_type) else {
                outcome.dropped.push(MergeDataError::MissingField {
                    fragment_id: fragment_id.to_string(),
                    candidate: format!("{}->{}", candidate.source_temp_id, candidate.target_temp_id),
                    field: "edge_type",
                });
                continue;
            };

            if source == target {
                outcome.dropped.push(MergeDataError::SelfLoop {
                    fragment_id: fragment_id.to_string(),
                    edge_type,
                });
                continue;
            }

            let observation = Observation {
                strength: candidate.connection_strength.value(),
                observed_at: subgraph.observed_at,
            };
            let (edge, created) = self.graph.edge_entry(EdgeKey::new(source, target, edge_type));

            if !edge.observe(fragment_id, observation) {
                outcome.duplicates_skipped += 1;
                debug!(fragment_id = %fragment_id, edge = %edge.key(), "Skipped duplicate observation");
                continue;
            }
            if let Some(description) = &candidate.description {
                edge.offer_description(description);
            }

            if created {
                outcome.edges_created += 1;
            } else {
                outcome.edges_updated += 1;
            }
        }

        for dropped in &outcome.dropped {
            warn!(fragment_id = %fragment_id, reason = %dropped, "Dropped malformed candidate");
        }

        outcome
    }

    /// Remove low-signal nodes and edges; `protected` nodes are always kept
    pub fn apply_filter(&mut self, filter: &GraphFilter, protected: &[NodeId]) -> FilterOutcome {
        filter.apply(&mut self.graph, protected)
    }

    /// Write final weights; returns how many edges were updated
    pub fn apply_weights(&mut self, weights: &[(EdgeKey, WeightAssignment)]) -> usize {
        let mut updated = 0;
        for (key, assignment) in weights {
            if let Some(edge) = self.graph.edge_mut(key) {
                edge.set_final_weight(assignment.weight, Some(assignment.confidence));
                updated += 1;
            }
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{CandidateEdge, CandidateNode, ConnectionStrength};

    fn supply_fragment(id: &str, strength: ConnectionStrength) -> CandidateSubgraph {
        CandidateSubgraph::new(id)
            .with_node(CandidateNode::new("a", "TSMC", NodeType::Company))
            .with_node(CandidateNode::new("b", "Nvidia", NodeType::Company))
            .with_edge(CandidateEdge::new("a", "b", "Supplies", strength))
    }

    fn merger() -> GraphMerger {
        GraphMerger::new(InvestmentGraph::new("Nvidia"))
    }

    #[test]
    fn test_three_observations_aggregate_to_running_mean() {
        let mut merger = merger();
        merger.merge(&supply_fragment("f1", ConnectionStrength::Strong));
        merger.merge(&supply_fragment("f2", ConnectionStrength::Neutral));
        merger.merge(&supply_fragment("f3", ConnectionStrength::Strong));

        let graph = merger.graph();
        assert_eq!(graph.node_count(), 2);
        let edge = graph.edges().next().unwrap();
        assert_eq!(edge.edge_type(), "supplies");
        assert_eq!(edge.occurrence_count(), 3);
        assert!((edge.aggregated_strength() - 0.7667).abs() < 1e-4);
    }

    #[test]
    fn test_resubmitted_fragment_is_rejected() {
        let mut merger = merger();
        let first = merger.merge(&supply_fragment("f1", ConnectionStrength::Strong));
        assert_eq!(first.nodes_created, 2);
        assert_eq!(first.edges_created, 1);
        assert!(first.grew());

        let before = merger.graph().clone();
        let again = merger.merge(&supply_fragment("f1", ConnectionStrength::Weak));
        assert_eq!(again.duplicates_skipped, 1);
        assert!(!again.grew());
        assert_eq!(again.nodes_updated, 0);
        assert_eq!(merger.graph(), &before);
    }

    #[test]
    fn test_identity_resolution_merges_case_variants() {
        let mut merger = merger();
        merger.merge(
            &CandidateSubgraph::new("f1")
                .with_node(CandidateNode::new("x", "tsmc", NodeType::Company).with_description("Foundry")),
        );
        let outcome = merger.merge(
            &CandidateSubgraph::new("f2").with_node(
                CandidateNode::new("y", "TSMC", NodeType::Company)
                    .with_aliases(vec!["Taiwan Semiconductor".to_string()])
                    .with_description("Largest contract chip foundry"),
            ),
        );

        assert_eq!(outcome.nodes_updated, 1);
        let graph = merger.graph();
        assert_eq!(graph.node_count(), 1);
        let node = graph.nodes().next().unwrap();
        assert_eq!(node.name, "TSMC");
        assert!(node.aliases.contains("tsmc"));
        assert!(node.aliases.contains("Taiwan Semiconductor"));
        assert_eq!(node.description, "Largest contract chip foundry");
        assert_eq!(node.occurrence_count(), 2);
    }

    #[test]
    fn test_malformed_candidates_are_dropped() {
        let mut merger = merger();
        let mut untyped = CandidateNode::new("c", "Mystery", NodeType::Company);
        untyped.node_type = None;

        let outcome = merger.merge(
            &CandidateSubgraph::new("f1")
                .with_node(CandidateNode::new("a", "TSMC", NodeType::Company))
                .with_node(CandidateNode::new("b", "  ", NodeType::Company))
                .with_node(untyped)
                .with_edge(CandidateEdge::new("a", "zz", "supplies", ConnectionStrength::Strong))
                .with_edge(CandidateEdge::new("a", "a", "supplies", ConnectionStrength::Strong))
                .with_edge(CandidateEdge::new("a", "b", " ", ConnectionStrength::Strong)),
        );

        assert_eq!(outcome.nodes_created, 1);
        assert_eq!(outcome.edges_created, 0);
        assert_eq!(outcome.dropped.len(), 5);
        assert!(outcome.dropped.iter().any(|e| matches!(e, MergeDataError::SelfLoop { .. })));
        assert!(outcome.dropped.iter().any(|e| matches!(
            e,
            MergeDataError::MissingField { field: "name", .. }
        )));
        assert!(outcome.dropped.iter().any(|e| matches!(
            e,
            MergeDataError::MissingField { field: "type", .. }
        )));
        assert!(outcome.dropped.iter().any(|e| matches!(
            e,
            MergeDataError::UnresolvedEndpoint { temp_id, .. } if temp_id == "zz"
        )));
    }

    #[test]
    fn test_seed_is_idempotent_and_records_no_mention() {
        let mut merger = merger();
        let id = merger.seed("Nvidia", NodeType::Company);
        assert_eq!(merger.seed("NVIDIA", NodeType::Company), id);
        assert_eq!(merger.graph().node(id).unwrap().occurrence_count(), 0);
        assert_eq!(merger.graph().target_node().map(|n| n.id), Some(id));
    }

    #[test]
    fn test_apply_weights_ignores_unknown_edges() {
        let mut merger = merger();
        merger.merge(&supply_fragment("f1", ConnectionStrength::Strong));
        let key = merger.graph().edges().next().unwrap().key().clone();

        let assignment = WeightAssignment {
            weight: 0.42,
            confidence: WeightConfidence::Low,
        };
        let updated = merger.apply_weights(&[
            (key.clone(), assignment),
            (EdgeKey::new(7, 8, "owns"), assignment),
        ]);

        assert_eq!(updated, 1);
        let edge = merger.graph().edge(&key).unwrap();
        assert_eq!(edge.final_weight(), Some(0.42));
        assert_eq!(edge.weight_confidence(), Some(WeightConfidence::Low));
    }
}

//! JSON interchange format: export, import, statistics and integrity checks

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::edge::{EdgeKey, Observation};
use super::node::{Node, NodeId, NodeType, canonical_name};
use super::store::InvestmentGraph;

/// Value of `metadata.generated_by` in every export
pub const GENERATOR_NAME: &str = "graphfactory";

/// Fragment id carried by the single observation an imported edge gets
const IMPORTED_OBSERVATION: &str = "imported";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedGraph {
    pub target: String,
    pub metadata: ExportMetadata,
    pub nodes: Vec<ExportedNode>,
    pub edges: Vec<ExportedEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub generated_by: String,
    pub data_source: String,
    pub statistics: GraphStatistics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub node_types: BTreeMap<String, usize>,
    pub avg_importance_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedNode {
    pub id: NodeId,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub description: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub title: String,
    pub description: String,
    pub importance_score: f64,
}

impl GraphStatistics {
    fn compute(nodes: &[ExportedNode], edges: &[ExportedEdge]) -> Self {
        let mut node_types = BTreeMap::new();
        for node in nodes {
            *node_types.entry(node.node_type.as_str().to_string()).or_insert(0) += 1;
        }

        let avg_importance_score = if edges.is_empty() {
            0.0
        } else {
            let total: f64 = edges.iter().map(|e| e.importance_score).sum();
            round_to(total / edges.len() as f64, 3)
        };

        Self {
            total_nodes: nodes.len(),
            total_edges: edges.len(),
            node_types,
            avg_importance_score,
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

impl ExportedGraph {
    /// Snapshot a graph in the interchange format
    pub fn from_graph(graph: &InvestmentGraph, data_source: impl Into<String>) -> Self {
        let nodes: Vec<ExportedNode> = graph
            .nodes()
            .map(|n| ExportedNode {
                id: n.id,
                name: n.name.clone(),
                node_type: n.node_type,
                description: n.description.clone(),
                aliases: n.aliases.iter().cloned().collect(),
            })
            .collect();

        let edges: Vec<ExportedEdge> = graph
            .edges()
            .map(|e| ExportedEdge {
                source: e.source(),
                target: e.target(),
                title: e.edge_type().to_string(),
                description: e.description.clone(),
                importance_score: e.effective_weight().clamp(0.0, 1.0),
            })
            .collect();

        Self {
            target: graph.target().to_string(),
            metadata: ExportMetadata {
                generated_by: GENERATOR_NAME.to_string(),
                data_source: data_source.into(),
                statistics: GraphStatistics::compute(&nodes, &edges),
            },
            nodes,
            edges,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Rebuild a graph from an export.
    ///
    /// Each edge becomes one observation whose strength and final weight
    /// equal its importance score, so exporting the result again yields the
    /// same document.
    pub fn into_graph(self) -> Result<InvestmentGraph> {
        let mut graph = InvestmentGraph::new(self.target);

        for exported in self.nodes {
            let mut node = Node::new(exported.id, &exported.name, exported.node_type);
            node.description = exported.description;
            node.aliases = exported
                .aliases
                .into_iter()
                .filter(|a| *a != node.name)
                .collect::<BTreeSet<_>>();
            graph.restore_node(node)?;
        }

        for exported in self.edges {
            if graph.node(exported.source).is_none() || graph.node(exported.target).is_none() {
                return Err(Error::InvalidGraph(format!(
                    "edge '{}' references unknown node ({} -> {})",
                    exported.title, exported.source, exported.target
                )));
            }
            if !(0.0..=1.0).contains(&exported.importance_score) {
                return Err(Error::InvalidGraph(format!(
                    "edge '{}' has importance_score {} outside [0, 1]",
                    exported.title, exported.importance_score
                )));
            }

            let key = EdgeKey::new(exported.source, exported.target, exported.title);
            let (edge, created) = graph.edge_entry(key);
            if !created {
                return Err(Error::InvalidGraph(format!("duplicate edge {}", edge.key())));
            }
            edge.observe(
                IMPORTED_OBSERVATION,
                Observation {
                    strength: exported.importance_score,
                    observed_at: None,
                },
            );
            edge.description = exported.description;
            edge.set_final_weight(exported.importance_score, None);
        }

        Ok(graph)
    }

    /// Structural problems in the document
    pub fn integrity_report(&self) -> IntegrityReport {
        let node_ids: HashSet<NodeId> = self.nodes.iter().map(|n| n.id).collect();

        let mut connected = HashSet::new();
        let mut dangling_edges = Vec::new();
        let mut seen_edges = HashSet::new();
        let mut duplicate_edges = Vec::new();
        for edge in &self.edges {
            if !node_ids.contains(&edge.source) || !node_ids.contains(&edge.target) {
                dangling_edges.push((edge.source, edge.target, edge.title.clone()));
                continue;
            }
            connected.insert(edge.source);
            connected.insert(edge.target);
            if !seen_edges.insert((edge.source, edge.target, edge.title.clone())) {
                duplicate_edges.push((edge.source, edge.target, edge.title.clone()));
            }
        }

        let orphaned_nodes = self
            .nodes
            .iter()
            .filter(|n| !connected.contains(&n.id))
            .map(|n| n.id)
            .collect();

        let mut by_identity: BTreeMap<(String, NodeType), Vec<NodeId>> = BTreeMap::new();
        for node in &self.nodes {
            by_identity
                .entry((canonical_name(&node.name), node.node_type))
                .or_default()
                .push(node.id);
        }
        let duplicate_names = by_identity
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|((name, _), ids)| (name, ids))
            .collect();

        IntegrityReport {
            orphaned_nodes,
            dangling_edges,
            duplicate_edges,
            duplicate_names,
        }
    }
}

/// Findings of [`ExportedGraph::integrity_report`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Nodes without any incident edge
    pub orphaned_nodes: Vec<NodeId>,
    /// Edges whose endpoints are missing, as `(source, target, title)`
    pub dangling_edges: Vec<(NodeId, NodeId, String)>,
    pub duplicate_edges: Vec<(NodeId, NodeId, String)>,
    /// Case-insensitive name collisions within a type
    pub duplicate_names: Vec<(String, Vec<NodeId>)>,
}

impl IntegrityReport {
    /// True when nothing would break an import; orphans are informational
    pub fn is_clean(&self) -> bool {
        self.dangling_edges.is_empty()
            && self.duplicate_edges.is_empty()
            && self.duplicate_names.is_empty()
    }
}

/// Human-readable overview of a graph
pub fn summary(graph: &InvestmentGraph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Investment graph for: {}", graph.target());
    let _ = writeln!(out, "Total entities: {}", graph.node_count());
    let _ = writeln!(out, "Total relationships: {}", graph.edge_count());

    let _ = writeln!(out, "\nEntity types:");
    for (node_type, count) in graph.type_distribution() {
        let _ = writeln!(out, "  {}: {}", node_type, count);
    }

    let _ = writeln!(out, "\nEntities:");
    for node in graph.nodes().take(10) {
        let _ = writeln!(out, "  - {} ({})", node.name, node.node_type);
    }
    if graph.node_count() > 10 {
        let _ = writeln!(out, "  ... and {} more", graph.node_count() - 10);
    }
    out
}

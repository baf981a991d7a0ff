//! The investment graph container

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::error::{Error, Result};

use super::edge::{Edge, EdgeKey};
use super::node::{IdentityKey, Node, NodeId, NodeType};

/// Largest id a JSON number carries exactly (2^53 - 1)
pub const MAX_NODE_ID: NodeId = (1 << 53) - 1;

/// All nodes and edges for one target context.
///
/// Read access is public; mutation is crate-private and only reached
/// through [`GraphMerger`](super::GraphMerger), the filter and import.
#[derive(Debug, Clone, PartialEq)]
pub struct InvestmentGraph {
    target: String,
    nodes: BTreeMap<NodeId, Node>,
    identities: BTreeMap<IdentityKey, NodeId>,
    edges: BTreeMap<EdgeKey, Edge>,
    next_id: NodeId,
}

impl InvestmentGraph {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            nodes: BTreeMap::new(),
            identities: BTreeMap::new(),
            edges: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Name of the entity the graph is built around
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Nodes in id order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edge(&self, key: &EdgeKey) -> Option<&Edge> {
        self.edges.get(key)
    }

    /// Edges in key order
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Resolve a name within a type using the identity rule
    pub fn find_node(&self, name: &str, node_type: NodeType) -> Option<&Node> {
        self.identities
            .get(&IdentityKey::new(name, node_type))
            .and_then(|id| self.nodes.get(id))
    }

    /// Case-insensitive lookup by name or alias across all types
    pub fn find_by_name(&self, name: &str) -> Vec<&Node> {
        self.nodes.values().filter(|n| n.matches_name(name)).collect()
    }

    /// The seed node for the target, if it has been created
    pub fn target_node(&self) -> Option<&Node> {
        self.find_node(&self.target, NodeType::Company)
    }

    pub fn type_distribution(&self) -> BTreeMap<NodeType, usize> {
        let mut counts = BTreeMap::new();
        for node in self.nodes.values() {
            *counts.entry(node.node_type).or_insert(0) += 1;
        }
        counts
    }

    /// Undirected neighbour lists, in node id order
    pub fn adjacency(&self) -> BTreeMap<NodeId, Vec<NodeId>> {
        let mut adjacency: BTreeMap<NodeId, Vec<NodeId>> =
            self.nodes.keys().map(|id| (*id, Vec::new())).collect();
        for key in self.edges.keys() {
            if let Some(list) = adjacency.get_mut(&key.source) {
                list.push(key.target);
            }
            if let Some(list) = adjacency.get_mut(&key.target) {
                list.push(key.source);
            }
        }
        adjacency
    }

    /// Undirected hop distance from `origin` to every reachable node
    pub fn distances_from(&self, origin: NodeId) -> HashMap<NodeId, u32> {
        let mut distances = HashMap::new();
        if !self.nodes.contains_key(&origin) {
            return distances;
        }

        let adjacency = self.adjacency();
        let mut queue = VecDeque::from([origin]);
        distances.insert(origin, 0);

        while let Some(current) = queue.pop_front() {
            let next = distances[&current] + 1;
            for neighbour in adjacency.get(&current).into_iter().flatten() {
                if !distances.contains_key(neighbour) {
                    distances.insert(*neighbour, next);
                    queue.push_back(*neighbour);
                }
            }
        }
        distances
    }

    /// Distance of each edge from the target: hops to its nearer endpoint,
    /// or `unreachable` when neither endpoint connects to the target
    pub fn edge_distances(&self, unreachable: u32) -> BTreeMap<EdgeKey, u32> {
        let distances = self
            .target_node()
            .map(|n| self.distances_from(n.id))
            .unwrap_or_default();

        self.edges
            .keys()
            .map(|key| {
                let d = match (distances.get(&key.source), distances.get(&key.target)) {
                    (Some(a), Some(b)) => *a.min(b),
                    (Some(d), None) | (None, Some(d)) => *d,
                    (None, None) => unreachable,
                };
                (key.clone(), d)
            })
            .collect()
    }

    /// Number of edges touching each node
    pub fn degrees(&self) -> BTreeMap<NodeId, usize> {
        self.adjacency()
            .into_iter()
            .map(|(id, neighbours)| (id, neighbours.len()))
            .collect()
    }

    pub(crate) fn node_id_for(&self, key: &IdentityKey) -> Option<NodeId> {
        self.identities.get(key).copied()
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub(crate) fn edge_mut(&mut self, key: &EdgeKey) -> Option<&mut Edge> {
        self.edges.get_mut(key)
    }

    /// Allocate a fresh node for an identity that is not yet present
    pub(crate) fn create_node(&mut self, name: &str, node_type: NodeType) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        let node = Node::new(id, name, node_type);
        self.identities.insert(node.identity_key(), id);
        self.nodes.insert(id, node);
        id
    }

    /// Insert a node with a known id (import)
    pub(crate) fn restore_node(&mut self, node: Node) -> Result<()> {
        if node.id > MAX_NODE_ID {
            return Err(Error::InvalidGraph(format!(
                "node id {} is above the largest allowed id {}",
                node.id, MAX_NODE_ID
            )));
        }
        if self.nodes.contains_key(&node.id) {
            return Err(Error::InvalidGraph(format!("duplicate node id {}", node.id)));
        }
        self.next_id = self.next_id.max(node.id + 1);
        self.identities.entry(node.identity_key()).or_insert(node.id);
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Returns the new edge, or the existing one for the key
    pub(crate) fn edge_entry(&mut self, key: EdgeKey) -> (&mut Edge, bool) {
        use std::collections::btree_map::Entry;
        match self.edges.entry(key) {
            Entry::Occupied(e) => (e.into_mut(), false),
            Entry::Vacant(e) => {
                let edge = Edge::new(e.key().clone());
                (e.insert(edge), true)
            }
        }
    }

    pub(crate) fn remove_edge(&mut self, key: &EdgeKey) -> Option<Edge> {
        self.edges.remove(key)
    }

    /// Remove a node and every edge touching it. Returns the number of edges removed.
    pub(crate) fn remove_node(&mut self, id: NodeId) -> Option<usize> {
        let node = self.nodes.remove(&id)?;
        let key = node.identity_key();
        if self.identities.get(&key) == Some(&id) {
            self.identities.remove(&key);
        }
        let before = self.edges.len();
        self.edges.retain(|k, _| k.source != id && k.target != id);
        Some(before - self.edges.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> InvestmentGraph {
        // target(0) - a(1) - b(2) - c(3), plus an isolated pair d(4) - e(5)
        let mut graph = InvestmentGraph::new("Nvidia");
        let target = graph.create_node("Nvidia", NodeType::Company);
        let a = graph.create_node("TSMC", NodeType::Company);
        let b = graph.create_node("ASML", NodeType::Company);
        let c = graph.create_node("EUV ban", NodeType::Regulation);
        let d = graph.create_node("Tesla", NodeType::Company);
        let e = graph.create_node("Elon Musk", NodeType::Person);
        graph.edge_entry(EdgeKey::new(a, target, "supplies"));
        graph.edge_entry(EdgeKey::new(b, a, "supplies"));
        graph.edge_entry(EdgeKey::new(c, b, "restricts"));
        graph.edge_entry(EdgeKey::new(e, d, "leads"));
        graph
    }

    #[test]
    fn test_find_node_is_case_insensitive() {
        let graph = chain();
        assert_eq!(graph.find_node("tsmc", NodeType::Company).map(|n| n.id), Some(1));
        assert!(graph.find_node("TSMC", NodeType::Product).is_none());
        assert_eq!(graph.target_node().map(|n| n.id), Some(0));
        assert_eq!(graph.find_by_name("elon   musk").len(), 1);
    }

    #[test]
    fn test_distances_follow_edges_both_ways() {
        let graph = chain();
        let distances = graph.distances_from(0);
        assert_eq!(distances[&0], 0);
        assert_eq!(distances[&1], 1);
        assert_eq!(distances[&3], 3);
        assert!(!distances.contains_key(&4));
    }

    #[test]
    fn test_edge_distances_use_nearer_endpoint() {
        let graph = chain();
        let distances = graph.edge_distances(9);
        assert_eq!(distances[&EdgeKey::new(1, 0, "supplies")], 0);
        assert_eq!(distances[&EdgeKey::new(2, 1, "supplies")], 1);
        assert_eq!(distances[&EdgeKey::new(3, 2, "restricts")], 2);
        assert_eq!(distances[&EdgeKey::new(5, 4, "leads")], 9);
    }

    #[test]
    fn test_remove_node_drops_incident_edges_and_never_reuses_ids() {
        let mut graph = chain();
        assert_eq!(graph.remove_node(1), Some(2));
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.find_node("TSMC", NodeType::Company).is_none());

        let id = graph.create_node("TSMC", NodeType::Company);
        assert_eq!(id, 6);
        assert_eq!(graph.remove_node(42), None);
    }

    #[test]
    fn test_type_distribution_and_degrees() {
        let graph = chain();
        let types = graph.type_distribution();
        assert_eq!(types[&NodeType::Company], 4);
        assert_eq!(types[&NodeType::Person], 1);

        let degrees = graph.degrees();
        assert_eq!(degrees[&1], 2);
        assert_eq!(degrees[&0], 1);
    }
}

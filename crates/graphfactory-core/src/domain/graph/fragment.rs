//! Input fragments and the candidate sub-graphs extracted from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::edge::ConnectionStrength;
use super::node::NodeType;

/// Identifier of one input unit
pub type FragmentId = String;

/// One chunk of input text submitted for extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: FragmentId,
    pub text: String,
    /// Provenance of the text (URL, filing id, search query)
    #[serde(default, alias = "sourceRef")]
    pub source_ref: Option<String>,
    /// When the underlying source was published or retrieved
    #[serde(default, alias = "observedAt")]
    pub observed_at: Option<DateTime<Utc>>,
}

impl Fragment {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source_ref: None,
            observed_at: None,
        }
    }

    pub fn with_source_ref(mut self, source_ref: impl Into<String>) -> Self {
        self.source_ref = Some(source_ref.into());
        self
    }

    pub fn with_observed_at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = Some(observed_at);
        self
    }

    /// Wrap a search result; the id is derived from the subject and the text,
    /// so the same result always maps to the same fragment id.
    pub fn from_search_result(subject: &str, text: impl Into<String>) -> Self {
        let text = text.into();
        let id = format!("search-{}", content_digest(subject, &text));
        Self::new(id, text)
    }
}

fn content_digest(subject: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// A node proposed by one fragment, identified by a fragment-local handle
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateNode {
    pub temp_id: String,
    pub name: String,
    /// `None` when the extractor returned a type outside the closed set
    pub node_type: Option<NodeType>,
    pub description: Option<String>,
    pub aliases: Vec<String>,
}

impl CandidateNode {
    pub fn new(temp_id: impl Into<String>, name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            temp_id: temp_id.into(),
            name: name.into(),
            node_type: Some(node_type),
            description: None,
            aliases: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }
}

/// An edge proposed by one fragment between two candidate nodes
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEdge {
    pub source_temp_id: String,
    pub target_temp_id: String,
    pub edge_type: String,
    pub connection_strength: ConnectionStrength,
    pub description: Option<String>,
}

impl CandidateEdge {
    pub fn new(
        source_temp_id: impl Into<String>,
        target_temp_id: impl Into<String>,
        edge_type: impl Into<String>,
        connection_strength: ConnectionStrength,
    ) -> Self {
        Self {
            source_temp_id: source_temp_id.into(),
            target_temp_id: target_temp_id.into(),
            edge_type: edge_type.into(),
            connection_strength,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Everything one fragment contributes, not yet merged
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSubgraph {
    pub fragment_id: FragmentId,
    pub observed_at: Option<DateTime<Utc>>,
    pub nodes: Vec<CandidateNode>,
    pub edges: Vec<CandidateEdge>,
}

impl CandidateSubgraph {
    pub fn new(fragment_id: impl Into<String>) -> Self {
        Self {
            fragment_id: fragment_id.into(),
            observed_at: None,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn for_fragment(fragment: &Fragment) -> Self {
        Self {
            fragment_id: fragment.id.clone(),
            observed_at: fragment.observed_at,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: CandidateNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: CandidateEdge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_deserializes_both_casings() {
        let a: Fragment = serde_json::from_str(
            r#"{"id": "f1", "text": "TSMC supplies Nvidia", "sourceRef": "news:1"}"#,
        )
        .unwrap();
        let b: Fragment = serde_json::from_str(
            r#"{"id": "f1", "text": "TSMC supplies Nvidia", "source_ref": "news:1"}"#,
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.observed_at, None);
    }

    #[test]
    fn test_search_result_ids_are_stable() {
        let a = Fragment::from_search_result("TSMC", "brief text");
        let b = Fragment::from_search_result("TSMC", "brief text");
        let c = Fragment::from_search_result("Samsung", "brief text");

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert!(a.id.starts_with("search-"));
        assert_eq!(a.id.len(), "search-".len() + 64);
    }

    #[test]
    fn test_subgraph_builder() {
        let fragment = Fragment::new("f1", "text");
        let sub = CandidateSubgraph::for_fragment(&fragment)
            .with_node(CandidateNode::new("n1", "TSMC", NodeType::Company))
            .with_node(CandidateNode::new("n2", "Nvidia", NodeType::Company))
            .with_edge(CandidateEdge::new("n1", "n2", "supplies", ConnectionStrength::Strong));

        assert_eq!(sub.fragment_id, "f1");
        assert_eq!(sub.nodes.len(), 2);
        assert!(!sub.is_empty());
        assert!(CandidateSubgraph::new("f2").is_empty());
    }
}

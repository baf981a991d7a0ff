//! Graph nodes and identity resolution

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::fragment::FragmentId;

/// Stable node identifier, allocated by the merger and never reused
pub type NodeId = u64;

/// Closed set of entity types an investment graph can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Company,
    Product,
    Person,
    Event,
    Regulation,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Company => "Company",
            Self::Product => "Product",
            Self::Person => "Person",
            Self::Event => "Event",
            Self::Regulation => "Regulation",
        }
    }

    /// Parse a type label, case-insensitively
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "company" => Some(Self::Company),
            "product" | "service" | "product/service" => Some(Self::Product),
            "person" => Some(Self::Person),
            "event" => Some(Self::Event),
            "regulation" => Some(Self::Regulation),
            _ => None,
        }
    }

    pub fn all() -> &'static [NodeType] {
        &[
            Self::Company,
            Self::Product,
            Self::Person,
            Self::Event,
            Self::Regulation,
        ]
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalize a name for identity matching: trim, lowercase, collapse whitespace
pub fn canonical_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Key under which two mentions resolve to the same node
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdentityKey {
    pub name: String,
    pub node_type: NodeType,
}

impl IdentityKey {
    pub fn new(name: &str, node_type: NodeType) -> Self {
        Self {
            name: canonical_name(name),
            node_type,
        }
    }
}

/// Deterministic "longest wins" policy shared by node and edge descriptions.
///
/// Equal lengths go to the lexicographically greater text, so the outcome
/// does not depend on the order descriptions are offered in.
pub(crate) fn prefers_description(current: &str, offered: &str) -> bool {
    let (current_len, offered_len) = (current.chars().count(), offered.chars().count());
    offered_len > current_len || (offered_len == current_len && offered > current)
}

/// An entity in the investment graph
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// Display name: the smallest spelling observed so far
    pub name: String,
    /// Every other observed spelling and supplied alias; never contains `name`
    pub aliases: BTreeSet<String>,
    pub node_type: NodeType,
    pub description: String,
    mentions: BTreeSet<FragmentId>,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: &str, node_type: NodeType) -> Self {
        Self {
            id,
            name: name.trim().to_string(),
            aliases: BTreeSet::new(),
            node_type,
            description: String::new(),
            mentions: BTreeSet::new(),
        }
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(&self.name, self.node_type)
    }

    /// Number of distinct fragments that mentioned this node
    pub fn occurrence_count(&self) -> usize {
        self.mentions.len()
    }

    pub fn mentioned_in(&self, fragment_id: &str) -> bool {
        self.mentions.contains(fragment_id)
    }

    /// Check if this node matches a name (including aliases), case-insensitively
    pub fn matches_name(&self, query: &str) -> bool {
        let query = canonical_name(query);
        canonical_name(&self.name) == query
            || self.aliases.iter().any(|alias| canonical_name(alias) == query)
    }

    /// Fold in another spelling of the node's name. Returns true if anything changed.
    pub(crate) fn observe_name(&mut self, spelling: &str) -> bool {
        let spelling = spelling.trim();
        if spelling.is_empty() || spelling == self.name {
            return false;
        }
        if spelling < self.name.as_str() {
            let previous = std::mem::replace(&mut self.name, spelling.to_string());
            self.aliases.remove(spelling);
            self.aliases.insert(previous);
            true
        } else {
            self.aliases.insert(spelling.to_string())
        }
    }

    pub(crate) fn add_alias(&mut self, alias: &str) -> bool {
        let alias = alias.trim();
        if alias.is_empty() || alias == self.name {
            return false;
        }
        self.aliases.insert(alias.to_string())
    }

    pub(crate) fn offer_description(&mut self, description: &str) -> bool {
        let description = description.trim();
        if prefers_description(&self.description, description) {
            self.description = description.to_string();
            true
        } else {
            false
        }
    }

    /// Returns false if the fragment was already recorded
    pub(crate) fn record_mention(&mut self, fragment_id: &str) -> bool {
        self.mentions.insert(fragment_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_parse() {
        assert_eq!(NodeType::parse("company"), Some(NodeType::Company));
        assert_eq!(NodeType::parse(" Regulation "), Some(NodeType::Regulation));
        assert_eq!(NodeType::parse("PERSON"), Some(NodeType::Person));
        assert_eq!(NodeType::parse("sector"), None);
        assert_eq!(NodeType::all().len(), 5);
    }

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("  Taiwan   Semiconductor "), "taiwan semiconductor");
        assert_eq!(
            IdentityKey::new("NVIDIA", NodeType::Company),
            IdentityKey::new("nvidia", NodeType::Company)
        );
        assert_ne!(
            IdentityKey::new("Apple", NodeType::Company),
            IdentityKey::new("Apple", NodeType::Product)
        );
    }

    #[test]
    fn test_name_spellings_are_order_independent() {
        let mut a = Node::new(0, "Nvidia", NodeType::Company);
        a.observe_name("NVIDIA");
        a.observe_name("nvidia");

        let mut b = Node::new(0, "nvidia", NodeType::Company);
        b.observe_name("Nvidia");
        b.observe_name("NVIDIA");

        assert_eq!(a.name, "NVIDIA");
        assert_eq!(a.name, b.name);
        assert_eq!(a.aliases, b.aliases);
        assert!(!a.aliases.contains(&a.name));
    }

    #[test]
    fn test_alias_never_equals_name() {
        let mut node = Node::new(0, "Apple", NodeType::Company);
        assert!(!node.add_alias("Apple"));
        assert!(!node.add_alias("  "));
        assert!(node.add_alias("Apple Inc."));
        assert!(!node.add_alias("Apple Inc."));
        assert!(node.matches_name("apple inc."));
    }

    #[test]
    fn test_description_longest_wins() {
        let mut node = Node::new(0, "TSMC", NodeType::Company);
        assert!(node.offer_description("Foundry"));
        assert!(node.offer_description("Contract chip foundry"));
        assert!(!node.offer_description("Foundry"));
        assert_eq!(node.description, "Contract chip foundry");

        assert!(prefers_description("abc", "abd"));
        assert!(!prefers_description("abd", "abc"));
    }

    #[test]
    fn test_record_mention_is_idempotent() {
        let mut node = Node::new(0, "TSMC", NodeType::Company);
        assert!(node.record_mention("f1"));
        assert!(!node.record_mention("f1"));
        assert!(node.record_mention("f2"));
        assert_eq!(node.occurrence_count(), 2);
        assert!(node.mentioned_in("f2"));
    }
}

//! Investment graph domain module
//!
//! The graph is built incrementally from candidate sub-graphs, one per
//! text fragment:
//!
//! - **Identity resolution**: a node is keyed by its case-insensitive name
//!   within its type
//! - **Edge folding**: an edge is keyed by `(source, target, edge_type)` and
//!   aggregates one observation per fragment as a running mean
//! - **Single writer**: [`GraphMerger`] is the only mutator; concurrent
//!   producers reach it through the [`MergerHandle`] actor
//! - **Interchange**: [`ExportedGraph`] is the JSON export/import format
//!
//! ## Usage
//!
//! ```rust,ignore
//! use graphfactory_core::domain::graph::*;
//!
//! let mut merger = GraphMerger::new(InvestmentGraph::new("Nvidia"));
//! merger.merge(
//!     &CandidateSubgraph::new("f1")
//!         .with_node(CandidateNode::new("a", "TSMC", NodeType::Company))
//!         .with_node(CandidateNode::new("b", "Nvidia", NodeType::Company))
//!         .with_edge(CandidateEdge::new("a", "b", "supplies", ConnectionStrength::Strong)),
//! );
//! let json = ExportedGraph::from_graph(merger.graph(), "news").to_json_pretty()?;
//! ```

mod actor;
mod edge;
mod export;
mod filter;
mod fragment;
mod merger;
mod node;
mod store;

pub use actor::MergerHandle;
pub use edge::{
    ConnectionStrength, Edge, EdgeKey, EdgeTypeCanonicalizer, Observation, WeightConfidence,
};
pub use export::{
    ExportMetadata, ExportedEdge, ExportedGraph, ExportedNode, GENERATOR_NAME, GraphStatistics,
    IntegrityReport, summary,
};
pub use filter::{FilterOutcome, GraphFilter};
pub use fragment::{CandidateEdge, CandidateNode, CandidateSubgraph, Fragment, FragmentId};
pub use merger::{GraphMerger, MergeOutcome, WeightAssignment};
pub use node::{IdentityKey, Node, NodeId, NodeType, canonical_name};
pub use store::{InvestmentGraph, MAX_NODE_ID};

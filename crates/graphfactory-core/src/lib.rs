//! Graphfactory Core Library
//!
//! This crate builds a weighted investment graph around one target company:
//! - Fragment extraction (LLM-backed, via OpenRouter)
//! - Graph merging with identity resolution and edge aggregation
//! - Node prioritization (weighted PageRank)
//! - Expansion scheduling over a bounded worker pool
//! - Edge weighting from co-occurrence statistics
//! - JSON export and import of finished graphs

pub mod config;
pub mod domain;
pub mod error;
pub mod expansion;
pub mod extraction;
pub mod llm;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::graph::{
        CandidateEdge, CandidateNode, CandidateSubgraph, ConnectionStrength, ExportedGraph,
        Fragment, GraphMerger, InvestmentGraph, NodeType,
    };
    pub use crate::domain::ranking::NodePrioritizer;
    pub use crate::domain::weighting::{CoOccurrenceSource, CoOccurrenceTable, EdgeWeightCalculator};
    pub use crate::error::{Error, Result};
    pub use crate::expansion::{ExpansionScheduler, PipelineRun, RunReport, TargetedSearch};
    pub use crate::extraction::FragmentExtractor;
}

//! Domain layer
//!
//! The investment graph itself, how its nodes are ranked and how its edges
//! are weighted.

pub mod graph;
pub mod ranking;
pub mod weighting;

//! Node prioritization for expansion

mod prioritizer;

pub use prioritizer::{NodePrioritizer, PrioritizerSettings, RankedNode};

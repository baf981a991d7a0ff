//! Incremental graph expansion
//!
//! [`ExpansionScheduler`] runs the pipeline for one target: it builds the
//! fundament from seed fragments, expands the most important nodes through
//! [`TargetedSearch`] for a bounded number of iterations, then weighs every
//! edge. The outcome is a [`PipelineRun`] holding the graph and its
//! [`RunReport`].

mod report;
mod scheduler;
mod search;
mod state;

pub use report::{MergeTotals, PipelineRun, RunReport, RunStatus, StopReason};
pub use scheduler::{ExpansionScheduler, SchedulerSettings};
pub use search::{LlmResearchSearch, SearchQuery, TargetedSearch};
pub use state::{SchedulerState, StateTracker, StateTransition};

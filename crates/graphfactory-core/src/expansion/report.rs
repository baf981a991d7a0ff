//! Run-level outcome of a pipeline run

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::graph::{ExportedGraph, InvestmentGraph, MergeOutcome};
use crate::error::ErrorKind;

use super::state::StateTransition;

/// Why the refinement loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    BudgetExhausted,
    /// An iteration added no node and no edge
    Stable,
    Cancelled,
    DeadlineExceeded,
    /// No node was left to expand
    NothingToExpand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Nothing beyond the seed node was built
    Empty,
}

impl RunStatus {
    pub fn of(graph: &InvestmentGraph) -> Self {
        let only_seed = graph.node_count() <= 1 && graph.target_node().is_some();
        if graph.is_empty() || (graph.edge_count() == 0 && only_seed) {
            Self::Empty
        } else {
            Self::Completed
        }
    }
}

/// Totals over every merge of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeTotals {
    pub merges: usize,
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub edges_created: usize,
    pub edges_updated: usize,
    pub duplicates_skipped: usize,
    pub candidates_dropped: usize,
}

impl MergeTotals {
    pub fn absorb(&mut self, outcome: &MergeOutcome) {
        self.merges += 1;
        self.nodes_created += outcome.nodes_created;
        self.nodes_updated += outcome.nodes_updated;
        self.edges_created += outcome.edges_created;
        self.edges_updated += outcome.edges_updated;
        self.duplicates_skipped += outcome.duplicates_skipped;
        self.candidates_dropped += outcome.dropped.len();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Absorbed failures by kind
    pub errors: BTreeMap<ErrorKind, usize>,
    pub fragments_attempted: usize,
    pub fragments_succeeded: usize,
    pub expansions_attempted: usize,
    pub iterations_completed: u32,
    pub stop_reason: Option<StopReason>,
    pub merge: MergeTotals,
    pub nodes_filtered: usize,
    pub edges_filtered: usize,
    pub edges_weighted: usize,
    pub low_confidence_edges: usize,
    pub state_history: Vec<StateTransition>,
    pub status: RunStatus,
}

impl RunReport {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            target: target.into(),
            started_at: Utc::now(),
            finished_at: None,
            errors: BTreeMap::new(),
            fragments_attempted: 0,
            fragments_succeeded: 0,
            expansions_attempted: 0,
            iterations_completed: 0,
            stop_reason: None,
            merge: MergeTotals::default(),
            nodes_filtered: 0,
            edges_filtered: 0,
            edges_weighted: 0,
            low_confidence_edges: 0,
            state_history: Vec::new(),
            status: RunStatus::Empty,
        }
    }

    pub fn record_error(&mut self, kind: ErrorKind) {
        *self.errors.entry(kind).or_insert(0) += 1;
    }

    pub fn error_count(&self, kind: ErrorKind) -> usize {
        self.errors.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_errors(&self) -> usize {
        self.errors.values().sum()
    }

    pub fn record_merge(&mut self, outcome: &MergeOutcome) {
        self.merge.absorb(outcome);
        for _ in &outcome.dropped {
            self.record_error(ErrorKind::MergeData);
        }
    }
}

/// The graph a run produced together with its report
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub graph: InvestmentGraph,
    pub report: RunReport,
}

impl PipelineRun {
    pub fn export(&self, data_source: impl Into<String>) -> ExportedGraph {
        ExportedGraph::from_graph(&self.graph, data_source)
    }
}

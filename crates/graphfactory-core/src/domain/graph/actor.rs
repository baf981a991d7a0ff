//! Single-writer merge actor.
//!
//! The graph lives inside one task. Workers hold a cloned [`MergerHandle`]
//! and send commands; every mutation is applied in arrival order by that
//! task, so the graph never needs a lock.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::edge::EdgeKey;
use super::filter::{FilterOutcome, GraphFilter};
use super::fragment::CandidateSubgraph;
use super::merger::{GraphMerger, MergeOutcome, WeightAssignment};
use super::node::{NodeId, NodeType};
use super::store::InvestmentGraph;

const COMMAND_BUFFER: usize = 256;

enum MergeCommand {
    Merge {
        subgraph: Box<CandidateSubgraph>,
        reply: oneshot::Sender<MergeOutcome>,
    },
    Seed {
        name: String,
        node_type: NodeType,
        reply: oneshot::Sender<NodeId>,
    },
    Filter {
        filter: GraphFilter,
        protected: Vec<NodeId>,
        reply: oneshot::Sender<FilterOutcome>,
    },
    ApplyWeights {
        weights: Vec<(EdgeKey, WeightAssignment)>,
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<InvestmentGraph>,
    },
}

/// Cloneable sender side of the merge actor
#[derive(Debug, Clone)]
pub struct MergerHandle {
    sender: mpsc::Sender<MergeCommand>,
}

impl std::fmt::Debug for MergeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Merge { .. } => "Merge",
            Self::Seed { .. } => "Seed",
            Self::Filter { .. } => "Filter",
            Self::ApplyWeights { .. } => "ApplyWeights",
            Self::Snapshot { .. } => "Snapshot",
        };
        f.write_str(name)
    }
}

impl MergerHandle {
    /// Start the actor. The task ends once every handle is dropped and
    /// yields the merger back.
    pub fn spawn(merger: GraphMerger) -> (Self, JoinHandle<GraphMerger>) {
        let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(run(merger, receiver));
        (Self { sender }, task)
    }

    pub async fn merge(&self, subgraph: CandidateSubgraph) -> Result<MergeOutcome> {
        self.request(|reply| MergeCommand::Merge {
            subgraph: Box::new(subgraph),
            reply,
        })
        .await
    }

    pub async fn seed(&self, name: impl Into<String>, node_type: NodeType) -> Result<NodeId> {
        let name = name.into();
        self.request(|reply| MergeCommand::Seed {
            name,
            node_type,
            reply,
        })
        .await
    }

    pub async fn filter(&self, filter: GraphFilter, protected: Vec<NodeId>) -> Result<FilterOutcome> {
        self.request(|reply| MergeCommand::Filter {
            filter,
            protected,
            reply,
        })
        .await
    }

    pub async fn apply_weights(&self, weights: Vec<(EdgeKey, WeightAssignment)>) -> Result<usize> {
        self.request(|reply| MergeCommand::ApplyWeights { weights, reply })
            .await
    }

    /// Read-only copy of the graph as of every command sent before this one
    pub async fn snapshot(&self) -> Result<InvestmentGraph> {
        self.request(|reply| MergeCommand::Snapshot { reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> MergeCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| Error::Other("merge actor stopped".to_string()))?;
        response
            .await
            .map_err(|_| Error::Other("merge actor dropped the reply".to_string()))
    }
}

async fn run(mut merger: GraphMerger, mut receiver: mpsc::Receiver<MergeCommand>) -> GraphMerger {
    info!(target_name = %merger.graph().target(), "Merge actor running");

    while let Some(command) = receiver.recv().await {
        debug!(command = ?command, "Merge actor command");
        match command {
            MergeCommand::Merge { subgraph, reply } => {
                let _ = reply.send(merger.merge(&subgraph));
            }
            MergeCommand::Seed {
                name,
                node_type,
                reply,
            } => {
                let _ = reply.send(merger.seed(&name, node_type));
            }
            MergeCommand::Filter {
                filter,
                protected,
                reply,
            } => {
                let _ = reply.send(merger.apply_filter(&filter, &protected));
            }
            MergeCommand::ApplyWeights { weights, reply } => {
                let _ = reply.send(merger.apply_weights(&weights));
            }
            MergeCommand::Snapshot { reply } => {
                let _ = reply.send(merger.graph().clone());
            }
        }
    }

    info!(
        nodes = merger.graph().node_count(),
        edges = merger.graph().edge_count(),
        "Merge actor stopped"
    );
    merger
}

//! Scheduler state machine

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};

/// Phases of one pipeline run, strictly in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "iteration", rename_all = "snake_case")]
pub enum SchedulerState {
    Initializing,
    ConstructingFundament,
    /// Refinement round, counted from 1
    Iterating(u32),
    Finalizing,
    Done,
}

impl SchedulerState {
    fn position(&self) -> (u8, u32) {
        match self {
            Self::Initializing => (0, 0),
            Self::ConstructingFundament => (1, 0),
            Self::Iterating(k) => (2, *k),
            Self::Finalizing => (3, 0),
            Self::Done => (4, 0),
        }
    }

    /// Transitions only ever move forward
    pub fn can_advance_to(&self, next: SchedulerState) -> bool {
        next.position() > self.position()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::ConstructingFundament => "constructing_fundament",
            Self::Iterating(_) => "iterating",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Iterating(k) => write!(f, "iterating({})", k),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTransition {
    pub state: SchedulerState,
    pub entered_at: DateTime<Utc>,
}

/// Current state plus the timestamped path that led to it
#[derive(Debug, Clone)]
pub struct StateTracker {
    history: Vec<StateTransition>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            history: vec![StateTransition {
                state: SchedulerState::Initializing,
                entered_at: Utc::now(),
            }],
        }
    }

    pub fn current(&self) -> SchedulerState {
        self.history
            .last()
            .map(|t| t.state)
            .unwrap_or(SchedulerState::Initializing)
    }

    pub fn advance(&mut self, next: SchedulerState) -> Result<()> {
        let current = self.current();
        if !current.can_advance_to(next) {
            return Err(Error::Other(format!(
                "invalid scheduler transition {} -> {}",
                current, next
            )));
        }
        tracing::info!(from = %current, to = %next, "Scheduler state changed");
        self.history.push(StateTransition {
            state: next,
            entered_at: Utc::now(),
        });
        Ok(())
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    pub fn into_history(self) -> Vec<StateTransition> {
        self.history
    }
}

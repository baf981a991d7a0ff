//! Error types for graphfactory
//!
//! Two layers live here:
//!
//! - [`Error`] is the crate-level error returned from fallible public
//!   operations (configuration, the LLM client, I/O, scheduler set-up).
//! - The per-item taxonomy ([`ExtractionError`], [`MergeDataError`],
//!   [`StatLookupError`], [`SearchError`]) describes failures of a single
//!   fragment, candidate, lookup or search. These never abort a run; the
//!   scheduler absorbs them and counts them by [`ErrorKind`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using graphfactory's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Scheduler errors (E001-E099)
    #[error("Scheduler configuration rejected: {0}")]
    SchedulerFatal(String),

    // Network errors (E100-E199)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("LLM API error: {0}. Check your API key with `graphfactory doctor`.")]
    LLMError(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    #[error("No suitable model found: {0}")]
    NoSuitableModel(String),

    // Interchange errors (E400-E499)
    #[error("Invalid graph document: {0}")]
    InvalidGraph(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::SchedulerFatal(_) => "E001",
            Self::NetworkError(_) => "E100",
            Self::LLMError(_) => "E101",
            Self::RateLimited(_) => "E102",
            Self::NoSuitableModel(_) => "E103",
            Self::InvalidGraph(_) => "E400",
            Self::Json(_) => "E401",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::SchedulerFatal(_) => Some("graphfactory config list".to_string()),
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::LLMError(_) | Self::NoSuitableModel(_) => Some("graphfactory doctor".to_string()),
            Self::InvalidGraph(_) => Some("graphfactory inspect <graph.json>".to_string()),
            _ => None,
        }
    }

    /// Whether this error came from the remote call exceeding its time budget
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::NetworkError(e) if e.is_timeout())
    }
}

/// Failure of one fragment's extraction call.
///
/// Always recoverable: the fragment is skipped and the batch continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    /// The response did not parse into the expected shape
    #[error("extraction response did not match the expected schema: {0}")]
    SchemaInvalid(String),

    /// The remote call exceeded its time budget
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),

    /// The remote capability could not be reached or refused the call
    #[error("extraction backend unavailable: {0}")]
    RemoteUnavailable(String),
}

impl ExtractionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SchemaInvalid(_) => ErrorKind::SchemaInvalid,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::RemoteUnavailable(_) => ErrorKind::RemoteUnavailable,
        }
    }
}

impl From<Error> for ExtractionError {
    fn from(err: Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout(Duration::ZERO);
        }
        match err {
            Error::Json(e) => Self::SchemaInvalid(e.to_string()),
            other => Self::RemoteUnavailable(other.to_string()),
        }
    }
}

/// A malformed candidate that the merger dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeDataError {
    /// A required field was empty or absent
    #[error("candidate '{candidate}' from fragment '{fragment_id}' is missing '{field}'")]
    MissingField {
        fragment_id: String,
        candidate: String,
        field: &'static str,
    },

    /// An edge endpoint does not name an accepted node of the same sub-graph
    #[error("edge endpoint '{temp_id}' in fragment '{fragment_id}' does not resolve to a node")]
    UnresolvedEndpoint { fragment_id: String, temp_id: String },

    /// Both endpoints resolve to the same node
    #[error("edge '{edge_type}' in fragment '{fragment_id}' points from a node to itself")]
    SelfLoop { fragment_id: String, edge_type: String },
}

/// Failure to fetch a co-occurrence statistic for one node pair.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatLookupError {
    #[error("no co-occurrence statistic for '{0}' and '{1}'")]
    NotFound(String, String),

    #[error("co-occurrence lookup timed out")]
    Timeout,

    #[error("co-occurrence source unavailable: {0}")]
    Unavailable(String),
}

/// Failure of one targeted search for a node expansion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("targeted search timed out")]
    Timeout,

    #[error("targeted search backend unavailable: {0}")]
    Unavailable(String),
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::Timeout,
            Self::Unavailable(_) => ErrorKind::SearchFailed,
        }
    }
}

impl From<Error> for SearchError {
    fn from(err: Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

/// Bucket used to aggregate absorbed failures in the run report
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SchemaInvalid,
    Timeout,
    RemoteUnavailable,
    MergeData,
    StatLookup,
    SearchFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaInvalid => "schema_invalid",
            Self::Timeout => "timeout",
            Self::RemoteUnavailable => "remote_unavailable",
            Self::MergeData => "merge_data",
            Self::StatLookup => "stat_lookup",
            Self::SearchFailed => "search_failed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

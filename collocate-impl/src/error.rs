//! Error types for the collocation engine.

use thiserror::Error;

use crate::description::DiscoursemeId;
use crate::subcorpus::SubcorpusId;

/// Failures reported by a [`CorpusProvider`](crate::provider::CorpusProvider).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown corpus '{0}'")]
    UnknownCorpus(String),

    #[error("corpus '{corpus}' has no positional attribute '{attribute}'")]
    UnknownAttribute { corpus: String, attribute: String },

    #[error("corpus '{corpus}' has no structural attribute '{level}'")]
    UnknownLevel { corpus: String, level: String },

    #[error("position {position} is outside corpus '{corpus}' ({size} tokens)")]
    OutOfBounds {
        corpus: String,
        position: usize,
        size: usize,
    },

    #[error("malformed corpus '{corpus}': {reason}")]
    Malformed { corpus: String, reason: String },

    #[error("could not read corpus data: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not decode corpus data: {0}")]
    Format(#[from] serde_json::Error),
}

/// Errors surfaced by the engine to its callers.
#[derive(Debug, Error)]
pub enum CollocateError {
    /// Zero focus matches in a required scope. Engine entry points turn this
    /// into an empty result; it only escapes from the lower-level builders.
    #[error("no matches in {0}")]
    EmptyScope(String),

    #[error("region {start}..={end} has no metadata value for '{key}'")]
    MissingMetadata { key: String, start: usize, end: usize },

    #[error("value '{value}' of '{key}' is not a datetime")]
    InvalidMetadataValue { key: String, value: String },

    #[error("unsupported time interval '{0}' (expected hour, day, week, month, quarter or year)")]
    UnsupportedInterval(String),

    #[error("discourseme {0} is not part of this analysis")]
    UnknownDiscourseme(DiscoursemeId),

    #[error("item '{0}' does not occur in the requested scope")]
    UnknownItem(String),

    /// A subcorpus was used together with a corpus it does not belong to.
    #[error("subcorpus {subcorpus} belongs to corpus '{owner}', not '{corpus}'")]
    InconsistentScope {
        subcorpus: SubcorpusId,
        owner: String,
        corpus: String,
    },

    #[error("unknown subcorpus {0}")]
    UnknownSubcorpus(SubcorpusId),

    #[error("unknown subcorpus collection {0}")]
    UnknownCollection(u64),

    #[error("unknown analysis {0}")]
    UnknownAnalysis(u64),

    #[error("unknown semantic map {0}")]
    UnknownMap(u64),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("inconsistent contingency table: O11={o11} R1={r1} C1={c1} N={n}")]
    InvalidContingency { o11: u64, r1: u64, c1: u64, n: u64 },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CollocateError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        CollocateError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = CollocateError> = std::result::Result<T, E>;

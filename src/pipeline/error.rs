//! Pipeline error taxonomy and stage outcomes.
//!
//! Per-item failures (one fetch, one field) never surface here; stages
//! recover from them in place. What does surface: missing or empty input
//! artifacts (fatal to the stage), transport failure of a stage's single
//! required fetch, and store/feed faults. Cancellation is deliberately not
//! an error: it is a third terminal outcome.

use thiserror::Error;

use crate::infrastructure::artifact_store::StoreError;
use crate::infrastructure::http_client::FetchError;
use crate::infrastructure::parsing::ParsingError;
use crate::infrastructure::spreadsheet::FeedError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("required artifact '{key}' is missing; run its producing stage first")]
    MissingArtifact { key: String },

    #[error("artifact '{key}' is empty; nothing to process")]
    EmptyArtifact { key: String },

    #[error("another pipeline run is already active")]
    RunInProgress,

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("artifact store failure: {0}")]
    Store(#[from] StoreError),

    #[error("stock feed failure: {0}")]
    Feed(#[from] FeedError),

    #[error("parser construction failed: {0}")]
    Parsing(#[from] ParsingError),

    #[error("feed scratch file error: {0}")]
    Scratch(#[source] std::io::Error),
}

impl PipelineError {
    pub fn missing_artifact(key: &str) -> Self {
        Self::MissingArtifact {
            key: key.to_string(),
        }
    }

    pub fn empty_artifact(key: &str) -> Self {
        Self::EmptyArtifact {
            key: key.to_string(),
        }
    }
}

/// How a stage ended when it did not fail: it either ran to completion or
/// was cooperatively cancelled. A cancelled stage persists nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> StageOutcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Cancelled => None,
        }
    }
}

pub type StageResult<T> = Result<StageOutcome<T>, PipelineError>;

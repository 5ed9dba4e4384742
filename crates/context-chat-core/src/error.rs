//! Typed request failures surfaced to callers of the pipeline.
//!
//! Backend traits return `anyhow::Result`; the orchestrator maps those
//! failures onto [`PipelineError`] according to the stage they happened in.

use std::time::Duration;
use thiserror::Error;

use crate::models::FinalAnswer;
use crate::state::RequestState;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The enrichment call failed; the request continued with a fallback
    /// query. Logged, never terminal.
    #[error("query understanding degraded: {0}")]
    UnderstandingDegraded(String),

    /// The embedding provider or vector store could not be reached.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// The language model failed, or violated the citation policy in strict mode.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// History could not be read or written. When the answer was already
    /// produced it is returned here, unsaved.
    #[error("session store unavailable: {reason}")]
    SessionStoreUnavailable {
        reason: String,
        unsaved_answer: Option<FinalAnswer>,
    },

    #[error("{stage} stage timed out after {after:?}")]
    Timeout { stage: RequestState, after: Duration },

    /// The caller went away before the request finished.
    #[error("request cancelled by caller")]
    Cancelled,
}

impl PipelineError {
    /// The request state the failure belongs to.
    pub fn stage(&self) -> Option<RequestState> {
        match self {
            PipelineError::UnderstandingDegraded(_) => Some(RequestState::Understanding),
            PipelineError::RetrievalUnavailable(_) => Some(RequestState::Retrieving),
            PipelineError::GenerationFailed(_) => Some(RequestState::Generating),
            PipelineError::SessionStoreUnavailable { unsaved_answer, .. } => {
                if unsaved_answer.is_some() {
                    Some(RequestState::Persisting)
                } else {
                    Some(RequestState::Received)
                }
            }
            PipelineError::Timeout { stage, .. } => Some(*stage),
            PipelineError::Cancelled => None,
        }
    }

    /// Whether the request may continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::UnderstandingDegraded(_))
    }
}

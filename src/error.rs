//! Error taxonomy for the analysis pipeline.
//!
//! Only faults that cross the coordinator boundary live here. Analyzer
//! faults and cache faults are absorbed where they occur and never reach
//! the caller.

use thiserror::Error;

/// A fault surfaced to the caller of the analysis pipeline.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The request failed validation. Never retried.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// No result is available for the requested study.
    #[error("no result available for study {0}")]
    NotFound(String),

    /// The analysis queue is at capacity; the caller should back off.
    #[error("analysis queue is full")]
    QueueFull,

    /// The analysis queue has been shut down.
    #[error("analysis queue is shut down")]
    QueueClosed,

    /// Unexpected fault inside the pipeline. Nothing partial is cached
    /// or returned in this case.
    #[error("analysis pipeline failed: {0}")]
    Pipeline(#[from] anyhow::Error),
}

use thiserror::Error;
use time::OffsetDateTime;

/// Enrichment failures, classified for the retry controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnrichError {
    #[error("transient enrichment failure: {0}")]
    Transient(String),

    /// The provider is under cooldown; do not call it again before the
    /// embedded resume time.
    #[error("provider rate limited until {0}")]
    RateLimited(OffsetDateTime),

    /// The response could not be interpreted at all. Retried as transient,
    /// logged distinctly.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriteError {
    #[error("sink rejected point: {0}")]
    Rejected(String),

    #[error("failed to reach sink: {0}")]
    Transport(String),

    /// The non-blocking write queue is at capacity. Backpressure, not data
    /// loss: the retry controller will try again.
    #[error("write queue full")]
    QueueFull,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Enrich(#[from] EnrichError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("attempt cancelled: connection closed")]
    Cancelled,
}

impl PipelineError {
    /// The earliest instant the next attempt is allowed, if the failure
    /// carries one.
    pub fn resume_at(&self) -> Option<OffsetDateTime> {
        match self {
            PipelineError::Enrich(EnrichError::RateLimited(at)) => Some(*at),
            _ => None,
        }
    }
}

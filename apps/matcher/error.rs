use thiserror::Error;

pub type Result<T> = std::result::Result<T, MatchError>;

/// Failures surfaced by the indexing and ranking core.
///
/// Background polling failures never reach ranking callers; they are wrapped
/// in `UpstreamFetch` and handled inside the poller loop.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("embedding dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("configuration fault: {0}")]
    ConfigurationFault(String),

    #[error("failed to fetch collection {collection}: {source:#}")]
    UpstreamFetch {
        collection: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("document store error: {0:#}")]
    Store(#[source] anyhow::Error),

    #[error("embedding provider error: {0:#}")]
    Embedding(#[source] anyhow::Error),

    #[error("live view sink is closed")]
    SinkClosed,
}

impl MatchError {
    /// Faults that mean the in-memory index no longer agrees with the
    /// embedding configuration. The process should stop rather than keep
    /// answering with a broken index.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MatchError::DimensionMismatch { .. } | MatchError::ConfigurationFault(_)
        )
    }
}

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("unknown job kind: {0}")]
    UnknownJobKind(String),

    #[error("job of kind {actual} submitted as {requested}")]
    KindMismatch {
        requested: String,
        actual: &'static str,
    },

    #[error("job queue is full")]
    CapacityExceeded,

    #[error("worker pool is closed")]
    Closed,
}

impl PoolError {
    /// Label used for the `reason` dimension of rejection metrics
    pub fn reason(&self) -> &'static str {
        match self {
            PoolError::UnknownJobKind(_) => "unknown_kind",
            PoolError::KindMismatch { .. } => "kind_mismatch",
            PoolError::CapacityExceeded => "capacity",
            PoolError::Closed => "closed",
        }
    }

    /// Whether the submitter should be told the service is busy rather than
    /// that the request itself was wrong
    pub fn is_unavailable(&self) -> bool {
        matches!(self, PoolError::CapacityExceeded | PoolError::Closed)
    }
}

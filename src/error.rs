use std::io;
use thiserror::Error;

/// Result type used throughout the crate.
pub type GoesGridResult<T> = Result<T, GoesGridError>;

/// Everything that can go wrong while indexing grids or running batch jobs.
#[derive(Debug, Error)]
pub enum GoesGridError {
    /// Invalid boxes, steps, date ranges and the like. Never retried.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The requested region does not fall on the satellite disk for this grid.
    #[error("region outside grid coverage: {0}")]
    OutsideCoverage(String),

    /// The source grid is missing its axis samples or projection metadata.
    #[error("malformed grid metadata: {0}")]
    MalformedGrid(String),

    #[error("storage error at '{path}': {source}")]
    Storage {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("blob lookup failed: {0}")]
    Lookup(String),

    #[error("processing failed: {0}")]
    Processing(String),

    #[error("worker pool error: {0}")]
    Pool(String),
}

impl GoesGridError {
    pub(crate) fn storage(path: &str, source: io::Error) -> Self {
        GoesGridError::Storage {
            path: path.to_owned(),
            source,
        }
    }

    /// True if this is a storage error caused by a missing blob.
    pub fn is_not_found(&self) -> bool {
        matches!(self, GoesGridError::Storage { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

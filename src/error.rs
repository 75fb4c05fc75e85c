//! Error types for the clustering engine.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the clustering components.
///
/// Components never swallow these; the pipeline decides whether a failure
/// restarts a phase or stops the run.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// An ID reached the forest that it was not provisioned for.
    #[error("address id {id} is out of range for forest capacity {capacity}")]
    IdOutOfRange { id: u32, capacity: usize },

    /// More distinct addresses than a 32-bit ID can address.
    #[error("address id space exhausted after {interned} addresses")]
    IdSpaceExhausted { interned: usize },

    #[error("forest capacity {requested} exceeds the 32-bit address id space")]
    CapacityTooLarge { requested: usize },

    /// An address seen while clustering that phase 1 never interned.
    #[error("address {address:?} was not interned before clustering")]
    UnknownAddress { address: String },

    #[error("invalid interner state: {0}")]
    InvalidInternerState(String),

    #[error("invalid forest state: {0}")]
    InvalidForestState(String),

    /// A checkpoint file that exists but cannot be trusted.
    #[error("corrupt checkpoint {}: {reason}", path.display())]
    CorruptCheckpoint { path: PathBuf, reason: String },

    #[error("{}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("unsupported input {}: {reason}", path.display())]
    UnsupportedInput { path: PathBuf, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("checkpoint encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, ClusterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ClusterError::Parse {
            path: PathBuf::from("edges/000.csv"),
            line: 12,
            message: "expected 2 fields, found 3".to_string(),
        };
        assert_eq!(err.to_string(), "edges/000.csv:12: expected 2 fields, found 3");
    }

    #[test]
    fn test_id_out_of_range_display() {
        let err = ClusterError::IdOutOfRange {
            id: 10,
            capacity: 4,
        };
        assert_eq!(
            err.to_string(),
            "address id 10 is out of range for forest capacity 4"
        );
    }
}

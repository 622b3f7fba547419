//! Error types for eduindex.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the index, vector and search layers.
#[derive(Error, Debug)]
pub enum IndexError {
    /// A record reached the indexer without a usable `file_path`.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// An optional subsystem could not initialize and is disabled for the session.
    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// The persisted JSON index could not be read back.
    #[error("index file {} is corrupt: {reason}", path.display())]
    IndexCorruption { path: PathBuf, reason: String },

    /// The JSON index and the vector artifact disagree.
    #[error("vector index out of sync with the record store: {0}")]
    PartialPersistence(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector slot {0} is already occupied")]
    SlotOccupied(usize),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Failure to turn one file into a record. Rendered into `metadata.error`.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("could not decode {kind}: {reason}")]
    Decode { kind: &'static str, reason: String },

    #[error("required tool `{0}` is not available")]
    ToolMissing(String),

    #[error("`{tool}` failed: {reason}")]
    ToolFailed { tool: String, reason: String },

    #[error("extraction timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("no content could be extracted")]
    Empty,
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Result alias for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_error_display() {
        let err = IndexError::InvalidRecord("file_path is empty".to_string());
        assert_eq!(err.to_string(), "invalid record: file_path is empty");

        let err = IndexError::DimensionMismatch {
            expected: 384,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "embedding dimension mismatch: expected 384, got 3"
        );

        let err = IndexError::IndexCorruption {
            path: PathBuf::from("/tmp/resources.json"),
            reason: "expected value at line 1 column 1".to_string(),
        };
        assert!(err.to_string().contains("/tmp/resources.json"));
    }

    #[test]
    fn test_extraction_error_display() {
        let err = ExtractionError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "extraction timed out after 30s");

        let err = ExtractionError::ToolMissing("ffprobe".to_string());
        assert_eq!(err.to_string(), "required tool `ffprobe` is not available");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: IndexError = io.into();
        assert!(matches!(err, IndexError::Io(_)));
    }
}

/*!
Defines the [LakeError] taxonomy and the crate-wide [Result] type.

Low-level errors are translated into the taxonomy at the storage and
repository boundaries via the `From` conversions below: missing objects
become [LakeError::NotFound], losing a commit race becomes
[LakeError::Conflict], unreadable parquet or transaction-log entries become
[LakeError::Corruption], and everything else from the object store is
treated as transient and retried by the store layer only.
*/

use thiserror::Error;

/// Error type shared by all lakehouse components.
#[derive(Error, Debug)]
pub enum LakeError {
    /// A requested key, entity or file does not exist.
    #[error("not found: `{0}`")]
    NotFound(String),

    /// The dataset lock is held by another operation. Retryable by the
    /// caller; operations never queue.
    #[error("dataset is busy: `{0}`")]
    Busy(String),

    /// Lost a concurrent commit or create race.
    #[error("conflict: `{0}`")]
    Conflict(String),

    /// Checksum mismatch, unreadable parquet file or a broken transaction
    /// log. Fatal for the affected dataset; recovery goes through the
    /// recreate operation.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Invalid caller input (malformed checksum, unknown schema, bad
    /// mapping). Fatal for the operation; the caller fixes the input.
    #[error("bad input: {0}")]
    BadInput(String),

    /// A cancellation signal was observed; partial work has been rolled
    /// back.
    #[error("operation cancelled")]
    Cancelled,

    /// Network or backend failure from the object store after retries were
    /// exhausted.
    #[error("transient i/o failure: {0}")]
    Transient(String),

    /// Journal (sqlite) failure.
    #[error("journal error: {0}")]
    Journal(#[from] rusqlite::Error),

    /// Local filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Model (de)serialization failure.
    #[error("serialization error: {0}")]
    Serde(String),
}

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, LakeError>;

impl LakeError {
    /// True for [LakeError::NotFound], used where missing values are
    /// returned as `None` instead of surfaced.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LakeError::NotFound(_))
    }
}

impl From<object_store::Error> for LakeError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => LakeError::NotFound(path),
            object_store::Error::AlreadyExists { path, .. } => LakeError::Conflict(path),
            object_store::Error::Precondition { path, .. } => LakeError::Conflict(path),
            object_store::Error::InvalidPath { source } => LakeError::BadInput(source.to_string()),
            other => LakeError::Transient(other.to_string()),
        }
    }
}

impl From<parquet::errors::ParquetError> for LakeError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        LakeError::Corruption(err.to_string())
    }
}

impl From<arrow::error::ArrowError> for LakeError {
    fn from(err: arrow::error::ArrowError) -> Self {
        LakeError::Corruption(err.to_string())
    }
}

impl From<serde_json::Error> for LakeError {
    fn from(err: serde_json::Error) -> Self {
        LakeError::Serde(err.to_string())
    }
}

impl From<serde_yaml::Error> for LakeError {
    fn from(err: serde_yaml::Error) -> Self {
        LakeError::Serde(err.to_string())
    }
}

impl From<csv::Error> for LakeError {
    fn from(err: csv::Error) -> Self {
        LakeError::Serde(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_translation() {
        let err: LakeError = object_store::Error::NotFound {
            path: "archive/blob".to_string(),
            source: "gone".into(),
        }
        .into();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("archive/blob"));
    }

    #[test]
    fn test_already_exists_is_conflict() {
        let err: LakeError = object_store::Error::AlreadyExists {
            path: "_delta_log/1.json".to_string(),
            source: "exists".into(),
        }
        .into();
        assert!(matches!(err, LakeError::Conflict(_)));
    }
}

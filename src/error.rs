//! Error taxonomy for a pipeline run.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source data is malformed: missing columns, unparsable values, absent labels.
    #[error("input format error: {0}")]
    InputFormat(String),

    /// Scoring was requested but no fitted pipeline has been persisted.
    #[error("no fitted pipeline found at {}", .0.display())]
    ModelNotFound(PathBuf),

    /// Underlying file or database I/O failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The persisted pipeline cannot be read back.
    #[error("corrupt pipeline artifact: {0}")]
    CorruptArtifact(String),

    #[error("training failed: {0}")]
    Training(String),
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Storage(err.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            PipelineError::Storage(err.to_string())
        } else {
            PipelineError::InputFormat(err.to_string())
        }
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => {
                PipelineError::InputFormat(err.to_string())
            }
            other => PipelineError::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

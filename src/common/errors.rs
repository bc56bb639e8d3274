use std::{io, path::PathBuf, time::Duration};

use log::error;
use thiserror::Error;

/// Coarse classification of a [`ProcessingError`], used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The submitted batch itself is unusable.
    BadInput,
    /// Staging, the external tool, archiving or cleanup failed.
    Processing,
    /// The bounded wait elapsed; the job may still be running.
    Timeout,
    /// The queue could not admit the job.
    Unavailable,
}

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("processing queue is not initialized")]
    NotInitialized,

    #[error("processing queue is closed")]
    QueueClosed,

    #[error("processing queue is full")]
    QueueFull,

    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("no valid image files provided")]
    NoValidImages,

    #[error("failed to stage {path:?}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to launch pipeline executable {program:?}: {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("pipeline execution failed: {reason}, output: {output}")]
    Execution { reason: String, output: String },

    #[error("job was cancelled before it finished")]
    Cancelled,

    #[error("failed to archive {path:?}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("cleanup errors: {}", .0.join("; "))]
    Cleanup(Vec<String>),

    #[error("internal processing error: {0}")]
    Internal(String),
}

impl ProcessingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessingError::NotInitialized
            | ProcessingError::QueueClosed
            | ProcessingError::QueueFull => ErrorKind::Unavailable,
            ProcessingError::InvalidSubmission(_) | ProcessingError::NoValidImages => {
                ErrorKind::BadInput
            }
            ProcessingError::Timeout(_) => ErrorKind::Timeout,
            ProcessingError::Staging { .. }
            | ProcessingError::Launch { .. }
            | ProcessingError::Execution { .. }
            | ProcessingError::Cancelled
            | ProcessingError::Archive { .. }
            | ProcessingError::Cleanup(_)
            | ProcessingError::Internal(_) => ErrorKind::Processing,
        }
    }

    pub fn execution(reason: impl Into<String>, output: impl Into<String>) -> Self {
        ProcessingError::Execution {
            reason: reason.into(),
            output: output.into(),
        }
    }
}

/// Logs the full context chain of `error` and hands it back to the caller.
pub fn handle_error(error: anyhow::Error) -> anyhow::Error {
    error!("{:?}", error);
    error
}

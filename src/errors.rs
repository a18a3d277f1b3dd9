//! Typed error definitions for stackcopy.
//! Provides a small set of well-known failure modes for better logs and tests.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackError {
    /// The source directory could not be listed. Fatal for the run.
    #[error("Cannot scan directory {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A single file could not be stat'ed. Callers treat its time as unknown.
    #[error("Cannot stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Destination already exists with different content: {0}")]
    DestinationConflict(PathBuf),

    /// Rename crossed a filesystem boundary. Recovered internally via copy + delete.
    #[error("Cross-device move {src} -> {dest}")]
    CrossDevice { src: PathBuf, dest: PathBuf },

    #[error("Group '{stem}' only partially relocated: {succeeded} of {enqueued} files")]
    PartialGroupFailure {
        stem: String,
        succeeded: usize,
        enqueued: usize,
    },

    #[error("Insufficient disk space on {dest}: need {required} bytes, have {available} bytes (reserve {reserve} bytes)")]
    LowSpace {
        required: u64,
        available: u64,
        reserve: u64,
        dest: PathBuf,
    },

    #[error("Operation interrupted by user")]
    Interrupted,
}

impl StackError {
    /// Stable numeric code per variant, used in structured logs and as exit status.
    pub fn code(&self) -> i32 {
        match self {
            StackError::Scan { .. } => 10,
            StackError::Stat { .. } => 11,
            StackError::DestinationConflict(_) => 20,
            StackError::CrossDevice { .. } => 22,
            StackError::PartialGroupFailure { .. } => 23,
            StackError::LowSpace { .. } => 30,
            StackError::Interrupted => 130,
        }
    }
}

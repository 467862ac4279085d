//! Error types for procfan

use std::io;
use thiserror::Error;

/// Result type for procfan operations
pub type Result<T> = std::result::Result<T, FanoutError>;

/// Errors that abort a whole batch.
///
/// Failures confined to a single worker are not errors; they are reported
/// per slot through [`crate::WorkerFailure`].
#[derive(Debug, Error)]
pub enum FanoutError {
    /// Failed to create a channel (descriptor table exhausted, etc.)
    #[error("Failed to create channel {index}: {source}")]
    ChannelCreate {
        index: usize,
        #[source]
        source: io::Error,
    },

    /// Failed to fork a worker
    #[error("Failed to spawn worker {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },

    /// Waiting for the batch's workers failed
    #[error("Failed to wait for workers: {0}")]
    Wait(#[source] io::Error),

    /// Reading a normally exited worker's channel failed
    #[error("Failed to read result of worker {index}: {source}")]
    Read {
        index: usize,
        #[source]
        source: io::Error,
    },

    /// Batch does not fit the exit-status identifier space
    #[error("Batch too large: max {max} workers, got {got}")]
    BatchTooLarge { max: usize, got: usize },

    /// Batch configuration rejected before any resource was allocated
    #[error("Invalid batch configuration: {0}")]
    InvalidConfig(String),
}

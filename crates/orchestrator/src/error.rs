//! Errors raised while setting up and driving a case.

use std::path::PathBuf;

use kernel::KernelError;
use thiserror::Error;

/// Result alias for orchestration code.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Failures of case setup, particle synchronization and the run loop.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The case file is inconsistent.
    #[error("invalid case configuration: {0}")]
    Config(String),

    /// A file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A case file is not valid JSON for [`crate::CaseConfig`].
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The particle transport failed.
    #[error("particle transport: {0}")]
    Transport(String),

    /// A frame was used before any span covering it was announced.
    #[error("frame {frame} was used before any span was announced")]
    UnannouncedFrame {
        /// Offending frame.
        frame: u64,
    },

    /// Synchronization calls arrived in an order the protocol forbids.
    #[error("synchronization out of order: {0}")]
    Ordering(String),

    /// The background run thread died.
    #[error("simulation thread: {0}")]
    Runner(String),

    /// Error from the fluid kernel.
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

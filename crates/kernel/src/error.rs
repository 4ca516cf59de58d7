//! Error type shared by every kernel module.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

/// Failures raised while defining or running a simulation.
///
/// Configuration mistakes (bad ids, mismatched definition vectors, unsupported
/// model combinations) are reported here instead of aborting the process so
/// the caller decides how to shut down.
#[derive(Debug, Error)]
pub enum KernelError {
    /// A component id was referenced that was never defined.
    #[error("unknown component id {0}")]
    UnknownComponent(usize),

    /// A block id was referenced that was never defined.
    #[error("unknown block id {0}")]
    UnknownBlock(usize),

    /// A field was asked for storage on a block it was not allocated for.
    #[error("field '{field}' has no storage for block {block}")]
    MissingBlockStorage {
        /// Field name.
        field: String,
        /// Block id.
        block: usize,
    },

    /// Parallel definition vectors had different lengths.
    #[error("inconsistent definition for {what}: expected {expected} entries, got {actual}")]
    LengthMismatch {
        /// What was being defined.
        what: String,
        /// Required length.
        expected: usize,
        /// Supplied length.
        actual: usize,
    },

    /// A requested combination of models is not implemented.
    #[error("unsupported configuration: {0}")]
    Unsupported(String),

    /// A definition is structurally invalid.
    #[error("invalid definition: {0}")]
    Invalid(String),

    /// Two boundary definitions claim the same cells.
    #[error("boundary on block {block} for component {component} overlaps an existing definition")]
    OverlappingBoundary {
        /// Block id.
        block: usize,
        /// Component id.
        component: usize,
    },

    /// A checkpoint file did not match the field it is loaded into.
    #[error("checkpoint {path:?} does not match field '{field}': {reason}")]
    CheckpointMismatch {
        /// File that was read.
        path: PathBuf,
        /// Field being restored.
        field: String,
        /// What differed.
        reason: String,
    },

    /// Filesystem failure while reading or writing field data.
    #[error("i/o error on {path:?}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Field data could not be (de)serialized.
    #[error("malformed field data in {path:?}: {source}")]
    Format {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

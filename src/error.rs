//! Error types for faststack_core.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by decoding, configuration and the blocking read path.
///
/// A cache miss is not an error; lookups return `Option` instead.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Source is empty: {}", path.display())]
    EmptySource { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Index {index} out of range for sequence of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Timed out after {waited:?} waiting for index {index}")]
    Timeout { index: usize, waited: Duration },

    #[error("Decode for index {index} was cancelled")]
    Cancelled { index: usize },

    #[error("Result for index {index} was produced under superseded generation {generation}")]
    Stale { index: usize, generation: u64 },

    #[error("Worker pool has been shut down")]
    ShutDown,

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[cfg(feature = "python")]
impl From<CoreError> for pyo3::PyErr {
    fn from(err: CoreError) -> pyo3::PyErr {
        pyo3::exceptions::PyRuntimeError::new_err(err.to_string())
    }
}

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

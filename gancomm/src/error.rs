/// Error types for checkpoints, schedules and tensor read-back.

use thiserror::Error;

/// Errors surfaced by the library.
///
/// Numeric failures inside a training step are not represented here; a
/// diverging run produces non-finite losses which are logged and left to the
/// caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint encoding error: {0}")]
    Checkpoint(#[from] serde_json::Error),

    #[error("checkpoint does not match the model: {0}")]
    CheckpointMismatch(String),

    #[error("tensor read-back failed: {0}")]
    TensorData(String),

    #[error("invalid schedule: {0}")]
    Schedule(String),

    #[error("perturbation needs {expected} values, got {actual}")]
    PerturbationShape { expected: usize, actual: usize },

    #[error("invalid noise standard deviation {0}")]
    Noise(f32),
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

//! Container runtime error types.

use thiserror::Error;

/// Result type for container runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur while driving the container runtime CLI.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime command failed.
    #[error("{runtime} {command} failed: {message}")]
    CommandFailed {
        runtime: String,
        command: String,
        message: String,
    },

    /// Neither docker nor podman is installed.
    #[error("no container runtime available (docker or podman)")]
    NoRuntimeAvailable,

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

//! Error types for build job execution

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiError {
    /// A container-runtime call failed (network, container, image).
    #[error("{operation} failed: {message}")]
    Runtime { operation: String, message: String },

    /// A one-shot container finished with a nonzero exit code.
    #[error("container meets error: {container} exited with code {exit_code}")]
    ContainerExit { container: String, exit_code: i64 },

    #[error("Event is missing data field: {0}")]
    MissingEventData(String),

    #[error("Build job has no network; setup has not succeeded")]
    NetworkNotReady,

    #[error("Image analysis failed: {0}")]
    Analysis(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CiError {
    pub fn runtime(operation: impl Into<String>, message: impl Into<String>) -> Self {
        CiError::Runtime {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Exit code of the failed container, when the failure was a nonzero exit.
    pub fn exit_code(&self) -> Option<i64> {
        match self {
            CiError::ContainerExit { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

/// Result type for build job operations
pub type Result<T> = std::result::Result<T, CiError>;

//! Error types for pipeline model loading

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Invalid pipeline tree: {0}")]
    InvalidTree(#[from] serde_json::Error),
}

/// Result type for pipeline model operations
pub type Result<T> = std::result::Result<T, PipelineError>;

//! Error types for ffpipe.

use std::path::PathBuf;

use crate::StreamKind;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or running a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transcoder binary is not available.
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// A FIFO special file could not be created.
    #[error("failed to create {kind} pipe at {}: {source}", path.display())]
    FifoCreate {
        kind: StreamKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The transcoder process could not be spawned.
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// `start` was called on a pipeline that is already started.
    #[error("pipeline already started")]
    AlreadyStarted,

    /// A write, read, or poll on an open pipe failed.
    #[error("{kind} pipe I/O failed: {source}")]
    PipeIo {
        kind: StreamKind,
        #[source]
        source: std::io::Error,
    },

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a tool not found error.
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Create a pipe I/O error for the given direction.
    pub fn pipe_io(kind: StreamKind, source: std::io::Error) -> Self {
        Self::PipeIo { kind, source }
    }
}

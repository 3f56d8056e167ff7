//! Error types for the converter.
//!
//! Provides a hierarchy of error types using `thiserror` for ergonomic error handling.

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use serde::Serialize;

/// File path errors raised while resolving a workspace.
#[derive(Error, Debug, Serialize)]
pub enum PathError {
    /// Path could not be made absolute
    #[error("Cannot resolve path {0}: {1}")]
    Resolve(PathBuf, String),
    /// Path exists but is not a regular file
    #[error("Not a file: {0}")]
    NotFile(PathBuf),
    /// Path has no usable file name
    #[error("No file name in path: {0}")]
    NoFileName(PathBuf),
    /// Destination directory could not be created
    #[error("Cannot create directory {0}: {1}")]
    CreateDir(PathBuf, String),
    /// Temp log file could not be created
    #[error("Cannot create log file {0}: {1}")]
    CreateLog(PathBuf, String),
    /// IO error accessing the path
    #[error("IO error: {0}")]
    IO(String),
}

/// Failure of a single external tool invocation.
#[derive(Error, Debug, Serialize)]
pub enum ToolError {
    /// Executable could not be started
    #[error("{tool} failed to start: {message}")]
    Spawn { tool: String, message: String },
    /// Process exited with a non-zero status
    #[error("{tool} exited with {status}: {output}")]
    Status { tool: String, status: String, output: String },
    /// Process exited cleanly but wrote diagnostics
    #[error("{tool} reported diagnostics: {output}")]
    Diagnostics { tool: String, output: String },
    /// Executable is not present on disk
    #[error("{tool} not found at {path}")]
    Missing { tool: String, path: PathBuf },
    /// Invocation was aborted by cancellation
    #[error("{0} was cancelled")]
    Cancelled(String),
    /// IO error while feeding or draining the process
    #[error("{tool} IO error: {message}")]
    IO { tool: String, message: String },
}

/// Main error type for a conversion run.
///
/// Every fatal stage failure is converted to this type; the dispatcher logs it
/// at the worker boundary and the desktop commands return it to the frontend.
#[derive(Error, Debug, Serialize)]
pub enum ConvertError {
    /// Workspace or source path resolution failed
    #[error("Path error: {0}")]
    Path(#[from] PathError),

    /// No collision-free temp token could be generated
    #[error("Could not allocate unique temp files in {0}")]
    CollisionExhausted(PathBuf),

    /// A mandatory external tool failed
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Renaming the working file onto the final path failed
    #[error("Publish error: {0}")]
    Publish(String),

    /// The run observed cancellation between stages
    #[error("Conversion cancelled")]
    Cancelled,

    /// Invalid or unreadable configuration
    #[error("Config error: {0}")]
    Config(String),

    /// File IO error
    #[error("IO error: {0}")]
    IO(String),
}

/// Convenience result type for conversion operations.
pub type ConvertResult<T> = Result<T, ConvertError>;

/// Convenience result type for tool invocations.
pub type ToolResult<T> = Result<T, ToolError>;

impl ConvertError {
    pub fn publish<T: Into<String>>(msg: T) -> Self {
        Self::Publish(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    /// True when the run ended because the batch was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Tool(ToolError::Cancelled(_)))
    }
}

impl From<io::Error> for ConvertError {
    fn from(err: io::Error) -> Self {
        Self::IO(err.to_string())
    }
}

impl From<io::Error> for PathError {
    fn from(err: io::Error) -> Self {
        Self::IO(err.to_string())
    }
}

impl From<serde_json::Error> for ConvertError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

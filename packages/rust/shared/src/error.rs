//! Error types for Longform.
//!
//! Library crates use [`LongformError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Longform operations.
#[derive(Debug, thiserror::Error)]
pub enum LongformError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Invalid plan, options, or input data. Fatal before writing starts.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A response did not match the request it claims to answer.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Failure reported on a role's error stream, message kept verbatim.
    #[error("{role} failed: {message}")]
    Role { role: String, message: String },

    /// The run scope was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The run scope's deadline elapsed.
    #[error("operation timed out")]
    Timeout,

    /// Knowledge base index failure.
    #[error("index error: {0}")]
    Index(String),

    /// Lookup miss in the knowledge base.
    #[error("not found: {0}")]
    NotFound(String),

    /// One or more roles failed to stop cleanly.
    #[error("teardown failed: {}", errors.join("; "))]
    Teardown { errors: Vec<String> },

    /// Network/HTTP error in a tool or the completion client.
    #[error("network error: {0}")]
    Network(String),

    /// Completion service error (malformed or empty response).
    #[error("completion error: {0}")]
    Completion(String),

    /// Completion service answered with a non-success HTTP status.
    #[error("completion service returned HTTP {status}: {message}")]
    CompletionStatus { status: u16, message: String },

    /// Tool execution error.
    #[error("tool error: {0}")]
    Tool(String),

    /// Model output could not be parsed into the expected shape.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LongformError>;

impl LongformError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a protocol error from any displayable message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a role error tagged with the failing role's name.
    pub fn role(role: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the two scope errors (`Cancelled`, `Timeout`).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout)
    }
}

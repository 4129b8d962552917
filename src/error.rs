//! Crate-wide error type.
//!
//! Every module returns `Result<T, EngineError>` instead of wrapping
//! `std::io::Error` ad hoc. This matches the error kinds a consumer at the
//! API boundary needs to distinguish; see `EngineError::status_class` for
//! the three-way classification an HTTP surface would use.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("metric or file not found: {0}")]
    NotFound(String),

    #[error("already exists: {path}")]
    AlreadyExists { path: PathBuf },

    #[error("record too large for file capacity ({size} bytes, capacity {capacity} bytes)")]
    RecordTooLarge { size: usize, capacity: usize },

    /// Internal: surfaced outside the metric layer only as `RecordTooLarge`.
    #[error("active file has no space for {needed} more block(s)")]
    NoSpace { needed: usize },

    #[error("corrupt block at {path}:{block} — {reason}")]
    Corrupt {
        path: PathBuf,
        block: u32,
        reason: String,
    },

    #[error("file cache exhausted (handles={handles})")]
    Exhausted { handles: usize },

    #[error("file cache is closed")]
    Closed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },
}

/// The three-way classification an HTTP-style consumer would map onto
/// status codes (400 / 404 / 500). This crate does not depend on any HTTP
/// framework; it just exposes the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    BadRequest,
    NotFound,
    Internal,
}

impl EngineError {
    pub fn status_class(&self) -> StatusClass {
        match self {
            EngineError::InvalidArgument(_) => StatusClass::BadRequest,
            EngineError::NotFound(_) => StatusClass::NotFound,
            _ => StatusClass::Internal,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: Some(path.into()),
            source,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(source: std::io::Error) -> Self {
        EngineError::Io { path: None, source }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

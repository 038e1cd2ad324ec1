//! Shared error type for the runtime.
//!
//! Every component returns `Result<T, RuntimeError>`. Rather than one
//! per-module error enum (`StoreError`, `CacheError`, `ChannelError`, ...),
//! the coordination runtime's components all answer to the same small set of
//! callers (the Router, the Workflow Engine), so one closed `Kind` plus a
//! free-form message is enough and lets `dispatch`/`trigger` match on kind
//! without downcasting.

use thiserror::Error;

/// The closed set of cross-cutting error kinds every component maps into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Caller misused the API: bad arguments, malformed expression, unknown name.
    Usage,
    /// The requested entity does not exist.
    NotFound,
    /// A compare-and-set or state-transition precondition was not met.
    Conflict,
    /// A deadline elapsed before the operation completed.
    Timeout,
    /// A configured bound (queue depth, body size, worker pool) was exceeded.
    Capacity,
    /// The Store (or its underlying connection) failed.
    Storage,
    /// The operation was cancelled before completion.
    Cancelled,
    /// An agent handler returned an error.
    Agent,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Usage => "usage",
            Kind::NotFound => "not_found",
            Kind::Conflict => "conflict",
            Kind::Timeout => "timeout",
            Kind::Capacity => "capacity",
            Kind::Storage => "storage",
            Kind::Cancelled => "cancelled",
            Kind::Agent => "agent",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A runtime error: a [`Kind`] plus a human-readable message.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct RuntimeError {
    pub kind: Kind,
    pub message: String,
}

impl RuntimeError {
    pub fn new(kind: Kind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(Kind::Usage, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Kind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(Kind::Conflict, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(Kind::Timeout, message)
    }

    pub fn capacity(message: impl Into<String>) -> Self {
        Self::new(Kind::Capacity, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(Kind::Storage, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Kind::Cancelled, message)
    }

    pub fn agent(message: impl Into<String>) -> Self {
        Self::new(Kind::Agent, message)
    }

    pub fn is(&self, kind: Kind) -> bool {
        self.kind == kind
    }
}

impl From<rusqlite::Error> for RuntimeError {
    fn from(e: rusqlite::Error) -> Self {
        RuntimeError::storage(e.to_string())
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(e: serde_json::Error) -> Self {
        RuntimeError::storage(e.to_string())
    }
}

impl From<tokio::task::JoinError> for RuntimeError {
    fn from(e: tokio::task::JoinError) -> Self {
        RuntimeError::storage(format!("blocking task join failed: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

//! Error types shared by the linbot core.
//!
//! Handler bodies return opaque [`anyhow::Error`]s; everything the core itself
//! can fail with is enumerated here.

use std::path::PathBuf;

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors raised while handing a frame to the connection.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// No gateway connection is attached.
    #[error("no active connection")]
    NotConnected,

    /// The connection writer went away while the frame was queued.
    #[error("failed to send frame: {0}")]
    SendFailed(String),
}

// =============================================================================
// API Errors
// =============================================================================

/// Error type for correlated API calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// No matching reply arrived before the deadline.
    #[error("API call timed out")]
    Timeout,

    /// The connection dropped while the call was pending, or none was attached.
    #[error("connection lost")]
    ConnectionLost,

    /// A caller-chosen correlation identifier is already pending.
    #[error("correlation id '{0}' is already pending")]
    DuplicateEcho(String),

    /// The gateway answered with a failure status.
    #[error("API error ({retcode}): {message}")]
    Failed { retcode: i64, message: String },

    /// Failed to serialize the request or deserialize the reply.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Transport error other than a missing connection.
    #[error(transparent)]
    Transport(TransportError),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => Self::ConnectionLost,
            other => Self::Transport(other),
        }
    }
}

// =============================================================================
// State Errors
// =============================================================================

/// Errors from a [`StateStore`](crate::state::StateStore).
#[derive(Debug, Error)]
pub enum StateError {
    /// Reading or writing the backing file failed.
    #[error("state I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The stored document is not valid state JSON.
    #[error("malformed state document at {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Backend-specific failure.
    #[error("{0}")]
    Backend(String),
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// =============================================================================
// Session Errors
// =============================================================================

/// A user is already engaged in a conversation with another handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("user {user_id} is already in a session with '{owner}'")]
pub struct SessionConflict {
    /// The user that could not be engaged.
    pub user_id: i64,
    /// Command of the handler currently holding the user.
    pub owner: String,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type for state store operations.
pub type StateResult<T> = Result<T, StateError>;

// Error types module
use thiserror::Error;

/// Main error type for the QueryDesk engine
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// The target database could not be reached or refused the connection.
    /// Fatal to `initialize`; surfaced synchronously to the caller.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Unknown or already-closed transaction id.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The session exists but no execution has been started on it yet.
    #[error("No query in progress for session: {0}")]
    NoActiveQuery(String),

    /// `start` was called while a prior execution is still Pending/Running.
    /// Recoverable: the client should poll the outstanding execution instead.
    #[error("Execution already in progress")]
    ExecutionInProgress,

    /// A statement failed at the database. Captured into the execution
    /// handle and reported through poll; the session stays usable.
    #[error("Statement error: {0}")]
    Statement(String),

    /// The execution was cancelled before reaching a terminal state.
    #[error("Execution cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using EngineError.
pub type Result<T> = std::result::Result<T, EngineError>;

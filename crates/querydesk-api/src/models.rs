//! Request and response models for the query-tool endpoints.

use querydesk_core::connection::{ColumnInfo, Row};
use querydesk_core::{EngineError, ExecutionStatus, PollResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enum for type-safe error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Could not reach or lease a connection to the target database
    ConnectionError,
    /// Unknown or already-closed transaction id
    SessionNotFound,
    /// Poll issued before any start was accepted on the session
    NoActiveQuery,
    /// A previous execution on the session is still active
    ExecutionInProgress,
    /// The batch could not be split or executed
    StatementError,
    /// Invalid input data
    InvalidInput,
    /// Internal error
    InternalError,
}

impl ErrorCode {
    /// Get the string representation of the error code
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionError => "CONNECTION_ERROR",
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::NoActiveQuery => "NO_ACTIVE_QUERY",
            ErrorCode::ExecutionInProgress => "EXECUTION_IN_PROGRESS",
            ErrorCode::StatementError => "STATEMENT_ERROR",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&EngineError> for ErrorCode {
    fn from(error: &EngineError) -> Self {
        match error {
            EngineError::Connection(_) => ErrorCode::ConnectionError,
            EngineError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            EngineError::NoActiveQuery(_) => ErrorCode::NoActiveQuery,
            EngineError::ExecutionInProgress => ErrorCode::ExecutionInProgress,
            EngineError::Statement(_) | EngineError::Cancelled(_) => ErrorCode::StatementError,
            EngineError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// Error details for failed requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error code enum (type-safe)
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,
}

/// Error response body shared by all endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: ErrorDetail,

    /// Request handling time in milliseconds (with fractional precision)
    pub took: f64,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: &str, took: f64) -> Self {
        Self {
            status: "error".to_string(),
            error: ErrorDetail {
                code,
                message: message.to_string(),
            },
            took,
        }
    }
}

/// Response for POST /v1/query/initialize/{server}/{database}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResponse {
    pub status: String,

    /// Fresh session identifier; key for every subsequent call
    pub transaction_id: String,

    pub took: f64,
}

/// Request body for POST /v1/query/{transaction_id}/start
#[derive(Debug, Serialize, Deserialize)]
pub struct StartRequest {
    /// The SQL batch to execute, statements separated by `;`
    pub sql: String,
}

/// Response for an accepted start: the batch executes in the background.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub status: String,
    pub transaction_id: String,
    pub took: f64,
}

/// Query-string parameters for GET /v1/query/{transaction_id}/poll
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PollParams {
    /// First result row to return (defaults to 0)
    pub offset: Option<usize>,
    /// Max result rows to return (defaults to all)
    pub limit: Option<usize>,
}

/// Response for one poll of an execution.
///
/// `additional_messages` always carries the full notice text accumulated so
/// far, newline-joined in emission order; repeated polls of a terminal
/// execution return identical bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    /// Execution status: pending, running, completed, failed or cancelled
    pub status: ExecutionStatus,

    /// True when `rows` carries the final result window
    pub result_available: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<ColumnInfo>>,

    /// Result rows inside the requested window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,

    /// Total rows in the result set, independent of the window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,

    /// Furthest row offset handed out across all polls of this execution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_delivered: Option<usize>,

    pub additional_messages: String,

    /// Database error text when status is failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub took: f64,
}

impl PollResponse {
    pub fn from_result(result: PollResult, took: f64) -> Self {
        Self {
            status: result.status,
            result_available: result.result_available,
            columns: result.columns,
            rows: result.rows,
            row_count: result.row_count,
            rows_delivered: result.rows_delivered,
            additional_messages: result.additional_messages,
            error: result.error,
            took,
        }
    }
}

/// Response for DELETE /v1/query/{transaction_id}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseResponse {
    pub status: String,
    pub took: f64,
}

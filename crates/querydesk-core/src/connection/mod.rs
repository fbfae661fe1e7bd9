//! Database driver capability traits.
//!
//! The engine never talks to a concrete database driver. It consumes two
//! capabilities: a [`ConnectionProvider`] that leases live connections, and
//! a [`DatabaseConnection`] that can execute one statement at a time and be
//! polled for progress. The bundled [`simulator`] implements both so the
//! server runs standalone and the scenario tests are hermetic; a production
//! deployment plugs a real driver in behind the same traits.

pub mod simulator;

use crate::error::EngineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One result tuple, column values in schema order.
pub type Row = Vec<serde_json::Value>;

/// Column metadata for one result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: None,
        }
    }

    pub fn with_type(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: Some(type_name.into()),
        }
    }
}

/// Complete result set of one statement.
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
}

/// Opaque token for one in-flight statement on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementHandle(u64);

impl StatementHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StatementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stmt-{}", self.0)
    }
}

/// Progress report for one statement poll.
///
/// `notices` always carries only the messages emitted since the previous
/// poll of the same handle, in emission order; the engine accumulates them.
#[derive(Debug, Clone)]
pub enum StatementProgress {
    /// Still executing. May carry a batch of freshly emitted notices.
    Busy { notices: Vec<String> },
    /// Finished successfully. Carries the trailing notices and, for
    /// row-returning statements, the complete result set.
    Done {
        notices: Vec<String>,
        result: Option<ResultSet>,
    },
    /// Failed at the database. The notices emitted before the failure are
    /// still delivered; `message` is the driver's error text.
    Error {
        notices: Vec<String>,
        message: String,
    },
}

/// A live session to the target database, exclusively owned by one
/// transaction id. Only the query executor's worker drives it.
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Submits one statement for execution and returns immediately.
    async fn execute(&self, sql: &str) -> Result<StatementHandle, EngineError>;

    /// Non-blocking progress check for an in-flight statement.
    async fn poll(&self, handle: StatementHandle) -> Result<StatementProgress, EngineError>;

    /// Best-effort cancellation of whatever statement is currently
    /// executing on this connection. Must leave the connection in a
    /// recoverable state.
    async fn cancel(&self) -> Result<(), EngineError>;

    /// Releases driver-side resources held for a finished statement.
    async fn close(&self, handle: StatementHandle) -> Result<(), EngineError>;
}

impl std::fmt::Debug for dyn DatabaseConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DatabaseConnection")
    }
}

/// Leases database connections bound to a server/database pair.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Acquires a connection. Fails with [`EngineError::Connection`] when
    /// the target is unreachable.
    async fn acquire(
        &self,
        server: &str,
        database: &str,
    ) -> Result<Arc<dyn DatabaseConnection>, EngineError>;

    /// Returns a connection to the pool. The default implementation simply
    /// drops the lease.
    async fn release(&self, connection: Arc<dyn DatabaseConnection>) {
        drop(connection);
    }
}

//! QueryDesk core engine
//!
//! The asynchronous query-execution-and-polling engine behind the QueryDesk
//! HTTP API. A client initializes a transaction-scoped session (acquiring a
//! database connection), submits a SQL batch which executes on a background
//! worker, polls for status, incremental notice messages, and result rows,
//! and finally closes the session to release the connection.
//!
//! The database driver itself is an external capability consumed through the
//! traits in [`connection`]; the engine never assumes a concrete driver.

pub mod connection;
pub mod engine;
pub mod error;
pub mod executor;
pub mod handle;
pub mod ids;
pub mod notice;
pub mod poll;
pub mod reaper;
pub mod registry;
pub mod session;
pub mod sql;

pub use connection::{ConnectionProvider, DatabaseConnection};
pub use engine::QueryEngine;
pub use error::EngineError;
pub use handle::{ExecutionSnapshot, ExecutionStatus};
pub use ids::TransactionId;
pub use poll::{PollResult, RowWindow};
pub use reaper::SessionReaper;

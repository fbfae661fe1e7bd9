//! Engine facade tying sessions, execution, and polling together.

use crate::connection::ConnectionProvider;
use crate::error::EngineError;
use crate::executor::QueryExecutor;
use crate::ids::TransactionId;
use crate::poll::{PollCoordinator, PollResult, RowWindow};
use crate::registry::SessionRegistry;
use crate::session::SessionManager;
use std::sync::Arc;

/// The query engine: one instance per server process, shared across HTTP
/// workers. All operations are keyed by transaction id; sessions never
/// contend with each other.
pub struct QueryEngine {
    registry: Arc<SessionRegistry>,
    sessions: SessionManager,
    executor: QueryExecutor,
    poller: PollCoordinator,
}

impl QueryEngine {
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        Self {
            sessions: SessionManager::new(Arc::clone(&registry), provider),
            registry,
            executor: QueryExecutor::new(),
            poller: PollCoordinator::new(),
        }
    }

    /// Opens a session against `server`/`database` and returns its fresh
    /// transaction id.
    pub async fn initialize(
        &self,
        server: &str,
        database: &str,
    ) -> Result<TransactionId, EngineError> {
        let entry = self.sessions.initialize(server, database).await?;
        Ok(entry.transaction_id().clone())
    }

    /// Accepts a SQL batch for asynchronous execution on the session.
    pub fn start(&self, transaction_id: &TransactionId, sql: &str) -> Result<(), EngineError> {
        let entry = self.registry.get(transaction_id)?;
        self.executor.start(&entry, sql)
    }

    /// Observes the session's current execution without blocking on it.
    pub fn poll(
        &self,
        transaction_id: &TransactionId,
        window: RowWindow,
    ) -> Result<PollResult, EngineError> {
        let entry = self.registry.get(transaction_id)?;
        self.poller.poll(&entry, window)
    }

    /// Closes a session. Idempotent; never fails.
    pub async fn close(&self, transaction_id: &TransactionId) {
        self.sessions.close(transaction_id).await;
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    pub(crate) fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

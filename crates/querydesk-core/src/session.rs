//! Session lifecycle: initialize and close.

use crate::connection::ConnectionProvider;
use crate::error::EngineError;
use crate::ids::TransactionId;
use crate::registry::{SessionEntry, SessionRegistry};
use log::{debug, info, warn};
use std::sync::Arc;

/// Opens and tears down query-tool sessions against the registry.
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    provider: Arc<dyn ConnectionProvider>,
}

impl SessionManager {
    pub fn new(registry: Arc<SessionRegistry>, provider: Arc<dyn ConnectionProvider>) -> Self {
        Self { registry, provider }
    }

    /// Opens a session: acquires a dedicated connection and registers it
    /// under a fresh transaction id.
    pub async fn initialize(
        &self,
        server: &str,
        database: &str,
    ) -> Result<Arc<SessionEntry>, EngineError> {
        let connection = self.provider.acquire(server, database).await?;
        let transaction_id = TransactionId::generate();
        let entry = self.registry.insert(
            transaction_id.clone(),
            server.to_string(),
            database.to_string(),
            connection,
        );
        info!(
            "Initialized session {} for {}/{}",
            transaction_id, server, database
        );
        Ok(entry)
    }

    /// Closes a session, releasing its connection and tearing down any
    /// in-flight execution.
    ///
    /// Idempotent and infallible: closing an unknown or already-closed id
    /// is a no-op, and cancellation failures are logged, never surfaced.
    pub async fn close(&self, transaction_id: &TransactionId) {
        let Some(entry) = self.registry.remove(transaction_id) else {
            debug!("Close of unknown session {} ignored", transaction_id);
            return;
        };

        // Marking the entry closed first means a start that resolved the
        // entry before the removal can no longer install an execution on
        // it and drive the released connection.
        let cell = entry.mark_closed();

        if let Some(worker) = entry.take_worker() {
            worker.abort();
        }

        if let Some(cell) = cell.filter(|cell| cell.is_active()) {
            if let Err(e) = cell.cancel() {
                warn!("Failed to mark execution cancelled on close: {}", e);
            }
            // Best-effort server-side cancel so the database stops doing
            // work for an abandoned statement.
            if let Err(e) = entry.connection().cancel().await {
                warn!(
                    "Failed to cancel statement for session {}: {}",
                    transaction_id, e
                );
            }
        }

        self.provider.release(entry.connection()).await;
        info!("Closed session {}", transaction_id);
    }
}

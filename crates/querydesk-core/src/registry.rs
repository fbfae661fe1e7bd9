//! Session registry: transaction id → connection + current execution.
//!
//! Concurrency model: a `DashMap` keyed by [`TransactionId`] gives lock-free
//! lookup across sessions; all further locking is per-entry (the execution
//! slot and the worker handle), so unrelated sessions never serialize
//! against each other.

use crate::connection::DatabaseConnection;
use crate::error::EngineError;
use crate::handle::ExecutionCell;
use crate::ids::TransactionId;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Execution slot and the closed marker, guarded by one lock so a `start`
/// racing with a `close` agree on the winner.
#[derive(Default)]
struct ExecutionSlot {
    /// Current (or most recent) execution. Replaced on the next accepted
    /// `start`; `None` until the first one.
    cell: Option<Arc<ExecutionCell>>,
    /// Set on close; no execution can be installed afterwards.
    closed: bool,
}

/// State owned by one query-tool session.
pub struct SessionEntry {
    transaction_id: TransactionId,
    server: String,
    database: String,
    connection: Arc<dyn DatabaseConnection>,
    execution: RwLock<ExecutionSlot>,
    /// Worker task driving the current execution, kept for abort-on-close.
    worker: Mutex<Option<JoinHandle<()>>>,
    last_activity: RwLock<Instant>,
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry")
            .field("transaction_id", &self.transaction_id)
            .field("server", &self.server)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl SessionEntry {
    fn new(
        transaction_id: TransactionId,
        server: String,
        database: String,
        connection: Arc<dyn DatabaseConnection>,
    ) -> Self {
        Self {
            transaction_id,
            server,
            database,
            connection,
            execution: RwLock::new(ExecutionSlot::default()),
            worker: Mutex::new(None),
            last_activity: RwLock::new(Instant::now()),
        }
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn connection(&self) -> Arc<dyn DatabaseConnection> {
        Arc::clone(&self.connection)
    }

    /// Current execution cell, if any `start` has been accepted.
    pub fn execution(&self) -> Result<Option<Arc<ExecutionCell>>, EngineError> {
        let guard = self
            .execution
            .read()
            .map_err(|e| EngineError::Internal(format!("Failed to acquire read lock: {}", e)))?;
        Ok(guard.cell.clone())
    }

    /// Installs a fresh Pending execution, rejecting while the current one
    /// is still active. This is the at-most-one-active-execution guard:
    /// check and replacement happen under the same write lock, so two
    /// concurrent `start` calls can never both succeed. An entry already
    /// marked closed rejects with `SessionNotFound`: the session is gone
    /// even if the caller still holds the entry.
    pub fn install_execution(&self, cell: Arc<ExecutionCell>) -> Result<(), EngineError> {
        let mut guard = self
            .execution
            .write()
            .map_err(|e| EngineError::Internal(format!("Failed to acquire write lock: {}", e)))?;
        if guard.closed {
            return Err(EngineError::SessionNotFound(self.transaction_id.to_string()));
        }
        if let Some(current) = guard.cell.as_ref() {
            if current.is_active() {
                return Err(EngineError::ExecutionInProgress);
            }
        }
        guard.cell = Some(cell);
        Ok(())
    }

    /// Marks the entry closed and hands back the current execution, if any.
    /// Installs racing past this point fail with `SessionNotFound`.
    pub fn mark_closed(&self) -> Option<Arc<ExecutionCell>> {
        let mut guard = match self.execution.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.closed = true;
        guard.cell.clone()
    }

    /// Replaces the worker handle, returning the previous one (finished by
    /// the time a new execution was accepted, or aborted on close).
    pub fn set_worker(&self, handle: JoinHandle<()>) -> Option<JoinHandle<()>> {
        match self.worker.lock() {
            Ok(mut guard) => guard.replace(handle),
            Err(poisoned) => poisoned.into_inner().replace(handle),
        }
    }

    pub fn take_worker(&self) -> Option<JoinHandle<()>> {
        match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Refreshes the activity timestamp (on start and poll).
    pub fn touch(&self) {
        if let Ok(mut guard) = self.last_activity.write() {
            *guard = Instant::now();
        }
    }

    pub fn idle_for(&self) -> Duration {
        match self.last_activity.read() {
            Ok(guard) => guard.elapsed(),
            Err(poisoned) => poisoned.into_inner().elapsed(),
        }
    }
}

/// Concurrency-safe mapping from transaction id to session state.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<TransactionId, Arc<SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn insert(
        &self,
        transaction_id: TransactionId,
        server: String,
        database: String,
        connection: Arc<dyn DatabaseConnection>,
    ) -> Arc<SessionEntry> {
        let entry = Arc::new(SessionEntry::new(
            transaction_id.clone(),
            server,
            database,
            connection,
        ));
        self.sessions.insert(transaction_id, Arc::clone(&entry));
        entry
    }

    /// Looks up a session, failing with `SessionNotFound` for unknown or
    /// already-closed ids.
    pub fn get(&self, transaction_id: &TransactionId) -> Result<Arc<SessionEntry>, EngineError> {
        self.sessions
            .get(transaction_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::SessionNotFound(transaction_id.to_string()))
    }

    /// Removes and returns a session entry; `None` when already gone.
    pub fn remove(&self, transaction_id: &TransactionId) -> Option<Arc<SessionEntry>> {
        self.sessions.remove(transaction_id).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ids of sessions idle longer than `timeout`.
    pub fn idle_sessions(&self, timeout: Duration) -> Vec<TransactionId> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().idle_for() >= timeout)
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::simulator::SimulatorProvider;
    use crate::connection::ConnectionProvider;

    async fn registry_with_session() -> (SessionRegistry, TransactionId) {
        let provider = SimulatorProvider::new();
        let conn = provider.acquire("local", "db").await.unwrap();
        let registry = SessionRegistry::new();
        let id = TransactionId::generate();
        registry.insert(id.clone(), "local".to_string(), "db".to_string(), conn);
        (registry, id)
    }

    #[tokio::test]
    async fn get_after_insert_and_remove() {
        let (registry, id) = registry_with_session().await;
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&id).is_ok());

        registry.remove(&id);
        let err = registry.get(&id).unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn install_rejects_while_active() {
        let (registry, id) = registry_with_session().await;
        let entry = registry.get(&id).unwrap();

        let first = Arc::new(ExecutionCell::new("SELECT 1"));
        entry.install_execution(Arc::clone(&first)).unwrap();

        // Pending counts as active
        let second = Arc::new(ExecutionCell::new("SELECT 2"));
        let err = entry.install_execution(Arc::clone(&second)).unwrap_err();
        assert!(matches!(err, EngineError::ExecutionInProgress));

        // Terminal state frees the slot
        first.complete(Vec::new()).unwrap();
        entry.install_execution(second).unwrap();
    }

    #[tokio::test]
    async fn install_rejected_after_mark_closed() {
        let (registry, id) = registry_with_session().await;
        let entry = registry.get(&id).unwrap();

        registry.remove(&id);
        assert!(entry.mark_closed().is_none());

        let err = entry
            .install_execution(Arc::new(ExecutionCell::new("SELECT 1")))
            .unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound(_)));
        assert!(entry.execution().unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_closed_returns_current_execution() {
        let (registry, id) = registry_with_session().await;
        let entry = registry.get(&id).unwrap();

        let cell = Arc::new(ExecutionCell::new("SELECT 1"));
        entry.install_execution(Arc::clone(&cell)).unwrap();

        let returned = entry.mark_closed().unwrap();
        assert!(Arc::ptr_eq(&returned, &cell));
    }

    #[tokio::test]
    async fn idle_sessions_reports_stale_entries() {
        let (registry, id) = registry_with_session().await;
        assert!(registry.idle_sessions(Duration::from_secs(3600)).is_empty());
        assert_eq!(registry.idle_sessions(Duration::ZERO), vec![id]);
    }
}

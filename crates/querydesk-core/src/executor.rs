//! Asynchronous batch executor.
//!
//! `start` validates and splits the batch, installs a fresh execution on
//! the session, and spawns a tokio worker that drives the connection
//! statement by statement. The HTTP caller returns as soon as the worker
//! is spawned; all progress is observed through polls.

use crate::connection::{DatabaseConnection, StatementHandle, StatementProgress};
use crate::error::EngineError;
use crate::handle::ExecutionCell;
use crate::registry::SessionEntry;
use crate::sql::split_statements;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// Delay between driver polls inside the worker loop.
const DRIVER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Spawns and supervises one worker task per accepted execution.
pub struct QueryExecutor {
    poll_interval: Duration,
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryExecutor {
    pub fn new() -> Self {
        Self {
            poll_interval: DRIVER_POLL_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_poll_interval(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Accepts a batch for asynchronous execution on the session.
    ///
    /// Fails with [`EngineError::ExecutionInProgress`] while a previous
    /// execution on the same session is still active, and with
    /// [`EngineError::Statement`] when the batch cannot be split (or is
    /// empty). Returns once the worker is spawned, never waiting for the
    /// batch itself.
    pub fn start(&self, entry: &Arc<SessionEntry>, sql: &str) -> Result<(), EngineError> {
        let statements = split_statements(sql)?;
        if statements.is_empty() {
            return Err(EngineError::Statement("empty SQL batch".to_string()));
        }

        let cell = Arc::new(ExecutionCell::new(sql));
        entry.install_execution(Arc::clone(&cell))?;
        entry.touch();

        debug!(
            "Starting execution of {} statement(s) on session {}",
            statements.len(),
            entry.transaction_id()
        );

        let connection = entry.connection();
        let interval = self.poll_interval;
        let worker = tokio::spawn(async move {
            run_batch(connection, cell, statements, interval).await;
        });

        // The previous worker, if any, already finished: install_execution
        // only succeeds once the prior execution is terminal.
        if let Some(previous) = entry.set_worker(worker) {
            previous.abort();
        }
        Ok(())
    }
}

/// Drives one batch to a terminal state. Runs inside the worker task; every
/// outcome, including driver errors, lands in the cell rather than being
/// propagated.
async fn run_batch(
    connection: Arc<dyn DatabaseConnection>,
    cell: Arc<ExecutionCell>,
    statements: Vec<String>,
    poll_interval: Duration,
) {
    if let Err(e) = cell.mark_running() {
        warn!("Failed to mark execution running: {}", e);
        return;
    }

    let last_index = statements.len() - 1;
    for (index, statement) in statements.iter().enumerate() {
        // A close racing with the spawn may cancel the cell before this
        // worker is registered for abort; stop at the statement boundary
        // and never touch the released connection.
        if !cell.is_active() {
            return;
        }

        let handle = match connection.execute(statement).await {
            Ok(handle) => handle,
            Err(e) => {
                record(cell.fail(Vec::new(), e.to_string()));
                return;
            }
        };

        loop {
            match connection.poll(handle).await {
                Ok(StatementProgress::Busy { notices }) => {
                    record(cell.append_notices(notices));
                    if !cell.is_active() {
                        close_statement(&connection, handle).await;
                        return;
                    }
                    tokio::time::sleep(poll_interval).await;
                }
                Ok(StatementProgress::Done { notices, result }) => {
                    if let Some(result) = result {
                        record(cell.capture_result(result));
                    }
                    // Release the driver handle before the terminal
                    // transition so an abort landing right after completion
                    // cannot leak it on the driver side.
                    close_statement(&connection, handle).await;
                    if index == last_index {
                        record(cell.complete(notices));
                    } else {
                        record(cell.append_notices(notices));
                    }
                    break;
                }
                Ok(StatementProgress::Error { notices, message }) => {
                    close_statement(&connection, handle).await;
                    record(cell.fail(notices, message));
                    return;
                }
                Err(e) => {
                    record(cell.fail(Vec::new(), e.to_string()));
                    return;
                }
            }
        }
    }
}

async fn close_statement(connection: &Arc<dyn DatabaseConnection>, handle: StatementHandle) {
    if let Err(e) = connection.close(handle).await {
        debug!("Failed to close statement {}: {}", handle, e);
    }
}

/// Cell writes only fail on lock poisoning; log instead of panicking the
/// worker.
fn record(result: Result<(), EngineError>) {
    if let Err(e) = result {
        warn!("Failed to record execution progress: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::simulator::SimulatorProvider;
    use crate::connection::ConnectionProvider;
    use crate::handle::{ExecutionSnapshot, ExecutionStatus};
    use crate::ids::TransactionId;
    use crate::registry::SessionRegistry;
    use serde_json::json;

    async fn session() -> Arc<SessionEntry> {
        let provider = SimulatorProvider::new();
        let conn = provider.acquire("local", "db").await.unwrap();
        let registry = SessionRegistry::new();
        registry.insert(
            TransactionId::generate(),
            "local".to_string(),
            "db".to_string(),
            conn,
        )
    }

    async fn wait_terminal(entry: &Arc<SessionEntry>) -> ExecutionSnapshot {
        let cell = entry.execution().unwrap().unwrap();
        for _ in 0..500 {
            if cell.status().is_terminal() {
                return cell.snapshot().unwrap();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("execution did not reach a terminal state");
    }

    #[tokio::test]
    async fn batch_with_notices_and_result() {
        let entry = session().await;
        let executor = QueryExecutor::with_poll_interval(Duration::from_millis(1));
        let sql = "DROP TABLE IF EXISTS test_for_notices;\n\nDO $$\nBEGIN\n    RAISE NOTICE 'Hello, world!';\nEND $$;\n\nSELECT 'CHECKING POLLING';";
        executor.start(&entry, sql).unwrap();

        let snap = wait_terminal(&entry).await;
        assert_eq!(snap.status, ExecutionStatus::Completed);
        assert_eq!(
            snap.additional_messages,
            "NOTICE:  table \"test_for_notices\" does not exist, skipping\nNOTICE:  Hello, world!"
        );
        assert_eq!(snap.rows.unwrap()[0][0], json!("CHECKING POLLING"));
    }

    #[tokio::test]
    async fn start_rejected_while_running() {
        let entry = session().await;
        let executor = QueryExecutor::with_poll_interval(Duration::from_millis(1));
        // 1000 notices arrive in chunks, so the first batch stays busy for
        // several driver polls.
        let sql = "DO $$\nBEGIN\n    FOR i in 1..1000 LOOP\n        RAISE NOTICE 'Count is %', i;\n    END LOOP;\nEND $$;";
        executor.start(&entry, sql).unwrap();

        let err = executor.start(&entry, "SELECT 1").unwrap_err();
        assert!(matches!(err, EngineError::ExecutionInProgress));

        let snap = wait_terminal(&entry).await;
        assert_eq!(snap.status, ExecutionStatus::Completed);
        assert_eq!(snap.notice_count, 1000);
        assert!(snap.additional_messages.starts_with("NOTICE:  Count is 1\n"));
        assert!(snap.additional_messages.ends_with("NOTICE:  Count is 1000"));
    }

    #[tokio::test]
    async fn statement_error_fails_execution_and_frees_session() {
        let entry = session().await;
        let executor = QueryExecutor::with_poll_interval(Duration::from_millis(1));
        executor.start(&entry, "SELEC 1").unwrap();

        let snap = wait_terminal(&entry).await;
        assert_eq!(snap.status, ExecutionStatus::Failed);
        assert!(snap.error.unwrap().contains("syntax error"));

        // Failed is terminal, so a new start is accepted.
        executor.start(&entry, "SELECT 'ok'").unwrap();
        let snap = wait_terminal(&entry).await;
        assert_eq!(snap.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn worker_stops_when_cancelled_before_dispatch() {
        let entry = session().await;
        let executor = QueryExecutor::with_poll_interval(Duration::from_millis(1));
        executor.start(&entry, "SELECT 'late'").unwrap();

        // Cancel before the spawned worker gets to run (current-thread
        // runtime: the worker only starts at the first await below).
        let cell = entry.execution().unwrap().unwrap();
        cell.cancel().unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let snap = cell.snapshot().unwrap();
        assert_eq!(snap.status, ExecutionStatus::Cancelled);
        assert!(snap.rows.is_none());
        assert_eq!(snap.notice_count, 0);
    }

    /// Driver double recording the execution status visible at the moment
    /// the statement handle is released.
    struct RecordingConnection {
        cell: std::sync::Mutex<Option<Arc<ExecutionCell>>>,
        status_at_close: std::sync::Mutex<Option<ExecutionStatus>>,
    }

    #[async_trait::async_trait]
    impl DatabaseConnection for RecordingConnection {
        async fn execute(&self, _sql: &str) -> Result<StatementHandle, EngineError> {
            Ok(StatementHandle::new(1))
        }

        async fn poll(&self, _handle: StatementHandle) -> Result<StatementProgress, EngineError> {
            Ok(StatementProgress::Done {
                notices: Vec::new(),
                result: None,
            })
        }

        async fn cancel(&self) -> Result<(), EngineError> {
            Ok(())
        }

        async fn close(&self, _handle: StatementHandle) -> Result<(), EngineError> {
            let cell = self.cell.lock().unwrap().clone();
            if let Some(cell) = cell {
                *self.status_at_close.lock().unwrap() = Some(cell.status());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn statement_handle_released_before_terminal_transition() {
        let connection = Arc::new(RecordingConnection {
            cell: std::sync::Mutex::new(None),
            status_at_close: std::sync::Mutex::new(None),
        });
        let registry = SessionRegistry::new();
        let entry = registry.insert(
            TransactionId::generate(),
            "local".to_string(),
            "db".to_string(),
            Arc::clone(&connection) as Arc<dyn DatabaseConnection>,
        );

        let executor = QueryExecutor::with_poll_interval(Duration::from_millis(1));
        executor.start(&entry, "SELECT 1").unwrap();
        *connection.cell.lock().unwrap() = entry.execution().unwrap();

        let snap = wait_terminal(&entry).await;
        assert_eq!(snap.status, ExecutionStatus::Completed);
        assert_eq!(
            *connection.status_at_close.lock().unwrap(),
            Some(ExecutionStatus::Running)
        );
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let entry = session().await;
        let executor = QueryExecutor::new();
        assert!(matches!(
            executor.start(&entry, "   ;  "),
            Err(EngineError::Statement(_))
        ));
        assert!(entry.execution().unwrap().is_none());
    }
}

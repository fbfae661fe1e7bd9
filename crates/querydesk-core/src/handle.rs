//! Execution handle and its state machine.
//!
//! One [`ExecutionHandle`] represents one in-flight or completed SQL batch
//! execution: status, accumulated row buffer, notice buffer, error state.
//! The handle lives inside an [`ExecutionCell`] with single-writer (the
//! executor's worker task) / multiple-reader (the poll coordinator)
//! semantics: readers always take a cloned snapshot so no lock is held
//! across response building.
//!
//! State machine: Pending → Running → {Completed, Failed, Cancelled}.
//! All notices are absorbed under the same write lock as the terminal
//! transition, so a poll issued exactly at completion still observes every
//! notice emitted up to that point.

use crate::connection::{ColumnInfo, ResultSet, Row};
use crate::error::EngineError;
use crate::notice::NoticeBuffer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::RwLock;

/// Status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Accepted but not yet dispatched to the connection.
    Pending,
    /// Dispatched; the worker is driving the connection.
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// True while a new `start` on the same session must be rejected.
    pub fn is_active(&self) -> bool {
        matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Mutable state of one execution. Only ever touched through the cell.
#[derive(Debug)]
struct ExecutionHandle {
    status: ExecutionStatus,
    sql: String,
    columns: Option<Vec<ColumnInfo>>,
    rows: Vec<Row>,
    has_result: bool,
    /// Offset of rows already delivered to the client via paged polls.
    row_cursor: usize,
    notices: NoticeBuffer,
    error: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

/// Read-only view of an execution, cloned out under a short read lock.
#[derive(Debug, Clone)]
pub struct ExecutionSnapshot {
    pub status: ExecutionStatus,
    pub sql: String,
    pub columns: Option<Vec<ColumnInfo>>,
    pub rows: Option<Vec<Row>>,
    pub notice_count: usize,
    /// Full notice text accumulated to date, newline-joined in emission
    /// order. Always the complete prefix, never a delta.
    pub additional_messages: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionSnapshot {
    /// True once the row buffer is final and safe to hand to the client.
    pub fn result_available(&self) -> bool {
        self.status == ExecutionStatus::Completed && self.rows.is_some()
    }
}

/// Single-writer / snapshot-reader wrapper around one execution handle.
///
/// The executor's worker is the only writer; the poll coordinator only ever
/// calls [`ExecutionCell::snapshot`]. Per-execution locking keeps unrelated
/// sessions from serializing against each other.
#[derive(Debug)]
pub struct ExecutionCell {
    inner: RwLock<ExecutionHandle>,
}

impl ExecutionCell {
    /// Creates a fresh handle in `Pending` for the given batch.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(ExecutionHandle {
                status: ExecutionStatus::Pending,
                sql: sql.into(),
                columns: None,
                rows: Vec::new(),
                has_result: false,
                row_cursor: 0,
                notices: NoticeBuffer::new(),
                error: None,
                started_at: Utc::now(),
                finished_at: None,
            }),
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        match self.inner.read() {
            Ok(handle) => handle.status,
            // A poisoned lock means the worker panicked mid-write; treat the
            // execution as failed rather than propagating the panic.
            Err(poisoned) => poisoned.into_inner().status,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    /// Pending → Running, on dispatch to the connection.
    pub fn mark_running(&self) -> Result<(), EngineError> {
        let mut handle = self.write()?;
        if handle.status == ExecutionStatus::Pending {
            handle.status = ExecutionStatus::Running;
        }
        Ok(())
    }

    /// Streams a batch of notices into the buffer, order preserved.
    pub fn append_notices(&self, notices: Vec<String>) -> Result<(), EngineError> {
        if notices.is_empty() {
            return Ok(());
        }
        let mut handle = self.write()?;
        handle.notices.extend(notices);
        Ok(())
    }

    /// Captures the result set of the first result-producing statement in
    /// the batch. Later result sets are discarded.
    pub fn capture_result(&self, result: ResultSet) -> Result<(), EngineError> {
        let mut handle = self.write()?;
        if !handle.has_result {
            handle.columns = Some(result.columns);
            handle.rows = result.rows;
            handle.has_result = true;
        }
        Ok(())
    }

    /// Terminal transition to `Completed`. Remaining notices are absorbed
    /// under the same write lock as the status change.
    pub fn complete(&self, final_notices: Vec<String>) -> Result<(), EngineError> {
        let mut handle = self.write()?;
        handle.notices.extend(final_notices);
        if handle.status.is_active() {
            handle.status = ExecutionStatus::Completed;
            handle.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Terminal transition to `Failed`. The notices collected so far are
    /// kept; no partial rows are guaranteed.
    pub fn fail(&self, final_notices: Vec<String>, error: impl Into<String>) -> Result<(), EngineError> {
        let mut handle = self.write()?;
        handle.notices.extend(final_notices);
        if handle.status.is_active() {
            handle.status = ExecutionStatus::Failed;
            handle.error = Some(error.into());
            handle.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Terminal transition to `Cancelled`. No-op once terminal.
    pub fn cancel(&self) -> Result<(), EngineError> {
        let mut handle = self.write()?;
        if handle.status.is_active() {
            handle.status = ExecutionStatus::Cancelled;
            handle.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Records the furthest row offset handed out to the client and returns
    /// the updated value. The cursor never moves backwards, so replaying an
    /// earlier page leaves it untouched.
    pub fn advance_cursor(&self, delivered_up_to: usize) -> Result<usize, EngineError> {
        let mut handle = self.write()?;
        if delivered_up_to > handle.row_cursor {
            handle.row_cursor = delivered_up_to.min(handle.rows.len());
        }
        Ok(handle.row_cursor)
    }

    /// Clones the current state out under a short read lock.
    pub fn snapshot(&self) -> Result<ExecutionSnapshot, EngineError> {
        let handle = self
            .inner
            .read()
            .map_err(|e| EngineError::Internal(format!("Failed to acquire read lock: {}", e)))?;
        Ok(ExecutionSnapshot {
            status: handle.status,
            sql: handle.sql.clone(),
            columns: handle.columns.clone(),
            rows: if handle.has_result { Some(handle.rows.clone()) } else { None },
            notice_count: handle.notices.len(),
            additional_messages: handle.notices.drain(),
            error: handle.error.clone(),
            started_at: handle.started_at,
            finished_at: handle.finished_at,
        })
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, ExecutionHandle>, EngineError> {
        self.inner
            .write()
            .map_err(|e| EngineError::Internal(format!("Failed to acquire write lock: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ColumnInfo, ResultSet};
    use serde_json::json;

    fn result_set(value: &str) -> ResultSet {
        ResultSet {
            columns: vec![ColumnInfo::new("?column?")],
            rows: vec![vec![json!(value)]],
        }
    }

    #[test]
    fn lifecycle_pending_running_completed() {
        let cell = ExecutionCell::new("SELECT 1");
        assert_eq!(cell.status(), ExecutionStatus::Pending);

        cell.mark_running().unwrap();
        assert_eq!(cell.status(), ExecutionStatus::Running);
        assert!(cell.is_active());

        cell.capture_result(result_set("one")).unwrap();
        cell.complete(vec!["NOTICE:  done".to_string()]).unwrap();

        let snap = cell.snapshot().unwrap();
        assert_eq!(snap.status, ExecutionStatus::Completed);
        assert!(snap.result_available());
        assert_eq!(snap.additional_messages, "NOTICE:  done");
        assert_eq!(snap.rows.unwrap(), vec![vec![json!("one")]]);
    }

    #[test]
    fn first_result_set_wins() {
        let cell = ExecutionCell::new("SELECT 'a'; SELECT 'b'");
        cell.mark_running().unwrap();
        cell.capture_result(result_set("a")).unwrap();
        cell.capture_result(result_set("b")).unwrap();
        cell.complete(Vec::new()).unwrap();

        let snap = cell.snapshot().unwrap();
        assert_eq!(snap.rows.unwrap(), vec![vec![json!("a")]]);
    }

    #[test]
    fn fail_keeps_notices_collected_so_far() {
        let cell = ExecutionCell::new("SELECT broken");
        cell.mark_running().unwrap();
        cell.append_notices(vec!["NOTICE:  before".to_string()]).unwrap();
        cell.fail(vec!["NOTICE:  at failure".to_string()], "syntax error").unwrap();

        let snap = cell.snapshot().unwrap();
        assert_eq!(snap.status, ExecutionStatus::Failed);
        assert!(!snap.result_available());
        assert_eq!(snap.error.as_deref(), Some("syntax error"));
        assert_eq!(snap.additional_messages, "NOTICE:  before\nNOTICE:  at failure");
    }

    #[test]
    fn cancel_is_noop_after_terminal() {
        let cell = ExecutionCell::new("SELECT 1");
        cell.mark_running().unwrap();
        cell.complete(Vec::new()).unwrap();
        cell.cancel().unwrap();
        assert_eq!(cell.status(), ExecutionStatus::Completed);
    }

    #[test]
    fn cursor_tracks_furthest_delivered_row() {
        let cell = ExecutionCell::new("SELECT * FROM t");
        cell.mark_running().unwrap();
        cell.capture_result(ResultSet {
            columns: vec![ColumnInfo::new("n")],
            rows: (0..5).map(|i| vec![json!(i)]).collect(),
        })
        .unwrap();
        cell.complete(Vec::new()).unwrap();

        assert_eq!(cell.advance_cursor(2).unwrap(), 2);
        assert_eq!(cell.advance_cursor(4).unwrap(), 4);
        // Never moves backwards, never past the buffer
        assert_eq!(cell.advance_cursor(1).unwrap(), 4);
        assert_eq!(cell.advance_cursor(99).unwrap(), 5);
    }

    #[test]
    fn notices_absorbed_atomically_with_completion() {
        // A snapshot taken after complete() must contain every notice.
        let cell = ExecutionCell::new("DO $$ ... $$");
        cell.mark_running().unwrap();
        let tail: Vec<String> = (1..=100).map(|i| format!("NOTICE:  Count is {}", i)).collect();
        cell.complete(tail.clone()).unwrap();

        let snap = cell.snapshot().unwrap();
        assert_eq!(snap.notice_count, 100);
        assert_eq!(snap.additional_messages, tail.join("\n"));
    }
}

//! Poll coordination.
//!
//! A poll is a read-only observation of the session's current execution:
//! it clones a snapshot out of the cell, applies the requested row window,
//! and never blocks on the worker. Polling is idempotent for terminal
//! executions; notices are reported cumulatively, never as deltas.

use crate::connection::{ColumnInfo, Row};
use crate::error::EngineError;
use crate::handle::ExecutionStatus;
use crate::registry::SessionEntry;
use std::sync::Arc;

/// Row paging parameters for one poll. `offset` and `limit` both default
/// to "everything".
#[derive(Debug, Clone, Copy, Default)]
pub struct RowWindow {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl RowWindow {
    pub fn new(offset: Option<usize>, limit: Option<usize>) -> Self {
        Self { offset, limit }
    }

    fn apply(&self, rows: &[Row]) -> (Vec<Row>, usize) {
        let offset = self.offset.unwrap_or(0).min(rows.len());
        let end = match self.limit {
            Some(limit) => offset.saturating_add(limit).min(rows.len()),
            None => rows.len(),
        };
        (rows[offset..end].to_vec(), end)
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone)]
pub struct PollResult {
    pub status: ExecutionStatus,
    /// True when `rows` carries the final result window.
    pub result_available: bool,
    pub columns: Option<Vec<ColumnInfo>>,
    pub rows: Option<Vec<Row>>,
    /// Total rows in the captured result set, independent of the window.
    pub row_count: Option<usize>,
    /// Furthest row offset handed out across all polls of this execution.
    pub rows_delivered: Option<usize>,
    /// All notices accumulated so far, newline-joined in emission order.
    pub additional_messages: String,
    pub error: Option<String>,
}

/// Answers polls against session executions.
#[derive(Default)]
pub struct PollCoordinator;

impl PollCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Observes the session's current execution.
    ///
    /// Fails with [`EngineError::NoActiveQuery`] when no `start` has been
    /// accepted on the session yet. Terminal executions keep answering
    /// polls with the same terminal result.
    pub fn poll(
        &self,
        entry: &Arc<SessionEntry>,
        window: RowWindow,
    ) -> Result<PollResult, EngineError> {
        entry.touch();
        let cell = entry
            .execution()?
            .ok_or_else(|| EngineError::NoActiveQuery(entry.transaction_id().to_string()))?;
        let snapshot = cell.snapshot()?;

        let (columns, rows, row_count, rows_delivered) = if snapshot.result_available() {
            let all_rows = snapshot.rows.unwrap_or_default();
            let total = all_rows.len();
            let (window_rows, delivered_up_to) = window.apply(&all_rows);
            let delivered = cell.advance_cursor(delivered_up_to)?;
            (snapshot.columns, Some(window_rows), Some(total), Some(delivered))
        } else {
            (None, None, None, None)
        };

        Ok(PollResult {
            status: snapshot.status,
            result_available: rows.is_some(),
            columns,
            rows,
            row_count,
            rows_delivered,
            additional_messages: snapshot.additional_messages,
            error: snapshot.error,
        })
    }
}

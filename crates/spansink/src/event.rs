//! Row-change and transaction events flowing through the table sink.
//!
//! Payloads are deliberately codec-free: row images are opaque JSON values,
//! and the sink only ever looks at `commit_ts`.

use crate::model::Ts;
use serde::{Deserialize, Serialize};

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowOp {
    /// Row inserted
    Insert,
    /// Row updated
    Update,
    /// Row deleted
    Delete,
}

/// A single row change captured from the upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowChangedEvent {
    /// Table name
    pub table: String,
    /// Operation type
    pub op: RowOp,
    /// Logical clock of the transaction that produced this row.
    pub start_ts: Ts,
    /// Logical clock at which the transaction committed.
    pub commit_ts: Ts,
    /// Previous row image (for UPDATE/DELETE)
    pub before: Option<serde_json::Value>,
    /// Current row image (for INSERT/UPDATE)
    pub after: Option<serde_json::Value>,
}

impl RowChangedEvent {
    /// Create a new INSERT event
    pub fn insert(
        table: impl Into<String>,
        start_ts: Ts,
        commit_ts: Ts,
        data: serde_json::Value,
    ) -> Self {
        Self {
            table: table.into(),
            op: RowOp::Insert,
            start_ts,
            commit_ts,
            before: None,
            after: Some(data),
        }
    }

    /// Create a new UPDATE event
    pub fn update(
        table: impl Into<String>,
        start_ts: Ts,
        commit_ts: Ts,
        before: Option<serde_json::Value>,
        after: serde_json::Value,
    ) -> Self {
        Self {
            table: table.into(),
            op: RowOp::Update,
            start_ts,
            commit_ts,
            before,
            after: Some(after),
        }
    }

    /// Create a new DELETE event
    pub fn delete(
        table: impl Into<String>,
        start_ts: Ts,
        commit_ts: Ts,
        before: serde_json::Value,
    ) -> Self {
        Self {
            table: table.into(),
            op: RowOp::Delete,
            start_ts,
            commit_ts,
            before: Some(before),
            after: None,
        }
    }
}

/// Rows of one upstream transaction against a single table, sharing one
/// `commit_ts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleTableTxn {
    /// Logical clock of the transaction start.
    pub start_ts: Ts,
    /// Logical clock at which the transaction committed.
    pub commit_ts: Ts,
    /// Rows in upstream order.
    pub rows: Vec<RowChangedEvent>,
}

impl SingleTableTxn {
    /// Create an empty transaction bundle.
    pub fn new(start_ts: Ts, commit_ts: Ts) -> Self {
        Self {
            start_ts,
            commit_ts,
            rows: Vec::new(),
        }
    }

    /// Number of rows in the transaction.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the transaction holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

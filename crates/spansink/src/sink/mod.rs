//! # Per-span table sink
//!
//! The table sink accepts an ordered stream of change events for a single
//! table span, stages them by commit timestamp, flushes them to a pluggable
//! backend in commit order, and reports a monotone checkpoint reflecting
//! downstream durability.
//!
//! ```text
//! producer ──append──▶ EventBuffer ──drain on advance──▶ backend sink
//!                          │                                  │
//!                          └──▶ ProgressTracker ◀────acks─────┘
//!                                    │
//!                                    └──▶ checkpoint_ts
//! ```
//!
//! See [`EventTableSink`] for the public facade and [`EventSink`] for the
//! backend contract.

mod blackhole;
mod buffer;
mod progress;
mod state;
mod table;

pub use blackhole::BlackholeSink;
pub use buffer::EventBuffer;
pub use progress::{AckHandle, ProgressTracker};
pub use state::{SinkState, StateHandle, TableSinkState};
pub use table::{EventTableSink, RowTableSink, TxnTableSink};

use crate::event::{RowChangedEvent, SingleTableTxn};
use crate::model::Ts;

/// An event the table sink can stage and flush.
pub trait SinkEvent: Send + 'static {
    /// The logical clock at which this event committed upstream.
    fn commit_ts(&self) -> Ts;
}

impl SinkEvent for RowChangedEvent {
    fn commit_ts(&self) -> Ts {
        self.commit_ts
    }
}

impl SinkEvent for SingleTableTxn {
    fn commit_ts(&self) -> Ts {
        self.commit_ts
    }
}

/// Strategy for folding appended rows into the staging buffer.
///
/// Implementations must preserve commit-ts order: the buffer is only ever
/// appended to, and consecutive appends carry non-decreasing commit
/// timestamps (producer contract).
pub trait Appender<E: SinkEvent>: Send {
    /// Fold `rows` into `buffer`.
    fn append(&mut self, buffer: &mut EventBuffer<E>, rows: Vec<RowChangedEvent>);
}

/// Stages every row as its own event.
#[derive(Debug, Default)]
pub struct RowEventAppender;

impl Appender<RowChangedEvent> for RowEventAppender {
    fn append(&mut self, buffer: &mut EventBuffer<RowChangedEvent>, rows: Vec<RowChangedEvent>) {
        for row in rows {
            debug_assert!(
                buffer.last_commit_ts().map_or(true, |ts| row.commit_ts >= ts),
                "rows must arrive in commit-ts order"
            );
            buffer.push(row);
        }
    }
}

/// Bundles consecutive rows of the same upstream transaction into a
/// [`SingleTableTxn`]. A row with a new `(start_ts, commit_ts)` pair starts a
/// fresh bundle.
#[derive(Debug, Default)]
pub struct TxnEventAppender;

impl Appender<SingleTableTxn> for TxnEventAppender {
    fn append(&mut self, buffer: &mut EventBuffer<SingleTableTxn>, rows: Vec<RowChangedEvent>) {
        for row in rows {
            debug_assert!(
                buffer.last_commit_ts().map_or(true, |ts| row.commit_ts >= ts),
                "rows must arrive in commit-ts order"
            );
            match buffer.last_mut() {
                Some(txn) if txn.start_ts == row.start_ts && txn.commit_ts == row.commit_ts => {
                    txn.rows.push(row);
                }
                _ => {
                    let mut txn = SingleTableTxn::new(row.start_ts, row.commit_ts);
                    txn.rows.push(row);
                    buffer.push(txn);
                }
            }
        }
    }
}

/// An event decorated with its acknowledgement handle and a read-only view of
/// the owning sink's state, as handed to the backend.
///
/// The backend is required to invoke [`AckHandle::ack`] exactly once after
/// the event is durable (duplicate invocations are tolerated). It may consult
/// `sink_state` to skip work for a stopping sink, but the ack must still be
/// called so the progress accounting drains.
pub struct CallbackableEvent<E> {
    /// The staged event.
    pub event: E,
    /// Single-use durability acknowledgement.
    pub callback: AckHandle,
    /// Read-only view of the owning sink's lifecycle state.
    pub sink_state: StateHandle,
}

/// The pluggable downstream target (MQ, object store, SQL).
pub trait EventSink<E: SinkEvent>: Send + Sync {
    /// Accept a batch into the backend's own queue. Must not block on I/O.
    ///
    /// The batch may be empty: the table sink probes the backend on every
    /// watermark advance so a dead and re-initialized backend is noticed even
    /// when no data is pending.
    fn write_events(&self, batch: Vec<CallbackableEvent<E>>) -> anyhow::Result<()>;

    /// Terminal liveness flag; once true, stays true. A dead backend will
    /// never deliver further acks.
    fn dead(&self) -> bool;
}

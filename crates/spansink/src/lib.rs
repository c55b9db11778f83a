//! # spansink - per-span table sink core for CDC replication
//!
//! A table sink accepts an ordered stream of row/transaction change events
//! for one table span, stages them by commit timestamp, flushes them to a
//! pluggable backend in commit order, and reports a monotonically advancing
//! checkpoint reflecting downstream durability.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐ append / advance ┌──────────────────┐  write_events  ┌─────────┐
//! │ producer ├─────────────────▶│  EventTableSink  ├───────────────▶│ backend │
//! └──────────┘                  │  buffer+tracker  │◀───── acks ────┤  sink   │
//!                               └────────┬─────────┘                └─────────┘
//!                                        │ checkpoint_ts
//!                               ┌────────▼─────────┐
//!                               │    scheduler     │
//!                               └──────────────────┘
//! ```
//!
//! The checkpoint only advances past a watermark once every event flushed
//! before it has been acknowledged, no matter how the acks interleave.
//!
//! ## Quick start
//!
//! ```rust
//! use spansink::{
//!     BlackholeSink, ChangefeedId, EventTableSink, ResolvedTs, RowChangedEvent,
//!     RowEventAppender, SinkMetrics, Span,
//! };
//! use std::sync::Arc;
//!
//! let changefeed = ChangefeedId::new("default", "orders");
//! let metrics = SinkMetrics::new(&changefeed);
//! let sink = EventTableSink::new(
//!     changefeed,
//!     Span::whole_table(1),
//!     0,
//!     Arc::new(BlackholeSink::new()),
//!     RowEventAppender,
//!     metrics,
//! );
//!
//! sink.append_row_changed_events(vec![RowChangedEvent::insert(
//!     "orders",
//!     1,
//!     3,
//!     serde_json::json!({"id": 1}),
//! )]);
//! sink.update_resolved_ts(ResolvedTs::new(5)).unwrap();
//! assert_eq!(sink.checkpoint_ts(), ResolvedTs::new(5));
//! ```
//!
//! The [`config`] module carries the sink configuration model: URI
//! reconciliation, validation, and the compatibility check used before a
//! live reconfiguration.

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod model;
pub mod sink;

pub use config::SinkConfig;
pub use error::{Result, SinkError};
pub use event::{RowChangedEvent, RowOp, SingleTableTxn};
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use model::{ChangefeedId, ResolvedMode, ResolvedTs, Span, Ts};
pub use sink::{
    AckHandle, Appender, BlackholeSink, CallbackableEvent, EventBuffer, EventSink, EventTableSink,
    ProgressTracker, RowEventAppender, RowTableSink, SinkEvent, SinkState, StateHandle,
    TableSinkState, TxnEventAppender, TxnTableSink,
};

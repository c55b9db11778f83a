//! Core identifiers and timestamps shared across the sink.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic unsigned 64-bit logical clock.
pub type Ts = u64;

/// Mode of a resolved-timestamp watermark.
///
/// A `Batch` watermark covers only a prefix of the events at its timestamp
/// (a large transaction split into batches), so at equal `ts` it orders
/// below the final `Normal` watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolvedMode {
    /// Partial watermark emitted while a large transaction is flushed in batches.
    Batch,
    /// Plain watermark: no further events with `commit_ts <= ts` will arrive.
    Normal,
}

/// A resolved-timestamp watermark.
///
/// Totally ordered by `(ts, mode rank, batch_id)`; the progress tracker only
/// accepts non-decreasing advances.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ResolvedTs {
    /// The watermark timestamp.
    pub ts: Ts,
    /// Watermark mode, see [`ResolvedMode`].
    pub mode: ResolvedMode,
    /// Batch sequence within `ts`; zero for normal watermarks.
    pub batch_id: u64,
}

impl ResolvedTs {
    /// The smallest possible watermark.
    pub const MIN: ResolvedTs = ResolvedTs {
        ts: 0,
        mode: ResolvedMode::Batch,
        batch_id: 0,
    };

    /// Create a normal watermark at `ts`.
    pub fn new(ts: Ts) -> Self {
        Self {
            ts,
            mode: ResolvedMode::Normal,
            batch_id: 0,
        }
    }

    /// Create a batch watermark at `ts` with the given batch sequence.
    pub fn with_batch(ts: Ts, batch_id: u64) -> Self {
        Self {
            ts,
            mode: ResolvedMode::Batch,
            batch_id,
        }
    }

    /// Whether this watermark only covers a batch prefix of its timestamp.
    pub fn is_batch_mode(&self) -> bool {
        self.mode == ResolvedMode::Batch
    }
}

impl fmt::Display for ResolvedTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            ResolvedMode::Normal => write!(f, "{}", self.ts),
            ResolvedMode::Batch => write!(f, "{}#{}", self.ts, self.batch_id),
        }
    }
}

/// Identity of a configured replication job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangefeedId {
    /// Tenant namespace the changefeed belongs to.
    pub namespace: String,
    /// Changefeed name, unique within the namespace.
    pub id: String,
}

impl ChangefeedId {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ChangefeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.id)
    }
}

/// A contiguous key range of a single table replica; the unit of sink
/// instantiation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Span {
    /// The table this span belongs to.
    pub table_id: i64,
    /// Inclusive start key.
    pub start_key: Bytes,
    /// Exclusive end key.
    pub end_key: Bytes,
}

impl Span {
    pub fn new(table_id: i64, start_key: impl Into<Bytes>, end_key: impl Into<Bytes>) -> Self {
        Self {
            table_id,
            start_key: start_key.into(),
            end_key: end_key.into(),
        }
    }

    /// Span covering the whole key range of a table.
    pub fn whole_table(table_id: i64) -> Self {
        Self {
            table_id,
            start_key: Bytes::new(),
            end_key: Bytes::new(),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:[", self.table_id)?;
        for b in self.start_key.iter() {
            write!(f, "{b:02x}")?;
        }
        write!(f, ", ")?;
        for b in self.end_key.iter() {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

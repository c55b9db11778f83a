//! Lifecycle state of a table sink.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle state. Transitions are monotone:
/// `Sinking -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SinkState {
    /// Accepting appends and flushing to the backend.
    Sinking = 0,
    /// Frozen; draining outstanding acknowledgements.
    Stopping = 1,
    /// Terminal; no callback can mutate tracker state anymore.
    Stopped = 2,
}

impl SinkState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SinkState::Sinking,
            1 => SinkState::Stopping,
            _ => SinkState::Stopped,
        }
    }
}

impl fmt::Display for SinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkState::Sinking => write!(f, "sinking"),
            SinkState::Stopping => write!(f, "stopping"),
            SinkState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Atomic cell holding a [`SinkState`], CAS-mutated by the sink facade.
#[derive(Debug)]
pub struct TableSinkState {
    inner: AtomicU8,
}

impl TableSinkState {
    pub fn new() -> Self {
        Self {
            inner: AtomicU8::new(SinkState::Sinking as u8),
        }
    }

    pub fn load(&self) -> SinkState {
        SinkState::from_u8(self.inner.load(Ordering::Acquire))
    }

    /// Transition `current -> next`; returns false if the observed state
    /// changed in between.
    pub fn transition(&self, current: SinkState, next: SinkState) -> bool {
        self.inner
            .compare_exchange(
                current as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for TableSinkState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only capability over a sink's state, handed to backend callbacks.
///
/// Callbacks may use it to skip per-event work once the sink is stopping,
/// but they must still invoke the ack so the progress accounting drains.
#[derive(Debug, Clone)]
pub struct StateHandle {
    state: Arc<TableSinkState>,
}

impl StateHandle {
    pub(crate) fn new(state: &Arc<TableSinkState>) -> Self {
        Self {
            state: Arc::clone(state),
        }
    }

    /// Current lifecycle state.
    pub fn get(&self) -> SinkState {
        self.state.load()
    }

    /// Whether the sink has left the `Sinking` state.
    pub fn is_stopping(&self) -> bool {
        self.state.load() != SinkState::Sinking
    }
}

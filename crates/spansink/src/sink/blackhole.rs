//! A backend sink that discards everything, for tests and benchmarks.

use super::{CallbackableEvent, EventSink, SinkEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Discards every event and acknowledges it immediately.
///
/// Matches the `blackhole://` sink URI scheme; any protocol is accepted.
#[derive(Debug, Default)]
pub struct BlackholeSink {
    events_total: AtomicU64,
}

impl BlackholeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events swallowed so far.
    pub fn events_total(&self) -> u64 {
        self.events_total.load(Ordering::Relaxed)
    }
}

impl<E: SinkEvent> EventSink<E> for BlackholeSink {
    fn write_events(&self, batch: Vec<CallbackableEvent<E>>) -> anyhow::Result<()> {
        if !batch.is_empty() {
            self.events_total
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            debug!(events = batch.len(), "blackhole sink swallowed a batch");
        }
        for event in batch {
            event.callback.ack();
        }
        Ok(())
    }

    fn dead(&self) -> bool {
        false
    }
}

//! The per-span event table sink facade.

use super::buffer::EventBuffer;
use super::progress::ProgressTracker;
use super::state::{SinkState, StateHandle, TableSinkState};
use super::{Appender, CallbackableEvent, EventSink, RowEventAppender, SinkEvent, TxnEventAppender};
use crate::error::{Result, SinkError};
use crate::event::{RowChangedEvent, SingleTableTxn};
use crate::metrics::SinkMetrics;
use crate::model::{ChangefeedId, ResolvedTs, Span, Ts};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// State touched only by the single producer actor. Behind a mutex purely so
/// the sink can be shared across threads; the lock is uncontended.
struct Producer<E, A> {
    appender: A,
    buffer: EventBuffer<E>,
    max_resolved_ts: ResolvedTs,
}

/// A table sink that writes events of type `E` staged by appender strategy
/// `A`.
///
/// One instance exists per `(changefeed, span)` assignment. The producer
/// appends events and advances the watermark, the backend acknowledges
/// writes from its own threads, and the scheduler polls [`checkpoint_ts`]
/// or drives the close protocol.
///
/// [`checkpoint_ts`]: EventTableSink::checkpoint_ts
pub struct EventTableSink<E: SinkEvent, A: Appender<E>> {
    changefeed_id: ChangefeedId,
    span: Span,
    start_ts: Ts,

    backend: Arc<dyn EventSink<E>>,
    progress: ProgressTracker,
    state: Arc<TableSinkState>,
    producer: Mutex<Producer<E, A>>,
    metrics: SinkMetrics,
}

/// Sink staging every row as its own event.
pub type RowTableSink = EventTableSink<RowChangedEvent, RowEventAppender>;
/// Sink staging rows bundled per upstream transaction.
pub type TxnTableSink = EventTableSink<SingleTableTxn, TxnEventAppender>;

impl<E: SinkEvent, A: Appender<E>> EventTableSink<E, A> {
    /// Create a table sink over `backend`. `start_ts` is the initial
    /// checkpoint of the span.
    pub fn new(
        changefeed_id: ChangefeedId,
        span: Span,
        start_ts: Ts,
        backend: Arc<dyn EventSink<E>>,
        appender: A,
        metrics: SinkMetrics,
    ) -> Self {
        let progress = ProgressTracker::new(span.clone(), ResolvedTs::new(start_ts));
        Self {
            changefeed_id,
            span,
            start_ts,
            backend,
            progress,
            state: Arc::new(TableSinkState::new()),
            producer: Mutex::new(Producer {
                appender,
                buffer: EventBuffer::new(),
                max_resolved_ts: ResolvedTs::new(start_ts),
            }),
            metrics,
        }
    }

    /// Append row changed events to the staging buffer.
    ///
    /// Never blocks and never fails; rows offered to a sink that is no
    /// longer sinking are dropped.
    pub fn append_row_changed_events(&self, rows: Vec<RowChangedEvent>) {
        let state = self.state.load();
        if state != SinkState::Sinking {
            warn!(
                changefeed = %self.changefeed_id,
                span = %self.span,
                %state,
                dropped = rows.len(),
                "dropping rows appended to a non-sinking table sink"
            );
            return;
        }
        let n = rows.len();
        let mut guard = self.producer.lock();
        let Producer {
            appender, buffer, ..
        } = &mut *guard;
        appender.append(buffer, rows);
        drop(guard);
        self.metrics.record_appended_rows(n);
    }

    /// Advance the resolved watermark, flushing every staged event with
    /// `commit_ts <= resolved.ts` to the backend.
    ///
    /// A watermark at or below the current maximum is a no-op. The backend
    /// is probed with an empty batch even when nothing qualifies, so a dead
    /// and re-initialized backend is noticed. Backend errors are wrapped as
    /// [`SinkError::Internal`] and returned; the sink state is untouched,
    /// the scheduler decides whether to tear the span down.
    pub fn update_resolved_ts(&self, resolved: ResolvedTs) -> Result<()> {
        let mut guard = self.producer.lock();
        if guard.max_resolved_ts >= resolved {
            return Ok(());
        }
        guard.max_resolved_ts = resolved;
        let drained = guard.buffer.drain_up_to(&resolved);
        drop(guard);

        // Despite the lack of data we still move progress forward: the
        // watermark is recorded and the backend probed for liveness.
        if drained.is_empty() {
            self.progress.add_resolved_ts(resolved);
            self.metrics.record_probe_write();
            return self
                .backend
                .write_events(Vec::new())
                .map_err(SinkError::internal);
        }

        let mut batch = Vec::with_capacity(drained.len());
        for event in drained {
            batch.push(CallbackableEvent {
                event,
                callback: self.progress.add_event(),
                sink_state: StateHandle::new(&self.state),
            });
        }
        // The watermark must sit behind its events in the tracker before
        // the backend sees the batch: a fast backend may ack synchronously
        // from inside write_events.
        self.progress.add_resolved_ts(resolved);
        self.metrics.record_flushed_batch(batch.len());
        self.backend.write_events(batch).map_err(SinkError::internal)
    }

    /// Current checkpoint of the span.
    ///
    /// Non-decreasing across calls. While stopping, this doubles as an
    /// opportunistic close probe.
    pub fn checkpoint_ts(&self) -> ResolvedTs {
        if self.state.load() == SinkState::Stopping
            && self.progress.check_closed(self.backend.dead())
        {
            self.mark_as_closed();
        }
        self.progress.advance()
    }

    /// Close the table sink, waiting until every outstanding write is
    /// acknowledged or the backend is declared dead. Idempotent; after it
    /// returns no callback can still mutate tracker state.
    pub async fn close(&self) {
        self.freeze();
        self.progress.wait_closed(|| self.backend.dead()).await;
        self.mark_as_closed();
    }

    /// Non-blocking close attempt; returns true once the sink is stopped.
    /// The scheduler is expected to keep polling until it is.
    pub fn async_close(&self) -> bool {
        self.freeze();
        if self.progress.check_closed(self.backend.dead()) {
            self.mark_as_closed();
            return true;
        }
        false
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SinkState {
        self.state.load()
    }

    /// Initial checkpoint this sink was created at.
    pub fn start_ts(&self) -> Ts {
        self.start_ts
    }

    /// Snapshot of this sink's flush counters.
    pub fn metrics(&self) -> &SinkMetrics {
        &self.metrics
    }

    fn freeze(&self) {
        // The tracker must freeze before the state flips, otherwise a
        // watermark racing the transition could advance the checkpoint past
        // events the backend drops while stopping.
        self.progress.freeze_process();

        loop {
            let current = self.state.load();
            if current == SinkState::Stopping || current == SinkState::Stopped {
                break;
            }
            if self.state.transition(current, SinkState::Stopping) {
                let checkpoint = self.checkpoint_ts();
                info!(
                    changefeed = %self.changefeed_id,
                    span = %self.span,
                    checkpoint_ts = %checkpoint,
                    "stopping table sink"
                );
                break;
            }
        }
    }

    fn mark_as_closed(&self) {
        loop {
            let current = self.state.load();
            if current == SinkState::Stopped {
                return;
            }
            if self.state.transition(current, SinkState::Stopped) {
                let checkpoint = self.progress.advance();
                info!(
                    changefeed = %self.changefeed_id,
                    span = %self.span,
                    checkpoint_ts = %checkpoint,
                    "table sink stopped"
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Backend that parks accepted events until the test acks them.
    #[derive(Default)]
    struct MockSink {
        dead: AtomicBool,
        fail_writes: AtomicBool,
        batches: Mutex<Vec<Vec<CallbackableEvent<RowChangedEvent>>>>,
    }

    impl MockSink {
        fn ack_all(&self) {
            for batch in self.batches.lock().iter() {
                for event in batch {
                    event.callback.ack();
                }
            }
        }

        fn write_count(&self) -> usize {
            self.batches.lock().len()
        }
    }

    impl EventSink<RowChangedEvent> for MockSink {
        fn write_events(&self, batch: Vec<CallbackableEvent<RowChangedEvent>>) -> anyhow::Result<()> {
            if self.fail_writes.load(Ordering::Acquire) {
                anyhow::bail!("enqueue refused");
            }
            self.batches.lock().push(batch);
            Ok(())
        }

        fn dead(&self) -> bool {
            self.dead.load(Ordering::Acquire)
        }
    }

    fn row(commit_ts: Ts) -> RowChangedEvent {
        RowChangedEvent::insert("t", commit_ts - 1, commit_ts, json!({}))
    }

    fn sink(backend: Arc<MockSink>) -> RowTableSink {
        let changefeed = ChangefeedId::new("default", "cf");
        let metrics = SinkMetrics::new(&changefeed);
        EventTableSink::new(
            changefeed,
            Span::whole_table(1),
            0,
            backend,
            RowEventAppender,
            metrics,
        )
    }

    #[test]
    fn test_events_flush_in_commit_order() {
        let backend = Arc::new(MockSink::default());
        let s = sink(Arc::clone(&backend));

        s.append_row_changed_events(vec![row(3), row(5), row(7)]);
        s.update_resolved_ts(ResolvedTs::new(6)).unwrap();

        let batches = backend.batches.lock();
        assert_eq!(batches.len(), 1);
        let commits: Vec<Ts> = batches[0].iter().map(|e| e.event.commit_ts).collect();
        assert_eq!(commits, vec![3, 5]);
    }

    #[test]
    fn test_checkpoint_waits_for_acks() {
        let backend = Arc::new(MockSink::default());
        let s = sink(Arc::clone(&backend));

        s.append_row_changed_events(vec![row(3), row(5)]);
        s.update_resolved_ts(ResolvedTs::new(6)).unwrap();
        assert_eq!(s.checkpoint_ts(), ResolvedTs::new(0));

        backend.ack_all();
        assert_eq!(s.checkpoint_ts(), ResolvedTs::new(6));
    }

    #[test]
    fn test_non_monotone_advance_is_a_no_op() {
        let backend = Arc::new(MockSink::default());
        let s = sink(Arc::clone(&backend));

        s.update_resolved_ts(ResolvedTs::new(50)).unwrap();
        assert_eq!(backend.write_count(), 1);
        s.update_resolved_ts(ResolvedTs::new(30)).unwrap();
        s.update_resolved_ts(ResolvedTs::new(50)).unwrap();
        // No further backend writes for stale watermarks.
        assert_eq!(backend.write_count(), 1);
        assert_eq!(s.checkpoint_ts(), ResolvedTs::new(50));
    }

    #[test]
    fn test_empty_advance_probes_backend() {
        let backend = Arc::new(MockSink::default());
        let s = sink(Arc::clone(&backend));

        s.update_resolved_ts(ResolvedTs::new(100)).unwrap();
        assert_eq!(backend.write_count(), 1);
        assert!(backend.batches.lock()[0].is_empty());
        assert_eq!(s.checkpoint_ts(), ResolvedTs::new(100));
        assert_eq!(s.metrics().snapshot().probe_writes, 1);
    }

    #[test]
    fn test_backend_error_is_wrapped_and_state_kept() {
        let backend = Arc::new(MockSink::default());
        let s = sink(Arc::clone(&backend));
        backend.fail_writes.store(true, Ordering::Release);

        s.append_row_changed_events(vec![row(3)]);
        let err = s.update_resolved_ts(ResolvedTs::new(5)).unwrap_err();
        assert!(err.is_internal());
        assert_eq!(s.state(), SinkState::Sinking);
    }

    #[test]
    fn test_appends_dropped_after_freeze() {
        let backend = Arc::new(MockSink::default());
        let s = sink(Arc::clone(&backend));

        assert!(s.async_close());
        assert_eq!(s.state(), SinkState::Stopped);

        s.append_row_changed_events(vec![row(3)]);
        s.update_resolved_ts(ResolvedTs::new(5)).unwrap();
        // The row was dropped, so the advance only probes.
        assert!(backend.batches.lock().iter().all(|b| b.is_empty()));
    }

    #[test]
    fn test_async_close_waits_for_pending_acks() {
        let backend = Arc::new(MockSink::default());
        let s = sink(Arc::clone(&backend));

        s.append_row_changed_events(vec![row(3)]);
        s.update_resolved_ts(ResolvedTs::new(5)).unwrap();

        assert!(!s.async_close());
        assert_eq!(s.state(), SinkState::Stopping);

        backend.ack_all();
        assert!(s.async_close());
        assert_eq!(s.state(), SinkState::Stopped);
        assert_eq!(s.checkpoint_ts(), ResolvedTs::new(5));
    }

    #[test]
    fn test_checkpoint_probe_closes_stopping_sink() {
        let backend = Arc::new(MockSink::default());
        let s = sink(Arc::clone(&backend));

        s.append_row_changed_events(vec![row(3)]);
        s.update_resolved_ts(ResolvedTs::new(5)).unwrap();
        assert!(!s.async_close());

        backend.ack_all();
        assert_eq!(s.checkpoint_ts(), ResolvedTs::new(5));
        assert_eq!(s.state(), SinkState::Stopped);
    }

    #[tokio::test]
    async fn test_close_unblocks_when_backend_dies() {
        let backend = Arc::new(MockSink::default());
        let s = Arc::new(sink(Arc::clone(&backend)));

        s.append_row_changed_events(vec![row(3)]);
        s.update_resolved_ts(ResolvedTs::new(5)).unwrap();

        let closer = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.close().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        // Backend never acks, then dies.
        backend.dead.store(true, Ordering::Release);
        closer.await.unwrap();

        assert_eq!(s.state(), SinkState::Stopped);
        assert_eq!(s.checkpoint_ts(), ResolvedTs::new(5));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let backend = Arc::new(MockSink::default());
        let s = sink(Arc::clone(&backend));
        s.close().await;
        s.close().await;
        assert_eq!(s.state(), SinkState::Stopped);
    }
}

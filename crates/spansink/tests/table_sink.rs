//! Table sink integration tests
//!
//! End-to-end behavior of the per-span sink against a controllable backend:
//! - commit-order flushing sliced by the resolved watermark
//! - checkpoint gating on out-of-order acknowledgements
//! - liveness probes on empty advances
//! - the close protocol, with and without a dead backend
//! - checkpoint monotonicity under concurrent acks

use parking_lot::Mutex;
use spansink::{
    AckHandle, CallbackableEvent, ChangefeedId, EventSink, EventTableSink, ResolvedTs,
    RowChangedEvent, RowEventAppender, RowTableSink, SinkMetrics, SinkState, Span, Ts,
    TxnEventAppender, TxnTableSink,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Backend that parks accepted events until the test acknowledges them.
#[derive(Default)]
struct ControlledSink {
    dead: AtomicBool,
    batches: Mutex<Vec<Vec<CallbackableEvent<RowChangedEvent>>>>,
}

impl ControlledSink {
    fn ack_commit_ts(&self, ts: Ts) {
        for batch in self.batches.lock().iter() {
            for event in batch {
                if event.event.commit_ts == ts {
                    event.callback.ack();
                }
            }
        }
    }

    fn flushed_commit_ts(&self) -> Vec<Ts> {
        self.batches
            .lock()
            .iter()
            .flatten()
            .map(|e| e.event.commit_ts)
            .collect()
    }

    fn ack_handles(&self) -> Vec<AckHandle> {
        self.batches
            .lock()
            .iter()
            .flatten()
            .map(|e| e.callback.clone())
            .collect()
    }

    fn write_count(&self) -> usize {
        self.batches.lock().len()
    }

    fn kill(&self) {
        self.dead.store(true, Ordering::Release);
    }
}

impl EventSink<RowChangedEvent> for ControlledSink {
    fn write_events(&self, batch: Vec<CallbackableEvent<RowChangedEvent>>) -> anyhow::Result<()> {
        self.batches.lock().push(batch);
        Ok(())
    }

    fn dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }
}

fn row(commit_ts: Ts) -> RowChangedEvent {
    RowChangedEvent::insert("orders", commit_ts - 1, commit_ts, serde_json::json!({}))
}

fn row_sink(backend: Arc<ControlledSink>) -> RowTableSink {
    let changefeed = ChangefeedId::new("default", "orders-to-kafka");
    let metrics = SinkMetrics::new(&changefeed);
    EventTableSink::new(
        changefeed,
        Span::whole_table(42),
        0,
        backend,
        RowEventAppender,
        metrics,
    )
}

// ============================================================================
// Watermark and checkpoint behavior
// ============================================================================

#[test]
fn test_plain_advance() {
    let backend = Arc::new(ControlledSink::default());
    let sink = row_sink(Arc::clone(&backend));

    sink.append_row_changed_events(vec![row(3), row(5), row(7)]);
    sink.update_resolved_ts(ResolvedTs::new(6)).unwrap();
    assert_eq!(backend.flushed_commit_ts(), vec![3, 5]);

    backend.ack_commit_ts(3);
    backend.ack_commit_ts(5);
    assert_eq!(sink.checkpoint_ts(), ResolvedTs::new(6));

    sink.update_resolved_ts(ResolvedTs::new(10)).unwrap();
    assert_eq!(backend.flushed_commit_ts(), vec![3, 5, 7]);
    backend.ack_commit_ts(7);
    assert_eq!(sink.checkpoint_ts(), ResolvedTs::new(10));
}

#[test]
fn test_out_of_order_acks() {
    let backend = Arc::new(ControlledSink::default());
    let sink = row_sink(Arc::clone(&backend));

    sink.append_row_changed_events(vec![row(3), row(5), row(7)]);
    sink.update_resolved_ts(ResolvedTs::new(10)).unwrap();

    backend.ack_commit_ts(7);
    assert_eq!(sink.checkpoint_ts(), ResolvedTs::new(0));
    backend.ack_commit_ts(3);
    assert_eq!(sink.checkpoint_ts(), ResolvedTs::new(0));
    backend.ack_commit_ts(5);
    assert_eq!(sink.checkpoint_ts(), ResolvedTs::new(10));
}

#[test]
fn test_advance_with_no_events_probes_backend() {
    let backend = Arc::new(ControlledSink::default());
    let sink = row_sink(Arc::clone(&backend));

    sink.update_resolved_ts(ResolvedTs::new(100)).unwrap();

    // The backend saw exactly one empty probe batch.
    assert_eq!(backend.write_count(), 1);
    assert!(backend.batches.lock()[0].is_empty());
    assert_eq!(sink.checkpoint_ts(), ResolvedTs::new(100));
}

#[test]
fn test_duplicate_and_stale_advance_is_a_no_op() {
    let backend = Arc::new(ControlledSink::default());
    let sink = row_sink(Arc::clone(&backend));

    sink.update_resolved_ts(ResolvedTs::new(50)).unwrap();
    assert_eq!(backend.write_count(), 1);

    sink.update_resolved_ts(ResolvedTs::new(30)).unwrap();
    sink.update_resolved_ts(ResolvedTs::new(50)).unwrap();
    assert_eq!(backend.write_count(), 1, "stale watermarks must not reach the backend");
    assert_eq!(sink.checkpoint_ts(), ResolvedTs::new(50));

    // Later rows are still gated on the 50 watermark already seen.
    sink.append_row_changed_events(vec![row(60)]);
    sink.update_resolved_ts(ResolvedTs::new(60)).unwrap();
    backend.ack_commit_ts(60);
    assert_eq!(sink.checkpoint_ts(), ResolvedTs::new(60));
}

#[test]
fn test_flushed_events_are_a_prefix_of_the_append_stream() {
    let backend = Arc::new(ControlledSink::default());
    let sink = row_sink(Arc::clone(&backend));

    let commits: Vec<Ts> = vec![2, 4, 4, 6, 9, 12, 15];
    sink.append_row_changed_events(commits.iter().map(|ts| row(*ts)).collect());

    for watermark in [5, 9, 11, 20] {
        sink.update_resolved_ts(ResolvedTs::new(watermark)).unwrap();
        let flushed = backend.flushed_commit_ts();
        assert_eq!(commits[..flushed.len()], flushed[..]);
    }
    assert_eq!(backend.flushed_commit_ts(), commits);
}

#[test]
fn test_batch_watermarks_advance_within_one_commit_ts() {
    let backend = Arc::new(ControlledSink::default());
    let sink = row_sink(Arc::clone(&backend));

    sink.append_row_changed_events(vec![row(5), row(5)]);
    sink.update_resolved_ts(ResolvedTs::with_batch(5, 1)).unwrap();
    backend.ack_commit_ts(5);
    assert_eq!(sink.checkpoint_ts(), ResolvedTs::with_batch(5, 1));

    sink.update_resolved_ts(ResolvedTs::new(5)).unwrap();
    assert_eq!(sink.checkpoint_ts(), ResolvedTs::new(5));
}

// ============================================================================
// Transaction bundling
// ============================================================================

#[test]
fn test_txn_sink_bundles_rows_per_transaction() {
    #[derive(Default)]
    struct TxnCapture {
        batches: Mutex<Vec<Vec<spansink::CallbackableEvent<spansink::SingleTableTxn>>>>,
    }

    impl EventSink<spansink::SingleTableTxn> for TxnCapture {
        fn write_events(
            &self,
            batch: Vec<spansink::CallbackableEvent<spansink::SingleTableTxn>>,
        ) -> anyhow::Result<()> {
            for event in &batch {
                event.callback.ack();
            }
            self.batches.lock().push(batch);
            Ok(())
        }

        fn dead(&self) -> bool {
            false
        }
    }

    let backend = Arc::new(TxnCapture::default());
    let changefeed = ChangefeedId::new("default", "orders-to-mysql");
    let metrics = SinkMetrics::new(&changefeed);
    let sink: TxnTableSink = EventTableSink::new(
        changefeed,
        Span::whole_table(7),
        0,
        Arc::clone(&backend) as Arc<dyn EventSink<spansink::SingleTableTxn>>,
        TxnEventAppender,
        metrics,
    );

    sink.append_row_changed_events(vec![row(3), row(3), row(5)]);
    sink.update_resolved_ts(ResolvedTs::new(10)).unwrap();

    let batches = backend.batches.lock();
    let txns: Vec<(Ts, usize)> = batches
        .iter()
        .flatten()
        .map(|e| (e.event.commit_ts, e.event.len()))
        .collect();
    assert_eq!(txns, vec![(3, 2), (5, 1)]);
    drop(batches);

    assert_eq!(sink.checkpoint_ts(), ResolvedTs::new(10));
}

// ============================================================================
// Close protocol
// ============================================================================

#[tokio::test]
async fn test_close_drains_acked_sink() {
    let backend = Arc::new(ControlledSink::default());
    let sink = row_sink(Arc::clone(&backend));

    sink.append_row_changed_events(vec![row(3)]);
    sink.update_resolved_ts(ResolvedTs::new(5)).unwrap();
    backend.ack_commit_ts(3);

    sink.close().await;
    assert_eq!(sink.state(), SinkState::Stopped);
    assert_eq!(sink.checkpoint_ts(), ResolvedTs::new(5));
}

#[tokio::test]
async fn test_close_with_dead_backend() {
    let backend = Arc::new(ControlledSink::default());
    let sink = row_sink(Arc::clone(&backend));

    sink.append_row_changed_events(vec![row(3)]);
    sink.update_resolved_ts(ResolvedTs::new(5)).unwrap();

    // The backend never acks and then dies; close must not hang and the
    // checkpoint lands on the last enqueued watermark.
    backend.kill();
    sink.close().await;

    assert_eq!(sink.state(), SinkState::Stopped);
    assert_eq!(sink.checkpoint_ts(), ResolvedTs::new(5));
}

#[test]
fn test_async_close_polled_by_scheduler() {
    let backend = Arc::new(ControlledSink::default());
    let sink = row_sink(Arc::clone(&backend));

    sink.append_row_changed_events(vec![row(3)]);
    sink.update_resolved_ts(ResolvedTs::new(5)).unwrap();

    assert!(!sink.async_close());
    assert!(!sink.async_close());
    assert_eq!(sink.state(), SinkState::Stopping);

    backend.ack_commit_ts(3);
    assert!(sink.async_close());
    assert_eq!(sink.state(), SinkState::Stopped);
}

#[test]
fn test_frozen_sink_ignores_later_watermarks() {
    let backend = Arc::new(ControlledSink::default());
    let sink = row_sink(Arc::clone(&backend));

    sink.append_row_changed_events(vec![row(3)]);
    sink.update_resolved_ts(ResolvedTs::new(5)).unwrap();
    assert!(!sink.async_close());

    // A watermark arriving after the freeze must not lift the checkpoint.
    sink.update_resolved_ts(ResolvedTs::new(50)).unwrap();
    backend.ack_commit_ts(3);
    assert_eq!(sink.checkpoint_ts(), ResolvedTs::new(5));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_checkpoint_is_monotone_under_concurrent_acks() {
    const EVENTS: u64 = 256;
    const ACKERS: u64 = 4;

    let backend = Arc::new(ControlledSink::default());
    let sink = Arc::new(row_sink(Arc::clone(&backend)));

    sink.append_row_changed_events((1..=EVENTS).map(row).collect());
    sink.update_resolved_ts(ResolvedTs::new(EVENTS)).unwrap();

    let handles = backend.ack_handles();
    assert_eq!(handles.len(), EVENTS as usize);

    // Ack from several threads, each covering a stride in reverse order and
    // double-invoking every handle.
    let mut ackers = Vec::new();
    for k in 0..ACKERS {
        let mine: Vec<AckHandle> = handles
            .iter()
            .enumerate()
            .filter(|(i, _)| *i as u64 % ACKERS == k)
            .map(|(_, h)| h.clone())
            .rev()
            .collect();
        ackers.push(std::thread::spawn(move || {
            for handle in &mine {
                handle.ack();
                handle.ack();
            }
        }));
    }

    // Observe the checkpoint while the storm runs: it must never go back.
    let mut last = ResolvedTs::new(0);
    while last < ResolvedTs::new(EVENTS) {
        let current = sink.checkpoint_ts();
        assert!(current >= last, "checkpoint went backwards: {current} < {last}");
        last = current;
        tokio::task::yield_now().await;
    }

    for acker in ackers {
        acker.join().unwrap();
    }
    assert_eq!(sink.checkpoint_ts(), ResolvedTs::new(EVENTS));

    sink.close().await;
    assert_eq!(sink.state(), SinkState::Stopped);
}

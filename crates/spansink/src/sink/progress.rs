//! Progress tracking for in-flight events and resolved-ts watermarks.
//!
//! The tracker owns an ordered queue of pending items: one entry per event
//! handed to the backend, interleaved with the watermarks that cover them.
//! Acknowledgements arrive out of order from arbitrary backend threads; the
//! exposed frontier only advances past a watermark once every event queued
//! before it has been acknowledged.

use crate::model::{ResolvedTs, Span};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::warn;

/// Items per pending-queue segment. Segments bound pop-time cache pressure
/// and are freed front-to-back as the queue drains; no item is ever
/// relocated.
const DEFAULT_BUFFER_SIZE: usize = 512;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STUCK_WARN_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
enum Pending {
    /// One in-flight write, identified by its ack id.
    Event { ack_id: u64 },
    /// A watermark to surface once every earlier event is acknowledged.
    Resolved { resolved: ResolvedTs },
}

#[derive(Debug)]
struct TrackerInner {
    /// Segmented FIFO of pending items; `head_offset` indexes into the front
    /// segment.
    segments: VecDeque<Vec<Pending>>,
    head_offset: usize,
    pending_len: usize,

    /// Next ack id to allocate. Ids are handed out and popped in increasing
    /// order.
    next_ack_id: u64,
    /// Every event with an id below this has already been popped; acks for
    /// them are late duplicates and ignored.
    first_unpopped_id: u64,
    /// Ids acknowledged by the backend but not yet popped.
    acked: HashSet<u64>,

    /// Set once the owning sink starts stopping; watermarks offered after
    /// that are dropped so the frontier cannot outrun dropped writes.
    frozen: bool,
    /// Largest watermark ever accepted.
    last_resolved: ResolvedTs,
    /// Largest watermark known safe: every event at or below it is durable.
    frontier: ResolvedTs,
}

impl TrackerInner {
    fn push(&mut self, item: Pending, segment_size: usize) {
        match self.segments.back_mut() {
            Some(seg) if seg.len() < segment_size => seg.push(item),
            _ => {
                let mut seg = Vec::with_capacity(segment_size);
                seg.push(item);
                self.segments.push_back(seg);
            }
        }
        self.pending_len += 1;
    }

    fn head(&self) -> Option<Pending> {
        if self.pending_len == 0 {
            return None;
        }
        self.segments.front().map(|seg| seg[self.head_offset])
    }

    fn pop_head(&mut self) {
        self.head_offset += 1;
        self.pending_len -= 1;
        if let Some(seg) = self.segments.front() {
            if self.head_offset == seg.len() {
                self.segments.pop_front();
                self.head_offset = 0;
            }
        }
    }

    /// Pop acknowledged events and the watermarks they unblock.
    fn advance(&mut self) {
        while let Some(item) = self.head() {
            match item {
                Pending::Event { ack_id } => {
                    if !self.acked.remove(&ack_id) {
                        break;
                    }
                    self.first_unpopped_id = ack_id + 1;
                    self.pop_head();
                }
                Pending::Resolved { resolved } => {
                    self.frontier = resolved;
                    self.pop_head();
                }
            }
        }
    }

    /// Drop all remaining accounting. Only valid once no further acks
    /// matter (dead backend).
    fn release(&mut self) {
        self.segments.clear();
        self.head_offset = 0;
        self.pending_len = 0;
        self.first_unpopped_id = self.next_ack_id;
        self.acked.clear();
    }
}

#[derive(Debug)]
struct TrackerShared {
    inner: Mutex<TrackerInner>,
    ack_notify: Notify,
}

/// Accounts for in-flight events and resolved-ts watermarks of one table
/// span and computes the largest safe checkpoint.
///
/// Internally synchronised: the producer enqueues, the backend acknowledges
/// from arbitrary threads, and any thread may read the frontier.
#[derive(Debug)]
pub struct ProgressTracker {
    span: Span,
    segment_size: usize,
    shared: Arc<TrackerShared>,
}

impl ProgressTracker {
    /// Create a tracker whose frontier starts at `start`.
    pub fn new(span: Span, start: ResolvedTs) -> Self {
        Self::with_buffer_size(span, start, DEFAULT_BUFFER_SIZE)
    }

    pub(crate) fn with_buffer_size(span: Span, start: ResolvedTs, segment_size: usize) -> Self {
        Self {
            span,
            segment_size,
            shared: Arc::new(TrackerShared {
                inner: Mutex::new(TrackerInner {
                    segments: VecDeque::new(),
                    head_offset: 0,
                    pending_len: 0,
                    next_ack_id: 0,
                    first_unpopped_id: 0,
                    acked: HashSet::new(),
                    frozen: false,
                    last_resolved: start,
                    frontier: start,
                }),
                ack_notify: Notify::new(),
            }),
        }
    }

    /// Register one in-flight event and return its acknowledgement handle.
    pub fn add_event(&self) -> AckHandle {
        let mut inner = self.shared.inner.lock();
        let id = inner.next_ack_id;
        inner.next_ack_id += 1;
        inner.push(Pending::Event { ack_id: id }, self.segment_size);
        AckHandle {
            id,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Record a watermark behind every event queued so far.
    ///
    /// Dropped silently when the tracker is frozen or when `resolved` does
    /// not strictly exceed the last accepted watermark. With nothing in
    /// flight the frontier moves immediately and no queue entry is made.
    pub fn add_resolved_ts(&self, resolved: ResolvedTs) {
        let mut inner = self.shared.inner.lock();
        if inner.frozen || resolved <= inner.last_resolved {
            return;
        }
        inner.last_resolved = resolved;
        if inner.pending_len == 0 {
            inner.frontier = resolved;
        } else {
            inner.push(Pending::Resolved { resolved }, self.segment_size);
        }
    }

    /// Pop everything acknowledged so far and return the current frontier.
    ///
    /// An empty queue leaves the frontier unchanged, so the result is
    /// non-decreasing across calls.
    pub fn advance(&self) -> ResolvedTs {
        let mut inner = self.shared.inner.lock();
        inner.advance();
        inner.frontier
    }

    /// Stop accepting watermarks. Called before the owning sink's state
    /// flips to stopping so a late watermark cannot slide the frontier past
    /// writes the backend already dropped.
    pub fn freeze_process(&self) {
        self.shared.inner.lock().frozen = true;
    }

    /// Whether the tracker has fully drained.
    ///
    /// With `backend_dead` the answer is always true: no further acks will
    /// arrive, batches handed over before the backend died are assumed
    /// durable, so the frontier jumps to the last accepted watermark and the
    /// remaining accounting is released.
    pub fn check_closed(&self, backend_dead: bool) -> bool {
        let mut inner = self.shared.inner.lock();
        if backend_dead {
            if inner.last_resolved > inner.frontier {
                inner.frontier = inner.last_resolved;
            }
            inner.release();
            return true;
        }
        inner.advance();
        inner.pending_len == 0
    }

    /// Wait until the tracker drains, re-probing backend liveness on every
    /// poll tick so a backend dying mid-close still unblocks the wait.
    pub async fn wait_closed(&self, backend_dead: impl Fn() -> bool) {
        let started = Instant::now();
        let mut last_warn = started;
        loop {
            if self.check_closed(backend_dead()) {
                return;
            }
            if last_warn.elapsed() >= STUCK_WARN_INTERVAL {
                last_warn = Instant::now();
                warn!(
                    span = %self.span,
                    pending = self.pending_count(),
                    elapsed_secs = started.elapsed().as_secs(),
                    "table sink close is still waiting for pending writes to be acknowledged"
                );
            }
            let _ = tokio::time::timeout(WAIT_POLL_INTERVAL, self.shared.ack_notify.notified())
                .await;
        }
    }

    /// Number of queued items (events plus watermarks) not yet popped.
    pub fn pending_count(&self) -> usize {
        self.shared.inner.lock().pending_len
    }

    #[cfg(test)]
    fn segment_count(&self) -> usize {
        self.shared.inner.lock().segments.len()
    }
}

/// Single-use capability marking one in-flight event as durable.
///
/// Invoking it more than once is harmless, and an ack arriving after the
/// tracker already drained past its event is ignored.
#[derive(Debug, Clone)]
pub struct AckHandle {
    id: u64,
    shared: Arc<TrackerShared>,
}

impl AckHandle {
    /// Mark the associated event as durable downstream.
    pub fn ack(&self) {
        let mut inner = self.shared.inner.lock();
        if self.id < inner.first_unpopped_id {
            return;
        }
        if inner.acked.insert(self.id) {
            drop(inner);
            self.shared.ack_notify.notify_waiters();
        }
    }
}

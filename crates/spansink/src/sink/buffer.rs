//! Insertion-ordered staging of pending events for one span.

use super::SinkEvent;
use crate::model::{ResolvedTs, Ts};

const INITIAL_CAPACITY: usize = 1024;

/// Pending events ordered by insertion, which equals commit-ts order under
/// the producer contract.
#[derive(Debug)]
pub struct EventBuffer<E> {
    events: Vec<E>,
}

impl<E: SinkEvent> EventBuffer<E> {
    pub fn new() -> Self {
        Self {
            events: Vec::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Append one event at the tail.
    pub fn push(&mut self, event: E) {
        self.events.push(event);
    }

    /// Mutable view of the most recently appended event, for appenders that
    /// fold rows into an open bundle.
    pub fn last_mut(&mut self) -> Option<&mut E> {
        self.events.last_mut()
    }

    /// Commit ts of the most recently appended event.
    pub fn last_commit_ts(&self) -> Option<Ts> {
        self.events.last().map(|e| e.commit_ts())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Remove and return every event with `commit_ts <= resolved.ts`.
    ///
    /// The retained suffix moves to a freshly allocated backing store so the
    /// drained prefix's memory can be released as soon as the caller drops
    /// it. Returns an empty vec without allocating when nothing qualifies.
    pub fn drain_up_to(&mut self, resolved: &ResolvedTs) -> Vec<E> {
        let i = self
            .events
            .partition_point(|event| event.commit_ts() <= resolved.ts);
        if i == 0 {
            return Vec::new();
        }
        let mut rest = Vec::with_capacity(self.events.len() - i);
        rest.extend(self.events.drain(i..));
        std::mem::replace(&mut self.events, rest)
    }
}

impl<E: SinkEvent> Default for EventBuffer<E> {
    fn default() -> Self {
        Self::new()
    }
}

use std::collections::VecDeque;

use tracing::warn;

use crate::event::Event;

/// Ordered in-memory buffer of pending events with an optional capacity.
///
/// Insertion order is send order. Plain data: the dispatcher serializes
/// access behind its state lock, so no internal synchronization here.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<Event>,
    max_len: Option<usize>,
}

impl EventQueue {
    pub fn new(max_len: Option<usize>) -> Self {
        Self {
            events: VecDeque::new(),
            max_len,
        }
    }

    /// Append to the tail, evicting from the head while over capacity.
    pub fn push(&mut self, event: Event) {
        self.events.push_back(event);
        if let Some(max) = self.max_len {
            let mut dropped = 0;
            while self.events.len() > max {
                self.events.pop_front();
                dropped += 1;
            }
            if dropped > 0 {
                warn!(dropped, "event buffer full, dropped oldest events");
            }
        }
    }

    /// Remove and return up to the first `n` events, oldest first.
    pub fn take_batch(&mut self, n: usize) -> Vec<Event> {
        let n = n.min(self.events.len());
        self.events.drain(..n).collect()
    }

    /// Reinsert a failed batch at the head, preserving its relative order.
    ///
    /// On overflow the eviction runs from the tail of the combined
    /// sequence: retried events keep their head position for as long as
    /// any event survives.
    pub fn prepend(&mut self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        for event in events.into_iter().rev() {
            self.events.push_front(event);
        }
        if let Some(max) = self.max_len {
            let dropped = self.events.len().saturating_sub(max);
            if dropped > 0 {
                self.events.truncate(max);
                warn!(dropped, "event buffer full, dropped newest events to keep retries");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Copy of the pending sequence, used for persistence sync.
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }
}

//! Artificial network delay for one hop
//!
//! A `LatencyQueue` holds messages until a fixed delay has passed since they were
//! queued. It is a pure timing queue: nothing is validated, nothing is dropped and
//! nothing is reordered. The server keeps one for its receive hop and one for its
//! send hop; the client does the same, so a round trip crosses four queues.
//!
//! Draining is polled, never awaited, so callers can fold it into whatever loop
//! they already run.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Delayed<T> {
    ready_at: Instant,
    message: T,
}

/// FIFO queue that releases messages once their delivery time has passed
#[derive(Debug)]
pub struct LatencyQueue<T> {
    delay: Duration,
    pending: VecDeque<Delayed<T>>,
}

impl<T> LatencyQueue<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: VecDeque::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Queues `message` to become deliverable `delay` after `now`
    pub fn push(&mut self, message: T, now: Instant) {
        self.enqueue(message, now + self.delay);
    }

    /// Queues `message` with an explicit delivery instant
    ///
    /// A message never becomes ready before the one queued ahead of it, so the
    /// delivery instant is raised to the tail's when it would overtake it.
    pub fn enqueue(&mut self, message: T, ready_at: Instant) {
        let ready_at = match self.pending.back() {
            Some(tail) if tail.ready_at > ready_at => tail.ready_at,
            _ => ready_at,
        };
        self.pending.push_back(Delayed { ready_at, message });
    }

    /// Removes and returns every message whose delivery instant is at or before
    /// `now`, in the order they were queued
    pub fn drain(&mut self, now: Instant) -> Vec<T> {
        let mut ready = Vec::new();
        while let Some(front) = self.pending.front() {
            if front.ready_at > now {
                break;
            }
            if let Some(delayed) = self.pending.pop_front() {
                ready.push(delayed.message);
            }
        }
        ready
    }

    /// Delivery instant of the oldest queued message
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.pending.front().map(|d| d.ready_at)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Drops queued messages matching `predicate`
    pub fn discard_where(&mut self, mut predicate: impl FnMut(&T) -> bool) {
        self.pending.retain(|d| !predicate(&d.message));
    }
}

//! Priority queue with weighted round-robin draining.
//!
//! Four FIFO classes in rank order (system, urgent, normal, low). A
//! distribution vector `[s, u, n, l]` says how many items each class may
//! contribute per round; an empty class forfeits the rest of its turn,
//! and a class with credit 0 is never drained. Within a class, ordering
//! is strictly FIFO.
//!
//! Many producers, one consumer. [`PriorityQueue::remove`] blocks until an
//! eligible item is available or the queue is closed; a closed queue drains
//! its remainder in rank order and then yields `None`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use log::warn;

use crate::error::KnxError;
use crate::protocol::Priority;

/// Why [`PriorityQueue::add`] rejected an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was closed by a stack stop.
    Closed,
    /// The item was dropped by the high-water backpressure policy.
    Dropped,
}

impl From<QueueError> for KnxError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Closed => KnxError::bad_state("queue closed"),
            QueueError::Dropped => KnxError::QueueDropped,
        }
    }
}

struct Inner<T> {
    classes: [VecDeque<T>; 4],
    distribution: [u32; 4],
    /// Class currently holding the turn.
    cursor: usize,
    /// Credits left for the cursor class this round.
    remaining: u32,
    high_water: usize,
    dropped: u64,
    closed: bool,
}

impl<T> Inner<T> {
    fn len(&self) -> usize {
        self.classes.iter().map(VecDeque::len).sum()
    }

    fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % 4;
        self.remaining = self.distribution[self.cursor];
    }

    /// Pop the next item the round-robin allows, if any.
    fn pop_eligible(&mut self) -> Option<T> {
        for _ in 0..4 {
            if self.remaining == 0 {
                self.advance();
                continue;
            }
            if let Some(item) = self.classes[self.cursor].pop_front() {
                self.remaining -= 1;
                if self.remaining == 0 {
                    self.advance();
                }
                return Some(item);
            }
            // Empty class: yield the turn, forfeiting remaining credits
            self.advance();
        }
        None
    }

    /// Pop in plain rank order, ignoring credits. Used to drain after close.
    fn pop_any(&mut self) -> Option<T> {
        self.classes.iter_mut().find_map(VecDeque::pop_front)
    }
}

/// Synchronized four-class priority queue.
pub struct PriorityQueue<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
}

impl<T> PriorityQueue<T> {
    /// Create a queue with the given distribution and high-water mark.
    pub fn new(distribution: [u32; 4], high_water: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                classes: [
                    VecDeque::new(),
                    VecDeque::new(),
                    VecDeque::new(),
                    VecDeque::new(),
                ],
                cursor: 0,
                remaining: distribution[0],
                distribution,
                high_water,
                dropped: 0,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Enqueue an item in its priority class.
    ///
    /// At the high-water mark the lowest-priority non-empty class loses its
    /// newest item first; if the incoming item itself belongs to that class
    /// (or a lower one), the incoming item is the one dropped.
    ///
    /// # Errors
    ///
    /// [`QueueError::Closed`] after a close, [`QueueError::Dropped`] when
    /// backpressure discards the incoming item.
    pub fn add(&self, item: T, priority: Priority) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.closed {
            return Err(QueueError::Closed);
        }

        let rank = priority.rank();
        if inner.len() >= inner.high_water {
            inner.dropped += 1;
            let victim = (0..4).rev().find(|&r| !inner.classes[r].is_empty());
            match victim {
                Some(victim_rank) if victim_rank > rank => {
                    inner.classes[victim_rank].pop_back();
                    warn!(
                        "priority queue over high water ({}), dropped newest {} item",
                        inner.high_water,
                        Priority::from_rank(victim_rank).expect("rank in range").name()
                    );
                }
                _ => {
                    warn!(
                        "priority queue over high water ({}), dropped incoming {} item",
                        inner.high_water,
                        priority.name()
                    );
                    return Err(QueueError::Dropped);
                }
            }
        }

        inner.classes[rank].push_back(item);
        drop(inner);
        self.cond.notify_one();
        Ok(())
    }

    /// Block until the round-robin yields an item.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub fn remove(&self) -> Option<T> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        loop {
            if inner.closed {
                return inner.pop_any();
            }
            if let Some(item) = inner.pop_eligible() {
                return Some(item);
            }
            inner = self.cond.wait(inner).expect("queue lock poisoned");
        }
    }

    /// Non-blocking variant of [`PriorityQueue::remove`].
    pub fn try_remove(&self) -> Option<T> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.closed {
            inner.pop_any()
        } else {
            inner.pop_eligible()
        }
    }

    /// Close the queue and wake all waiters.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.closed = true;
        drop(inner);
        self.cond.notify_all();
    }

    /// Total queued items across all classes.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").len()
    }

    /// Whether no items are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items discarded by backpressure so far.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().expect("queue lock poisoned").dropped
    }
}

impl<T> std::fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("queue lock poisoned");
        f.debug_struct("PriorityQueue")
            .field("len", &inner.len())
            .field("distribution", &inner.distribution)
            .field("dropped", &inner.dropped)
            .field("closed", &inner.closed)
            .finish()
    }
}

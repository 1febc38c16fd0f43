//! Replay buffer for rooms.
//!
//! When a peer relays a message while the other slot of its room is empty,
//! the message waits here until somebody fills that slot:
//! - FIFO ordering for replay
//! - Origin tracking so a message is never replayed to its sender
//! - Fixed capacity, the oldest entry is evicted when full

use drop_types::Slot;
use std::collections::VecDeque;

/// A message waiting for the other slot to be filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage<M> {
    /// Slot of the connection that sent the message.
    pub origin: Slot,
    /// The message itself, opaque to the buffer.
    pub message: M,
}

/// Bounded FIFO of messages addressed to an empty slot.
#[derive(Debug, Clone)]
pub struct ReplayBuffer<M> {
    capacity: usize,
    queue: VecDeque<QueuedMessage<M>>,
}

impl<M> ReplayBuffer<M> {
    /// Create a buffer holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::with_capacity(capacity.min(128)),
        }
    }

    /// Append a message, evicting the oldest one if the buffer is full.
    ///
    /// Returns the evicted message, if any. With capacity 0 the message
    /// itself is returned and nothing is stored.
    pub fn push(&mut self, origin: Slot, message: M) -> Option<QueuedMessage<M>> {
        let entry = QueuedMessage { origin, message };
        if self.capacity == 0 {
            return Some(entry);
        }
        let evicted = if self.queue.len() >= self.capacity {
            self.queue.pop_front()
        } else {
            None
        };
        self.queue.push_back(entry);
        evicted
    }

    /// Remove and return, in arrival order, every message that `joining`
    /// did not originate. Messages from `joining` itself stay queued.
    pub fn drain_for(&mut self, joining: Slot) -> Vec<M> {
        let mut replay = Vec::new();
        let mut kept = VecDeque::with_capacity(self.queue.len());
        for entry in self.queue.drain(..) {
            if entry.origin == joining {
                kept.push_back(entry);
            } else {
                replay.push(entry.message);
            }
        }
        self.queue = kept;
        replay
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Maximum number of messages held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

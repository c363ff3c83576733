// src/recording/queue.rs
//! Strict FIFO record queue
//!
//! Backs both buffer queues. An optional capacity turns it into a ring that
//! evicts the oldest entries first; without one the length is only a flush
//! trigger for the caller.

use std::collections::VecDeque;

/// FIFO queue with optional oldest-first eviction
#[derive(Debug)]
pub struct RecordQueue<T> {
    /// Queued records, oldest at the front
    items: VecDeque<T>,

    /// Maximum retained length (None = unbounded)
    capacity: Option<usize>,

    /// Records pushed by producers
    push_count: u64,

    /// Records handed out by `drain_all`
    drain_count: u64,

    /// Records put back after a failed delivery
    requeue_count: u64,

    /// Records evicted to honour the capacity
    evict_count: u64,
}

impl<T> RecordQueue<T> {
    /// Create a queue without a hard cap
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Create a queue that evicts oldest-first beyond `capacity`
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
            push_count: 0,
            drain_count: 0,
            requeue_count: 0,
            evict_count: 0,
        }
    }

    /// Append a record; returns how many old records were evicted
    pub fn push(&mut self, item: T) -> usize {
        self.items.push_back(item);
        self.push_count += 1;
        self.enforce_capacity()
    }

    /// Take every queued record, oldest first
    pub fn drain_all(&mut self) -> Vec<T> {
        let drained: Vec<T> = self.items.drain(..).collect();
        self.drain_count += drained.len() as u64;
        drained
    }

    /// Put records back in front of anything queued since they were drained,
    /// then re-apply the capacity; returns how many records were evicted
    pub fn requeue_front(&mut self, items: Vec<T>) -> usize {
        self.requeue_count += items.len() as u64;
        for item in items.into_iter().rev() {
            self.items.push_front(item);
        }
        self.enforce_capacity()
    }

    fn enforce_capacity(&mut self) -> usize {
        let Some(capacity) = self.capacity else {
            return 0;
        };

        let excess = self.items.len().saturating_sub(capacity);
        if excess > 0 {
            self.items.drain(..excess);
            self.evict_count += excess as u64;
        }
        excess
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            push_count: self.push_count,
            drain_count: self.drain_count,
            requeue_count: self.requeue_count,
            evict_count: self.evict_count,
            current_size: self.items.len(),
            capacity: self.capacity,
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Total records pushed
    pub push_count: u64,

    /// Total records drained for delivery
    pub drain_count: u64,

    /// Total records re-queued after a failed delivery
    pub requeue_count: u64,

    /// Total records evicted (capacity exceeded)
    pub evict_count: u64,

    /// Current queue size
    pub current_size: usize,

    /// Hard capacity, if any
    pub capacity: Option<usize>,
}

impl QueueStats {
    /// Fill percentage of a bounded queue
    pub fn fill_percentage(&self) -> Option<f64> {
        self.capacity
            .filter(|cap| *cap > 0)
            .map(|cap| (self.current_size as f64 / cap as f64) * 100.0)
    }

    /// Percentage of pushed records lost to eviction
    pub fn eviction_rate(&self) -> f64 {
        if self.push_count == 0 {
            0.0
        } else {
            (self.evict_count as f64 / self.push_count as f64) * 100.0
        }
    }
}

//! Fixed-capacity FIFO of recent records

use std::collections::VecDeque;

use crate::{Result, SnoopError};

/// Bounded FIFO that evicts its oldest entry when full
#[derive(Debug)]
pub struct RingBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
    evicted: u64,
}

impl<T: Clone> RingBuffer<T> {
    /// Create an empty buffer holding at most `capacity` entries
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` if `capacity` is zero
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(SnoopError::ConfigInvalid(
                "ring buffer capacity must be > 0".to_string(),
            ));
        }

        Ok(Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        })
    }

    /// Append an entry, evicting the oldest one if full
    pub fn push(&mut self, entry: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(entry);
    }

    /// Copy of all entries, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    /// Remove all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries held
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries evicted since construction
    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

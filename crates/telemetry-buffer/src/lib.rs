use std::collections::VecDeque;

use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("history capacity must be greater than zero")]
    ZeroCapacity,
}

/// Fixed-capacity, append-only sample history.
///
/// Appending past capacity evicts the oldest sample. All operations take the
/// internal lock for their whole duration, so an `append` is visible to any
/// `len`/`latest` call that starts after it returns.
#[derive(Debug)]
pub struct BoundedHistory<T> {
    capacity: usize,
    samples: RwLock<VecDeque<T>>,
}

impl<T: Clone> BoundedHistory<T> {
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            samples: RwLock::new(VecDeque::with_capacity(capacity)),
        })
    }

    /// Append a sample, returning the evicted one if the history was full.
    pub fn append(&self, sample: T) -> Option<T> {
        let mut guard = self.samples.write();
        let evicted = if guard.len() == self.capacity {
            guard.pop_front()
        } else {
            None
        };
        guard.push_back(sample);
        evicted
    }

    pub fn latest(&self) -> Option<T> {
        self.samples.read().back().cloned()
    }

    /// The last `limit` samples, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<T> {
        let guard = self.samples.read();
        let skip = guard.len().saturating_sub(limit);
        guard.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

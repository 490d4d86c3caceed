//! Sample buffer between the acquisition worker and the consumer
//!
//! Single producer, single consumer. `drain` hands over everything queued so
//! far, oldest first. Unbounded unless a capacity is set, in which case the
//! oldest samples are dropped to make room.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use super::Sample;

pub struct SampleBuffer {
    queue: Mutex<VecDeque<Sample>>,
    capacity: Option<usize>,
    total_dropped: AtomicU64,
}

impl SampleBuffer {
    /// Buffer that keeps every sample until drained
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity,
            total_dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, sample: Sample) {
        let mut queue = self.queue.lock();

        if let Some(capacity) = self.capacity {
            while queue.len() >= capacity {
                queue.pop_front();
                self.total_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        queue.push_back(sample);
    }

    /// Remove and return every queued sample, oldest first
    pub fn drain(&self) -> Vec<Sample> {
        let queue = std::mem::take(&mut *self.queue.lock());
        queue.into()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Samples discarded because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::unbounded()
    }
}

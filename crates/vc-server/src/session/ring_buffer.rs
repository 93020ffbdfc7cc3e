//! Bounded chunk store for output replay on subscribe.
//!
//! Keeps the most recent N output chunks of a session so that a newly
//! attached viewer can be backfilled without the server keeping unbounded
//! history. Eviction is FIFO by chunk, not by byte.

use std::collections::VecDeque;

/// Default number of chunks retained per session.
pub const DEFAULT_BUFFER_CHUNKS: usize = 1000;

/// A fixed-capacity FIFO of output chunks.
#[derive(Debug)]
pub struct RingBuffer {
    chunks: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl RingBuffer {
    /// Create a new ring buffer holding at most `capacity` chunks.
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::with_capacity(capacity.min(DEFAULT_BUFFER_CHUNKS)),
            capacity,
        }
    }

    /// Append a chunk, evicting the oldest one if the buffer is full.
    pub fn push(&mut self, chunk: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        if self.chunks.len() == self.capacity {
            self.chunks.pop_front();
        }
        self.chunks.push_back(chunk);
    }

    /// All retained chunks concatenated in chronological order.
    pub fn concat(&self) -> Vec<u8> {
        let total: usize = self.iter().map(<[u8]>::len).sum();
        let mut out = Vec::with_capacity(total);
        for chunk in self.iter() {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Number of chunks currently retained.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.chunks.iter().map(Vec::as_slice)
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CHUNKS)
    }
}

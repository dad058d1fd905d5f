// src/services/buffer.rs
//! Fixed-capacity ring of pre-trip samples.
//!
//! - `push` writes at the head cursor; once full, the slot it lands on holds
//!   the oldest sample, which is evicted. O(1), no shifting.
//! - Logical order is most-recent-first (`iter_recent`).
//! - `drain_ascending` hands everything out oldest-first and empties the ring.

use crate::model::BufferedSample;

#[derive(Debug, Clone)]
pub struct SampleBuffer {
    slots: Vec<Option<BufferedSample>>,
    /// Next slot to write.
    head: usize,
    len: usize,
}

impl SampleBuffer {
    /// `capacity` is clamped to at least one slot.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Insert at the head. Returns the evicted tail sample when the ring was full.
    pub fn push(&mut self, sample: BufferedSample) -> Option<BufferedSample> {
        let evicted = self.slots[self.head].replace(sample);
        self.head = (self.head + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
        evicted
    }

    /// Newest first.
    pub fn iter_recent(&self) -> impl Iterator<Item = &BufferedSample> + '_ {
        let cap = self.capacity();
        (1..=self.len).filter_map(move |back| self.slots[(self.head + cap - back) % cap].as_ref())
    }

    /// Remove every sample, returned in chronological order.
    ///
    /// Samples are taken oldest-inserted first, then stably sorted by
    /// timestamp, since the source clock is not guaranteed monotonic.
    pub fn drain_ascending(&mut self) -> Vec<BufferedSample> {
        let cap = self.capacity();
        let oldest = (self.head + cap - self.len) % cap;
        let mut out = Vec::with_capacity(self.len);
        for i in 0..self.len {
            if let Some(s) = self.slots[(oldest + i) % cap].take() {
                out.push(s);
            }
        }
        self.head = 0;
        self.len = 0;
        out.sort_by_key(|s| s.timestamp);
        out
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.head = 0;
        self.len = 0;
    }
}

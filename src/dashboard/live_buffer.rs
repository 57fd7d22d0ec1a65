//! Bounded, arrival-ordered buffer of live samples for the active asset.

use std::collections::VecDeque;

use crate::models::LiveSample;

pub const LIVE_BUFFER_CAPACITY: usize = 20;

#[derive(Debug, Clone)]
pub struct LiveSampleBuffer {
    samples: VecDeque<LiveSample>,
    capacity: usize,
}

impl Default for LiveSampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveSampleBuffer {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(LIVE_BUFFER_CAPACITY + 1),
            capacity: LIVE_BUFFER_CAPACITY,
        }
    }

    /// Append at the tail; evicts exactly one sample from the head when full.
    pub fn append(&mut self, sample: LiveSample) {
        self.samples.push_back(sample);
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Render order: oldest first.
    pub fn snapshot(&self) -> Vec<LiveSample> {
        self.samples.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<LiveSample> {
        self.samples.back().copied()
    }
}

//! Bounded FIFO mailbox

use crate::{
    BufferError, CapturedFrame, Publish, PublishOutcome, MAX_QUEUE_DEPTH, MIN_QUEUE_DEPTH,
};
use std::collections::VecDeque;
use std::sync::Arc;

/// Bounded queue of frames awaiting the consumer
///
/// Storage is reserved up front, so a publish never allocates. Once
/// `capacity` frames are pending an arrival is refused and reported as
/// [`PublishOutcome::Full`]; nothing already queued is discarded.
#[derive(Debug)]
pub struct FrameQueue {
    pending: VecDeque<Arc<CapturedFrame>>,
    capacity: usize,
    /// Frame most recently advanced to by the consumer
    current: Option<Arc<CapturedFrame>>,
    overflows: u64,
}

impl FrameQueue {
    /// Create a queue holding up to `capacity` pending frames
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if !(MIN_QUEUE_DEPTH..=MAX_QUEUE_DEPTH).contains(&capacity) {
            return Err(BufferError::InvalidDepth(capacity));
        }
        Ok(Self {
            pending: VecDeque::with_capacity(capacity),
            capacity,
            current: None,
            overflows: 0,
        })
    }

    /// Enqueue a frame, or refuse it when full
    pub fn publish(&mut self, frame: Arc<CapturedFrame>) -> Publish {
        if self.is_full() {
            self.overflows += 1;
            return Publish {
                outcome: PublishOutcome::Full,
                released: Some(frame),
            };
        }

        self.pending.push_back(frame);
        Publish {
            outcome: PublishOutcome::Stored,
            released: None,
        }
    }

    /// Move the oldest pending frame to `current`
    ///
    /// Returns whether a frame was advanced, and the frame it replaced.
    pub fn advance(&mut self) -> (bool, Option<Arc<CapturedFrame>>) {
        match self.pending.pop_front() {
            Some(next) => (true, self.current.replace(next)),
            None => (false, None),
        }
    }

    /// The consumer's current frame; before the first advance, the oldest
    /// pending frame
    pub fn current(&self) -> Option<Arc<CapturedFrame>> {
        self.current
            .clone()
            .or_else(|| self.pending.front().cloned())
    }

    /// Get the number of pending frames
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if no frames are pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Check if the next publish would be refused
    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.capacity
    }

    /// Get the queue capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    /// Arrivals refused because the queue was full
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Drop every pending frame
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

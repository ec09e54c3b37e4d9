//! Frame Mailboxes
//!
//! Storage cells that sit between a hardware callback (producer) and a
//! polling consumer. Both mailboxes are plain `&mut self` structures; the
//! owning channel wraps them in its own lock and keeps every operation O(1)
//! so the producer never waits on the consumer.

mod frame;
mod queue;
mod slot;

pub use frame::{CapturedFrame, Frame};
pub use queue::FrameQueue;
pub use slot::FrameSlot;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Smallest accepted FIFO depth
pub const MIN_QUEUE_DEPTH: usize = 2;
/// Largest accepted FIFO depth
pub const MAX_QUEUE_DEPTH: usize = 8;
/// FIFO depth used when none is configured
pub const DEFAULT_QUEUE_DEPTH: usize = 3;

/// Buffer configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Queue depth {0} outside 2..=8")]
    InvalidDepth(usize),
}

/// How arrivals are retained until the consumer reads them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BufferPolicy {
    /// One slot, newest frame replaces any unread one
    #[default]
    LatestWins,
    /// Bounded queue, arrivals are refused once `depth` frames are pending
    Fifo { depth: usize },
}

/// What happened to a published frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Stored without displacing anything unread
    Stored,
    /// Stored, and an unread frame with this sequence number was discarded
    Replaced { dropped_sequence: u64 },
    /// Refused, the queue is at capacity
    Full,
}

/// Result of a publish
///
/// `released` carries whichever frame left the mailbox (the replaced one, or
/// the refused arrival). Drop it after releasing the channel lock so the
/// deallocation happens outside the critical section.
#[must_use]
#[derive(Debug)]
pub struct Publish {
    pub outcome: PublishOutcome,
    pub released: Option<Arc<CapturedFrame>>,
}

/// A mailbox chosen by [`BufferPolicy`]
#[derive(Debug)]
pub enum FrameBuffer {
    LatestWins(FrameSlot),
    Fifo(FrameQueue),
}

impl FrameBuffer {
    /// Create a mailbox for the given policy
    pub fn new(policy: BufferPolicy) -> Result<Self, BufferError> {
        Ok(match policy {
            BufferPolicy::LatestWins => FrameBuffer::LatestWins(FrameSlot::new()),
            BufferPolicy::Fifo { depth } => FrameBuffer::Fifo(FrameQueue::new(depth)?),
        })
    }

    /// Hand a completed frame to the mailbox (producer side)
    pub fn publish(&mut self, frame: Arc<CapturedFrame>) -> Publish {
        match self {
            FrameBuffer::LatestWins(slot) => slot.publish(frame),
            FrameBuffer::Fifo(queue) => queue.publish(frame),
        }
    }

    /// Consume the "new frame" notification (consumer side)
    ///
    /// Returns whether a frame the consumer has not yet been told about is
    /// now current, plus any frame that stopped being current.
    pub fn advance(&mut self) -> (bool, Option<Arc<CapturedFrame>>) {
        match self {
            FrameBuffer::LatestWins(slot) => (slot.take_fresh(), None),
            FrameBuffer::Fifo(queue) => queue.advance(),
        }
    }

    /// The frame `get_frame` should hand out
    pub fn current(&self) -> Option<Arc<CapturedFrame>> {
        match self {
            FrameBuffer::LatestWins(slot) => slot.current(),
            FrameBuffer::Fifo(queue) => queue.current(),
        }
    }

    /// Frames stored but not yet announced to the consumer
    pub fn pending(&self) -> usize {
        match self {
            FrameBuffer::LatestWins(slot) => usize::from(slot.is_fresh()),
            FrameBuffer::Fifo(queue) => queue.len(),
        }
    }

    /// Unread frames overwritten by newer ones (latest-wins only)
    pub fn dropped(&self) -> u64 {
        match self {
            FrameBuffer::LatestWins(slot) => slot.dropped(),
            FrameBuffer::Fifo(_) => 0,
        }
    }

    /// Arrivals refused because the queue was full (FIFO only)
    pub fn overflows(&self) -> u64 {
        match self {
            FrameBuffer::LatestWins(_) => 0,
            FrameBuffer::Fifo(queue) => queue.overflows(),
        }
    }
}

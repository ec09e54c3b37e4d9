//! Single-slot "latest wins" mailbox

use crate::{CapturedFrame, Publish, PublishOutcome};
use std::sync::Arc;

/// Holds only the newest frame
///
/// A publish always succeeds. If the previous frame was never announced to
/// the consumer it is counted as dropped.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Option<Arc<CapturedFrame>>,
    /// Set on publish, cleared when the consumer takes the notification
    fresh: bool,
    dropped: u64,
}

impl FrameSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame`, replacing whatever was there
    pub fn publish(&mut self, frame: Arc<CapturedFrame>) -> Publish {
        let previous = self.latest.replace(frame);

        let outcome = match (&previous, self.fresh) {
            (Some(old), true) => {
                self.dropped += 1;
                PublishOutcome::Replaced {
                    dropped_sequence: old.sequence,
                }
            }
            _ => PublishOutcome::Stored,
        };
        self.fresh = true;

        Publish {
            outcome,
            released: previous,
        }
    }

    /// Report and clear the "new frame" flag
    pub fn take_fresh(&mut self) -> bool {
        std::mem::take(&mut self.fresh)
    }

    /// Whether a frame arrived since the last `take_fresh`
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// The newest frame, if any has arrived
    pub fn current(&self) -> Option<Arc<CapturedFrame>> {
        self.latest.clone()
    }

    /// Frames replaced before the consumer was told about them
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Forget the stored frame
    pub fn clear(&mut self) -> Option<Arc<CapturedFrame>> {
        self.fresh = false;
        self.latest.take()
    }
}

//! Signal lock tracking
//!
//! A channel is "locked" once `min_good_frames` consecutive valid frames
//! have arrived, and stays locked until `max_bad_frames` consecutive
//! invalid ones. The asymmetry keeps one glitched frame from toggling the
//! lock state.

use crate::CaptureError;
use serde::{Deserialize, Serialize};

/// Hysteresis thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalParameters {
    /// Consecutive valid frames needed to lock
    pub min_good_frames: u32,
    /// Consecutive invalid frames that drop an existing lock
    pub max_bad_frames: u32,
}

impl Default for SignalParameters {
    fn default() -> Self {
        Self {
            min_good_frames: 3,
            max_bad_frames: 5,
        }
    }
}

impl SignalParameters {
    pub fn new(min_good_frames: u32, max_bad_frames: u32) -> Self {
        Self {
            min_good_frames,
            max_bad_frames,
        }
    }

    /// Both thresholds must be at least one
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.min_good_frames == 0 || self.max_bad_frames == 0 {
            return Err(CaptureError::InvalidSignalParameters {
                min_good_frames: self.min_good_frames,
                max_bad_frames: self.max_bad_frames,
            });
        }
        Ok(())
    }
}

/// Lock state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTransition {
    Acquired,
    Lost,
}

/// Snapshot of the tracker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SignalState {
    pub consecutive_good: u32,
    pub consecutive_bad: u32,
    pub locked: bool,
}

/// Per-channel lock state machine
#[derive(Debug, Clone, Default)]
pub struct SignalLockTracker {
    params: SignalParameters,
    state: SignalState,
}

impl SignalLockTracker {
    pub fn new(params: SignalParameters) -> Self {
        Self {
            params,
            state: SignalState::default(),
        }
    }

    /// Feed one frame observation
    pub fn record(&mut self, valid: bool) -> Option<SignalTransition> {
        if valid {
            self.state.consecutive_good = self.state.consecutive_good.saturating_add(1);
            self.state.consecutive_bad = 0;
        } else {
            self.state.consecutive_bad = self.state.consecutive_bad.saturating_add(1);
            self.state.consecutive_good = 0;
        }
        self.evaluate()
    }

    fn evaluate(&mut self) -> Option<SignalTransition> {
        if !self.state.locked && self.state.consecutive_good >= self.params.min_good_frames {
            self.state.locked = true;
            return Some(SignalTransition::Acquired);
        }
        if self.state.locked && self.state.consecutive_bad >= self.params.max_bad_frames {
            self.state.locked = false;
            return Some(SignalTransition::Lost);
        }
        None
    }

    /// Replace the thresholds; counters are kept and judged against the new
    /// values on the next observation
    pub fn set_parameters(&mut self, params: SignalParameters) -> Result<(), CaptureError> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn parameters(&self) -> SignalParameters {
        self.params
    }

    pub fn state(&self) -> SignalState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state.locked
    }
}

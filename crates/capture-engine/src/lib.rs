//! Capture Engine for Professional Video Inputs
//!
//! Bridges the push-style callbacks of capture hardware to a pull-style
//! polling API. Supports:
//! - Per-channel frame mailboxes (latest-wins or bounded FIFO)
//! - Signal lock tracking with hysteresis
//! - Several concurrent channels on multi-input devices
//! - Simulated hardware for tests, and the vendor SDK behind the `ffi` feature

pub mod channel;
pub mod context;
pub mod device;
pub mod hardware;
pub mod inspect;
pub mod mode;
pub mod session;
pub mod signal;
pub mod sim;

#[cfg(feature = "ffi")]
pub mod ffi;

pub use channel::{CaptureChannel, ChannelStatus};
pub use context::CaptureContext;
pub use device::CaptureDevice;
pub use hardware::{
    DeviceInfo, FrameSink, HardwareError, HardwareFault, HardwareFrame, HardwareInterface,
    HardwareUnit, InputPort, VideoConnection,
};
pub use inspect::{BlankFrameDetector, FrameInspector};
pub use mode::{negotiate, DisplayMode};
pub use session::{CaptureSession, SessionConfig};
pub use signal::{SignalLockTracker, SignalParameters, SignalState, SignalTransition};
pub use sim::{SimDeviceSpec, SimFrame, SimSignal, SimulatedHardware};

pub use frame_buffer::{BufferError, CapturedFrame, Frame, DEFAULT_QUEUE_DEPTH};
pub use pixel_convert::{ConvertError, PixelLayout};

use frame_buffer::BufferPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Capture error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Device {index} unavailable: {reason}")]
    DeviceUnavailable { index: usize, reason: String },

    #[error("Invalid input port {port} (device has {available})")]
    InvalidPort { port: usize, available: usize },

    #[error("Input port {port} is busy")]
    PortBusy { port: usize },

    #[error("No display mode matches {0}")]
    FormatUnsupported(CaptureFormat),

    #[error("All {capacity} capture channels are in use")]
    ResourceExhausted { capacity: usize },

    #[error("Cannot deliver frames as {0}")]
    UnsupportedFormat(PixelLayout),

    #[error("Frame conversion failed: {0}")]
    Convert(ConvertError),

    #[error("Invalid signal parameters: min_good_frames={min_good_frames}, max_bad_frames={max_bad_frames}")]
    InvalidSignalParameters {
        min_good_frames: u32,
        max_bad_frames: u32,
    },

    #[error("Invalid buffer configuration: {0}")]
    Buffer(#[from] BufferError),

    #[error("Channel is closed")]
    ChannelClosed,

    #[error("Device is closed")]
    DeviceClosed,

    #[error("Failed to start stream: {0}")]
    StreamStart(String),
}

impl From<ConvertError> for CaptureError {
    fn from(err: ConvertError) -> Self {
        match err {
            ConvertError::UnsupportedFormat { to, .. } => CaptureError::UnsupportedFormat(to),
            other => CaptureError::Convert(other),
        }
    }
}

/// Requested capture format
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureFormat {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frames per second (29.97 and friends allowed)
    pub frame_rate: f64,
}

impl CaptureFormat {
    pub fn new(width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            width,
            height,
            frame_rate,
        }
    }
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self::new(1920, 1080, 30.0)
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} @ {:.2} fps", self.width, self.height, self.frame_rate)
    }
}

/// Trade-off between freshness and completeness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyMode {
    /// Keep only the newest frame
    #[default]
    LowLatency,
    /// Queue frames and report overflow instead of dropping
    NoFrameDrops,
}

/// Newest-frame-wins delivery
pub const LOW_LATENCY: LatencyMode = LatencyMode::LowLatency;
/// Bounded FIFO delivery
pub const NO_FRAME_DROPS: LatencyMode = LatencyMode::NoFrameDrops;

impl LatencyMode {
    /// `true` selects [`LOW_LATENCY`], `false` [`NO_FRAME_DROPS`]
    pub fn from_low_latency(low_latency: bool) -> Self {
        if low_latency {
            LOW_LATENCY
        } else {
            NO_FRAME_DROPS
        }
    }

    /// Mailbox policy for this mode
    pub fn buffer_policy(self, queue_depth: usize) -> BufferPolicy {
        match self {
            LatencyMode::LowLatency => BufferPolicy::LatestWins,
            LatencyMode::NoFrameDrops => BufferPolicy::Fifo { depth: queue_depth },
        }
    }
}

impl fmt::Display for LatencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatencyMode::LowLatency => write!(f, "low-latency"),
            LatencyMode::NoFrameDrops => write!(f, "no-frame-drops"),
        }
    }
}

/// Everything needed to open one channel
#[derive(Clone)]
pub struct ChannelConfig {
    pub format: CaptureFormat,
    pub latency: LatencyMode,
    /// FIFO depth, ignored in low-latency mode
    pub queue_depth: usize,
    pub signal: SignalParameters,
    /// Content check run on every structurally valid frame
    pub inspector: Option<Arc<dyn FrameInspector>>,
}

impl ChannelConfig {
    pub fn new(format: CaptureFormat, latency: LatencyMode) -> Self {
        Self {
            format,
            latency,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            signal: SignalParameters::default(),
            inspector: None,
        }
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn with_signal(mut self, signal: SignalParameters) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn FrameInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new(CaptureFormat::default(), LOW_LATENCY)
    }
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("format", &self.format)
            .field("latency", &self.latency)
            .field("queue_depth", &self.queue_depth)
            .field("signal", &self.signal)
            .field("inspector", &self.inspector.as_ref().map(|i| i.name().to_string()))
            .finish()
    }
}

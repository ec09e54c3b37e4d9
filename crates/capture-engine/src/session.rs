//! Single-stream convenience wrapper
//!
//! Opens one device, selects a port and starts one channel, then forwards
//! the polling API to it.

use crate::channel::CaptureChannel;
use crate::context::CaptureContext;
use crate::device::CaptureDevice;
use crate::signal::SignalParameters;
use crate::{CaptureError, CaptureFormat, ChannelConfig, Frame, LatencyMode, DEFAULT_QUEUE_DEPTH};
use pixel_convert::PixelLayout;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub device_index: usize,
    pub port: usize,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// Newest-frame-wins when set, bounded FIFO otherwise
    pub low_latency: bool,
    pub queue_depth: usize,
    pub signal: SignalParameters,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            port: 0,
            width: 1920,
            height: 1080,
            frame_rate: 30.0,
            low_latency: true,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            signal: SignalParameters::default(),
        }
    }
}

impl SessionConfig {
    pub fn format(&self) -> CaptureFormat {
        CaptureFormat::new(self.width, self.height, self.frame_rate)
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig::new(self.format(), LatencyMode::from_low_latency(self.low_latency))
            .with_queue_depth(self.queue_depth)
            .with_signal(self.signal)
    }
}

/// One device streaming one channel
///
/// Field order matters: the channel is dropped before the device.
#[derive(Debug)]
pub struct CaptureSession {
    channel: CaptureChannel,
    device: CaptureDevice,
}

impl CaptureSession {
    /// Open the configured device, port and format
    pub fn open(context: &CaptureContext, config: &SessionConfig) -> Result<Self, CaptureError> {
        Self::open_with(context, config, config.channel_config())
    }

    /// Like [`CaptureSession::open`] with an explicit channel configuration
    pub fn open_with(
        context: &CaptureContext,
        config: &SessionConfig,
        channel_config: ChannelConfig,
    ) -> Result<Self, CaptureError> {
        let device = context.create_device(config.device_index)?;
        device.select_port(config.port)?;
        let channel = device.create_channel_with(config.port, channel_config)?;
        info!(
            device = config.device_index,
            port = config.port,
            format = %config.format(),
            "Capture session started"
        );
        Ok(Self { channel, device })
    }

    pub fn update(&self) -> bool {
        self.channel.update()
    }

    pub fn get_frame(&self, layout: PixelLayout) -> Result<Option<Frame>, CaptureError> {
        self.channel.get_frame(layout)
    }

    pub fn has_valid_signal(&self) -> bool {
        self.channel.has_valid_signal()
    }

    pub fn frame_count(&self) -> u64 {
        self.channel.frame_count()
    }

    pub fn channel_count(&self) -> usize {
        self.channel.channel_count()
    }

    pub fn set_signal_parameters(&self, min_good_frames: u32, max_bad_frames: u32) -> Result<(), CaptureError> {
        self.channel.set_signal_parameters(min_good_frames, max_bad_frames)
    }

    /// Open an additional channel on the same device
    pub fn create_channel(
        &self,
        port: usize,
        width: u32,
        height: u32,
        frame_rate: f64,
    ) -> Result<CaptureChannel, CaptureError> {
        self.device
            .create_channel(port, CaptureFormat::new(width, height, frame_rate))
    }

    /// The session's own channel
    pub fn channel(&self) -> &CaptureChannel {
        &self.channel
    }

    pub fn device(&self) -> &CaptureDevice {
        &self.device
    }

    /// Stop the channel and release the device
    pub fn close(self) {
        self.channel.close();
        self.device.close();
    }
}

//! Hardware boundary
//!
//! The engine only ever talks to capture hardware through these traits.
//! [`crate::sim::SimulatedHardware`] implements them in-process; the `ffi`
//! module implements them over the vendor SDK shim.

use crate::mode::DisplayMode;
use pixel_convert::PixelLayout;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by a hardware backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("No device at index {0}")]
    NoSuchDevice(usize),

    #[error("Device is opened elsewhere")]
    AccessDenied,

    #[error("Input port {0} does not exist")]
    NoSuchPort(usize),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Device disconnected")]
    Disconnected,

    #[error("SDK error {0}")]
    Sdk(i32),
}

/// Fault raised by the hardware while delivering a frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareFault {
    #[error("Frame buffer unavailable")]
    BufferUnavailable,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Physical input connector type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoConnection {
    Sdi,
    Hdmi,
    OpticalSdi,
    Component,
    Composite,
    SVideo,
}

impl VideoConnection {
    /// All connection types, in port enumeration order
    pub const ALL: [VideoConnection; 6] = [
        VideoConnection::Sdi,
        VideoConnection::Hdmi,
        VideoConnection::OpticalSdi,
        VideoConnection::Component,
        VideoConnection::Composite,
        VideoConnection::SVideo,
    ];

    /// Bit in the SDK's connection mask
    pub fn bit(self) -> u32 {
        match self {
            VideoConnection::Sdi => 1 << 0,
            VideoConnection::Hdmi => 1 << 1,
            VideoConnection::OpticalSdi => 1 << 2,
            VideoConnection::Component => 1 << 3,
            VideoConnection::Composite => 1 << 4,
            VideoConnection::SVideo => 1 << 5,
        }
    }

    /// Human-readable port name
    pub fn name(self) -> &'static str {
        match self {
            VideoConnection::Sdi => "SDI",
            VideoConnection::Hdmi => "HDMI",
            VideoConnection::OpticalSdi => "Optical SDI",
            VideoConnection::Component => "Component",
            VideoConnection::Composite => "Composite",
            VideoConnection::SVideo => "S-Video",
        }
    }

    /// Ports for every connection present in `mask`
    pub fn ports_from_mask(mask: u32) -> Vec<InputPort> {
        Self::ALL
            .iter()
            .filter(|c| mask & c.bit() != 0)
            .enumerate()
            .map(|(index, c)| InputPort {
                index,
                name: c.name().to_string(),
            })
            .collect()
    }
}

/// One selectable input on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPort {
    pub index: usize,
    pub name: String,
}

/// Static description of a capture device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub ports: Vec<InputPort>,
    /// Channels that may stream at the same time
    pub channel_capacity: usize,
    pub display_modes: Vec<DisplayMode>,
}

impl DeviceInfo {
    /// Port names in enumeration order
    pub fn port_names(&self) -> Vec<String> {
        self.ports.iter().map(|p| p.name.clone()).collect()
    }
}

/// A frame as the hardware presents it, borrowed for the callback only
#[derive(Debug, Clone, Copy)]
pub struct HardwareFrame<'a> {
    /// Pixel bytes, absent when the hardware has no buffer to hand over
    pub bytes: Option<&'a [u8]>,
    pub width: u32,
    pub height: u32,
    pub row_bytes: usize,
    pub layout: PixelLayout,
    pub timestamp_ns: u64,
    /// Hardware flagged the frame as carrying no input signal
    pub no_input_source: bool,
}

/// Receiver for hardware callbacks
///
/// Called on a hardware-owned thread. Implementations must return quickly
/// and never block on the consumer.
pub trait FrameSink: Send + Sync {
    fn frame_arrived(&self, port: usize, frame: Result<HardwareFrame<'_>, HardwareFault>);
}

/// Entry point of a capture backend (the vendor SDK or a simulation)
pub trait HardwareInterface: Send + Sync {
    fn device_count(&self) -> usize;

    fn device_info(&self, index: usize) -> Option<DeviceInfo>;

    /// Take exclusive access to a device; dropping the unit releases it
    fn acquire(&self, index: usize) -> Result<Box<dyn HardwareUnit>, HardwareError>;

    /// Called once, when the last context referencing the backend goes away
    fn shutdown(&self) {}
}

/// An acquired device
pub trait HardwareUnit: Send {
    /// Install (or with `None`, remove) the callback receiver
    ///
    /// Once this returns no call to the previous sink is in flight.
    fn set_callback(&mut self, sink: Option<Arc<dyn FrameSink>>);

    /// Route the device's input selector to `port`
    fn route_input(&mut self, port: usize) -> Result<(), HardwareError>;

    /// Start streaming `port` in `mode`
    fn enable_input(&mut self, port: usize, mode: &DisplayMode) -> Result<(), HardwareError>;

    /// Stop streaming `port`; blocks until its callbacks have returned
    fn disable_input(&mut self, port: usize);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ports_from_mask() {
        let ports = VideoConnection::ports_from_mask(
            VideoConnection::Sdi.bit() | VideoConnection::Hdmi.bit() | VideoConnection::Composite.bit(),
        );
        let names: Vec<_> = ports.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["SDI", "HDMI", "Composite"]);
        assert_eq!(ports[2].index, 2);
    }

    #[test]
    fn test_empty_mask() {
        assert!(VideoConnection::ports_from_mask(0).is_empty());
    }
}

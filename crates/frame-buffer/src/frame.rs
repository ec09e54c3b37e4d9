//! Captured and delivered frame types

use pixel_convert::{ConvertError, ImageDesc, PixelConverter, PixelLayout};
use std::time::Instant;

/// A frame copied out of the hardware buffer, still in its native layout
///
/// Immutable once built; the mailbox shares it through `Arc` and the
/// producer only ever replaces the pointer, never the pixels.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Native pixel data, `desc.stride * desc.height` bytes
    pub data: Vec<u8>,
    /// Geometry of `data`
    pub desc: ImageDesc,
    /// Arrival sequence number (1-based, per channel)
    pub sequence: u64,
    /// Hardware timestamp (nanoseconds)
    pub timestamp_ns: u64,
    /// Whether the frame passed structural and content checks
    pub valid: bool,
    /// Host arrival time
    pub arrived_at: Instant,
}

impl CapturedFrame {
    /// Convert to `layout`, producing an owned frame for the consumer
    pub fn to_frame(&self, layout: PixelLayout) -> Result<Frame, ConvertError> {
        let (data, desc) = PixelConverter::convert(&self.data, &self.desc, layout)?;
        Ok(Frame {
            data,
            width: desc.width,
            height: desc.height,
            stride: desc.stride,
            layout,
            sequence: self.sequence,
            timestamp_ns: self.timestamp_ns,
            valid: self.valid,
        })
    }
}

/// Frame handed to the caller
///
/// Owns its pixels outright; nothing in the capture path keeps a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Pixel data, `stride * height` bytes
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Row stride in bytes
    pub stride: usize,
    /// Layout of `data`
    pub layout: PixelLayout,
    /// Arrival sequence number
    pub sequence: u64,
    /// Hardware timestamp (nanoseconds)
    pub timestamp_ns: u64,
    /// Validity flag from the signal checks
    pub valid: bool,
}

impl Frame {
    /// Array-style shape: (height, width, channels)
    pub fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.layout.channels(),
        )
    }

    /// Bytes of row `y` without stride padding
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let len = self.layout.min_stride(self.width)?;
        let start = y as usize * self.stride;
        self.data.get(start..start + len)
    }

    /// Get RGB pixel at (x, y); `None` outside the frame or for non-RGB layouts
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if self.layout != PixelLayout::Rgb24 || x >= self.width {
            return None;
        }
        let row = self.row(y)?;
        let idx = x as usize * 3;
        Some([row[idx], row[idx + 1], row[idx + 2]])
    }
}

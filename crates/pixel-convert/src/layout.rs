//! Pixel layout catalogue

use serde::{Deserialize, Serialize};
use std::fmt;

/// Memory layout of a pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    /// Packed 4:2:2, byte order Cb Y0 Cr Y1 (hardware native)
    Uyvy,
    /// Packed 4:2:2, byte order Y0 Cb Y1 Cr
    Yuyv,
    /// Packed interleaved 8-bit R G B
    Rgb24,
    /// Packed interleaved 8-bit B G R A
    Bgra32,
    /// Single 8-bit luma plane
    Gray8,
    /// Planar 4:2:0, Y plane followed by interleaved CbCr plane
    Nv12,
}

impl PixelLayout {
    /// The layout capture hardware delivers
    pub const NATIVE: PixelLayout = PixelLayout::Uyvy;

    /// Bytes per pixel for packed layouts, `None` for planar ones
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelLayout::Uyvy | PixelLayout::Yuyv => Some(2),
            PixelLayout::Rgb24 => Some(3),
            PixelLayout::Bgra32 => Some(4),
            PixelLayout::Gray8 => Some(1),
            PixelLayout::Nv12 => None,
        }
    }

    /// Interleaved components per pixel as seen by array consumers
    /// (RGB = 3, 4:2:2 = 2, luma = 1)
    pub fn channels(&self) -> usize {
        match self {
            PixelLayout::Uyvy | PixelLayout::Yuyv => 2,
            PixelLayout::Rgb24 => 3,
            PixelLayout::Bgra32 => 4,
            PixelLayout::Gray8 | PixelLayout::Nv12 => 1,
        }
    }

    /// Whether two horizontally adjacent pixels share one chroma sample
    pub fn is_packed_422(&self) -> bool {
        matches!(self, PixelLayout::Uyvy | PixelLayout::Yuyv)
    }

    /// Minimum row length in bytes for `width` pixels
    pub fn min_stride(&self, width: u32) -> Option<usize> {
        self.bytes_per_pixel().map(|bpp| width as usize * bpp)
    }

    /// Tightly packed buffer size for a `width` x `height` image
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self.bytes_per_pixel() {
            Some(bpp) => w * h * bpp,
            None => w * h + 2 * w.div_ceil(2) * h.div_ceil(2),
        }
    }
}

impl fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelLayout::Uyvy => "uyvy",
            PixelLayout::Yuyv => "yuyv",
            PixelLayout::Rgb24 => "rgb24",
            PixelLayout::Bgra32 => "bgra32",
            PixelLayout::Gray8 => "gray8",
            PixelLayout::Nv12 => "nv12",
        };
        f.write_str(name)
    }
}

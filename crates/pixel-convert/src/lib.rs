//! Pixel Format Conversion
//!
//! Converts the packed 4:2:2 buffers delivered by capture hardware into the
//! layouts consumers ask for. Supports:
//! - UYVY / YUYV 4:2:2 -> packed RGB24, BGRA32 and 8-bit luma
//! - Raw passthrough of the native layout (restrided)
//! - RGB24 -> UYVY, the inverse used to validate round trips

mod convert;
mod layout;

pub use convert::{ImageDesc, PixelConverter};
pub use layout::PixelLayout;

use thiserror::Error;

/// Conversion error types
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConvertError {
    /// No conversion path between the two layouts
    #[error("Unsupported conversion: {from} -> {to}")]
    UnsupportedFormat { from: PixelLayout, to: PixelLayout },

    /// Width or height cannot be represented in the layout
    #[error("Invalid dimensions {width}x{height} for {layout}")]
    InvalidDimensions {
        width: u32,
        height: u32,
        layout: PixelLayout,
    },

    /// Row stride shorter than one row of pixels
    #[error("Row stride {stride} is below the minimum of {min} bytes")]
    InvalidStride { stride: usize, min: usize },

    /// Buffer cannot hold `height` rows at the given stride
    #[error("Buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },
}

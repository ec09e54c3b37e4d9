//! Frame content checks
//!
//! The hardware's "no input" flag misses sources that are connected but
//! idle. An inspector gets a look at every structurally valid frame and can
//! veto it; a vetoed frame counts as invalid for signal lock.

use frame_buffer::CapturedFrame;
use pixel_convert::PixelLayout;

/// Content check run on the producer thread, outside the channel lock
pub trait FrameInspector: Send + Sync {
    /// Return `false` if the frame carries no usable picture
    fn inspect(&self, frame: &CapturedFrame) -> bool;

    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> FrameInspector for F
where
    F: Fn(&CapturedFrame) -> bool + Send + Sync,
{
    fn inspect(&self, frame: &CapturedFrame) -> bool {
        self(frame)
    }
}

/// Flags frames whose sampled mean luma is at or below a threshold
#[derive(Debug, Clone, Copy)]
pub struct BlankFrameDetector {
    /// Highest mean luma still treated as blank
    pub max_mean_luma: u8,
    /// Sample every `sample_step`-th pixel in both directions
    pub sample_step: u32,
}

impl Default for BlankFrameDetector {
    fn default() -> Self {
        Self {
            max_mean_luma: 20,
            sample_step: 8,
        }
    }
}

impl BlankFrameDetector {
    /// Mean luma over the sample grid, `None` for layouts without luma
    pub fn mean_luma(&self, frame: &CapturedFrame) -> Option<f64> {
        let desc = &frame.desc;
        let luma_offset = match desc.layout {
            PixelLayout::Uyvy => 1,
            PixelLayout::Yuyv => 0,
            PixelLayout::Gray8 => 0,
            _ => return None,
        };
        let pixel_bytes = if desc.layout == PixelLayout::Gray8 { 1 } else { 2 };
        let step = self.sample_step.max(1) as usize;

        let mut sum = 0u64;
        let mut count = 0u64;
        for y in (0..desc.height as usize).step_by(step) {
            let row_start = y * desc.stride;
            for x in (0..desc.width as usize).step_by(step) {
                if let Some(&luma) = frame.data.get(row_start + x * pixel_bytes + luma_offset) {
                    sum += luma as u64;
                    count += 1;
                }
            }
        }

        if count == 0 {
            return None;
        }
        Some(sum as f64 / count as f64)
    }
}

impl FrameInspector for BlankFrameDetector {
    fn inspect(&self, frame: &CapturedFrame) -> bool {
        match self.mean_luma(frame) {
            Some(mean) => mean > self.max_mean_luma as f64,
            None => true,
        }
    }

    fn name(&self) -> &str {
        "blank-frame"
    }
}

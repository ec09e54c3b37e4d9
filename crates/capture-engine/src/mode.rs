//! Display modes and format negotiation

use crate::CaptureFormat;
use serde::{Deserialize, Serialize};

/// Frame-rate tolerance when matching a request against a mode
const RATE_TOLERANCE: f64 = 0.1;

/// A video mode supported by a device
///
/// The rate is kept as the SDK reports it, a frame duration over a time
/// scale, so 29.97 is exactly 1001/30000.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMode {
    /// Backend-specific mode identifier
    pub id: u32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub frame_duration: i64,
    pub time_scale: i64,
}

impl DisplayMode {
    pub fn new(id: u32, name: &str, width: u32, height: u32, frame_duration: i64, time_scale: i64) -> Self {
        Self {
            id,
            name: name.to_string(),
            width,
            height,
            frame_duration,
            time_scale,
        }
    }

    /// Frames per second
    pub fn frame_rate(&self) -> f64 {
        if self.frame_duration <= 0 {
            return 0.0;
        }
        self.time_scale as f64 / self.frame_duration as f64
    }

    /// Duration of one frame in nanoseconds
    pub fn frame_period_ns(&self) -> u64 {
        if self.time_scale <= 0 || self.frame_duration <= 0 {
            return 0;
        }
        (self.frame_duration as u128 * 1_000_000_000 / self.time_scale as u128) as u64
    }

    /// Whether this mode satisfies `format`
    pub fn matches(&self, format: &CaptureFormat) -> bool {
        self.width == format.width
            && self.height == format.height
            && (self.frame_rate() - format.frame_rate).abs() <= RATE_TOLERANCE
    }

    /// The common broadcast modes
    pub fn standard_modes() -> Vec<DisplayMode> {
        const MODES: &[(&str, u32, u32, i64, i64)] = &[
            ("NTSC", 720, 486, 1001, 30000),
            ("PAL", 720, 576, 1000, 25000),
            ("720p50", 1280, 720, 1000, 50000),
            ("720p59.94", 1280, 720, 1001, 60000),
            ("720p60", 1280, 720, 1000, 60000),
            ("1080p23.98", 1920, 1080, 1001, 24000),
            ("1080p24", 1920, 1080, 1000, 24000),
            ("1080p25", 1920, 1080, 1000, 25000),
            ("1080p29.97", 1920, 1080, 1001, 30000),
            ("1080p30", 1920, 1080, 1000, 30000),
            ("1080p50", 1920, 1080, 1000, 50000),
            ("1080p59.94", 1920, 1080, 1001, 60000),
            ("1080p60", 1920, 1080, 1000, 60000),
            ("2160p25", 3840, 2160, 1000, 25000),
            ("2160p29.97", 3840, 2160, 1001, 30000),
            ("2160p30", 3840, 2160, 1000, 30000),
        ];

        MODES
            .iter()
            .enumerate()
            .map(|(id, &(name, w, h, duration, scale))| {
                DisplayMode::new(id as u32, name, w, h, duration, scale)
            })
            .collect()
    }
}

/// Pick the mode matching `format`
///
/// Width and height must be exact; the rate must be within 0.1 fps, which
/// lets 24/30/60 select 23.98/29.97/59.94 modes. When several modes match,
/// the one with the closest rate wins.
pub fn negotiate<'a>(modes: &'a [DisplayMode], format: &CaptureFormat) -> Option<&'a DisplayMode> {
    modes
        .iter()
        .filter(|m| m.matches(format))
        .min_by(|a, b| {
            let da = (a.frame_rate() - format.frame_rate).abs();
            let db = (b.frame_rate() - format.frame_rate).abs();
            da.total_cmp(&db)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rate() {
        let mode = DisplayMode::new(0, "1080p29.97", 1920, 1080, 1001, 30000);
        assert!((mode.frame_rate() - 29.97).abs() < 0.001);
        assert_eq!(mode.frame_period_ns(), 33_366_666);
    }

    #[test]
    fn test_negotiate_exact() {
        let modes = DisplayMode::standard_modes();
        let mode = negotiate(&modes, &CaptureFormat::new(1920, 1080, 29.97)).unwrap();
        assert_eq!(mode.name, "1080p29.97");

        let mode = negotiate(&modes, &CaptureFormat::new(1920, 1080, 30.0)).unwrap();
        assert_eq!(mode.name, "1080p30");
    }

    #[test]
    fn test_integer_rate_selects_fractional_mode() {
        let modes = vec![
            DisplayMode::new(0, "1080p23.98", 1920, 1080, 1001, 24000),
            DisplayMode::new(1, "1080p59.94", 1920, 1080, 1001, 60000),
        ];
        assert_eq!(negotiate(&modes, &CaptureFormat::new(1920, 1080, 24.0)).unwrap().id, 0);
        assert_eq!(negotiate(&modes, &CaptureFormat::new(1920, 1080, 60.0)).unwrap().id, 1);
    }

    #[test]
    fn test_no_match() {
        let modes = DisplayMode::standard_modes();
        assert!(negotiate(&modes, &CaptureFormat::new(1920, 1080, 27.0)).is_none());
        assert!(negotiate(&modes, &CaptureFormat::new(1921, 1080, 30.0)).is_none());
        assert!(negotiate(&[], &CaptureFormat::default()).is_none());
    }

    #[test]
    fn test_degenerate_mode() {
        let mode = DisplayMode::new(0, "broken", 10, 10, 0, 0);
        assert_eq!(mode.frame_rate(), 0.0);
        assert_eq!(mode.frame_period_ns(), 0);
    }
}

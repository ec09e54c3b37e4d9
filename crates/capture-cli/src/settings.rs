//! Layered configuration: defaults, `deckcap.toml`, `DECKCAP_*` environment

use anyhow::{Context, Result};
use capture_engine::{CaptureFormat, PixelLayout, SignalParameters, DEFAULT_QUEUE_DEPTH};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

/// Default config file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "deckcap.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub metrics: MetricsSettings,
    pub capture: CaptureSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Serve Prometheus metrics on this address
    pub listen: Option<SocketAddr>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub device: usize,
    pub port: usize,
    /// Tried in order until the device accepts one
    pub formats: Vec<CaptureFormat>,
    pub low_latency: bool,
    pub queue_depth: usize,
    pub signal: SignalParameters,
    /// Give up if no lock within this many seconds
    pub signal_timeout_secs: u64,
    /// Treat near-black frames as no signal
    pub blank_detection: bool,
    /// Layout frames are converted to in the poll loop
    pub layout: PixelLayout,
    /// Stop after this many seconds; run until Ctrl-C when unset
    pub duration_secs: Option<u64>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: 0,
            port: 0,
            formats: vec![
                CaptureFormat::new(1920, 1080, 29.97),
                CaptureFormat::new(1920, 1080, 25.0),
                CaptureFormat::new(1280, 720, 59.94),
            ],
            low_latency: true,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            signal: SignalParameters::default(),
            signal_timeout_secs: 5,
            blank_detection: false,
            layout: PixelLayout::Rgb24,
            duration_secs: None,
        }
    }
}

impl Settings {
    /// Load settings from `path` (or `deckcap.toml` if present) and the
    /// environment; `DECKCAP_CAPTURE__DEVICE=1` sets `capture.device`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("DECKCAP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.capture.formats.len(), 3);
        assert_eq!(settings.capture.signal, SignalParameters::default());
        assert!(settings.metrics.listen.is_none());
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_partial_toml() {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(
                r#"
                [capture]
                device = 1
                low_latency = false
                formats = [{ width = 720, height = 486, frame_rate = 29.97 }]

                [capture.signal]
                max_bad_frames = 8
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.capture.device, 1);
        assert!(!settings.capture.low_latency);
        assert_eq!(settings.capture.formats, vec![CaptureFormat::new(720, 486, 29.97)]);
        assert_eq!(settings.capture.signal, SignalParameters::new(3, 8));
        assert_eq!(settings.capture.queue_depth, DEFAULT_QUEUE_DEPTH);
    }
}

//! deckcap - professional video capture from the command line

mod capture;
mod list;
mod settings;
mod telemetry;

use anyhow::Result;
use capture_engine::{CaptureContext, CaptureFormat, HardwareInterface, PixelLayout, SimulatedHardware};
use clap::{Args, Parser, Subcommand};
use settings::Settings;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "deckcap", version, about = "Capture frames from professional video inputs")]
struct Cli {
    /// Configuration file (defaults to ./deckcap.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Use simulated hardware instead of the capture SDK
    #[arg(long, global = true)]
    simulate: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List devices, ports and display modes
    List {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Open a capture session and poll it until interrupted
    Capture(CaptureArgs),
}

#[derive(Debug, Args)]
struct CaptureArgs {
    #[arg(long)]
    device: Option<usize>,

    #[arg(long)]
    port: Option<usize>,

    /// Format to try, as WIDTHxHEIGHT@FPS; repeat for fallbacks
    #[arg(long = "format", value_name = "WxH@FPS", value_parser = parse_format)]
    formats: Vec<CaptureFormat>,

    /// Queue frames instead of keeping only the newest
    #[arg(long)]
    no_frame_drops: bool,

    /// FIFO depth for --no-frame-drops (2-8)
    #[arg(long)]
    queue_depth: Option<usize>,

    /// Seconds to wait for a signal lock
    #[arg(long, value_name = "SECS")]
    signal_timeout: Option<u64>,

    /// Treat near-black frames as no signal
    #[arg(long)]
    blank_detection: bool,

    /// Output layout: uyvy, yuyv, rgb24, bgra32, gray8
    #[arg(long, value_parser = parse_layout)]
    layout: Option<PixelLayout>,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,
}

impl CaptureArgs {
    fn apply(self, settings: &mut settings::CaptureSettings) {
        if let Some(device) = self.device {
            settings.device = device;
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if !self.formats.is_empty() {
            settings.formats = self.formats;
        }
        if self.no_frame_drops {
            settings.low_latency = false;
        }
        if let Some(depth) = self.queue_depth {
            settings.queue_depth = depth;
        }
        if let Some(timeout) = self.signal_timeout {
            settings.signal_timeout_secs = timeout;
        }
        if self.blank_detection {
            settings.blank_detection = true;
        }
        if let Some(layout) = self.layout {
            settings.layout = layout;
        }
        if self.duration.is_some() {
            settings.duration_secs = self.duration;
        }
    }
}

fn parse_format(s: &str) -> Result<CaptureFormat, String> {
    let (size, rate) = s.split_once('@').ok_or("expected WIDTHxHEIGHT@FPS")?;
    let (width, height) = size.split_once('x').ok_or("expected WIDTHxHEIGHT@FPS")?;
    let width = width.trim().parse().map_err(|_| format!("invalid width '{width}'"))?;
    let height = height.trim().parse().map_err(|_| format!("invalid height '{height}'"))?;
    let rate: f64 = rate.trim().parse().map_err(|_| format!("invalid frame rate '{rate}'"))?;
    if rate <= 0.0 {
        return Err("frame rate must be positive".to_string());
    }
    Ok(CaptureFormat::new(width, height, rate))
}

fn parse_layout(s: &str) -> Result<PixelLayout, String> {
    match s.to_ascii_lowercase().as_str() {
        "uyvy" => Ok(PixelLayout::Uyvy),
        "yuyv" => Ok(PixelLayout::Yuyv),
        "rgb24" | "rgb" => Ok(PixelLayout::Rgb24),
        "bgra32" | "bgra" => Ok(PixelLayout::Bgra32),
        "gray8" | "gray" => Ok(PixelLayout::Gray8),
        "nv12" => Ok(PixelLayout::Nv12),
        other => Err(format!("unknown layout '{other}'")),
    }
}

fn hardware(simulate: bool) -> Result<Arc<dyn HardwareInterface>> {
    if simulate {
        info!("Using simulated hardware");
        return Ok(Arc::new(SimulatedHardware::generating(
            SimulatedHardware::default_devices(),
        )));
    }

    #[cfg(feature = "ffi")]
    {
        Ok(Arc::new(capture_engine::ffi::FfiHardware::new()?))
    }
    #[cfg(not(feature = "ffi"))]
    {
        anyhow::bail!("Built without capture SDK support. Rebuild with --features ffi or pass --simulate")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if cli.json_logs {
        settings.logging.json = true;
    }

    telemetry::init_logging(&settings.logging)?;
    telemetry::init_metrics(&settings.metrics)?;
    info!("deckcap v{}", env!("CARGO_PKG_VERSION"));

    let ctx = CaptureContext::new(hardware(cli.simulate)?);

    match cli.command {
        Command::List { json } => list::run(&ctx, json),
        Command::Capture(args) => {
            args.apply(&mut settings.capture);
            capture::run(&ctx, &settings.capture).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format("1920x1080@29.97").unwrap(), CaptureFormat::new(1920, 1080, 29.97));
        assert!(parse_format("1920x1080").is_err());
        assert!(parse_format("axb@30").is_err());
        assert!(parse_format("1920x1080@0").is_err());
    }

    #[test]
    fn test_cli_overrides_settings() {
        let cli = Cli::parse_from([
            "deckcap",
            "--simulate",
            "capture",
            "--device",
            "1",
            "--format",
            "1280x720@60",
            "--format",
            "720x486@29.97",
            "--no-frame-drops",
            "--layout",
            "gray",
        ]);
        assert!(cli.simulate);
        let Command::Capture(args) = cli.command else {
            panic!("expected capture command");
        };

        let mut settings = settings::CaptureSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings.device, 1);
        assert_eq!(settings.formats.len(), 2);
        assert!(!settings.low_latency);
        assert_eq!(settings.layout, PixelLayout::Gray8);
        assert_eq!(settings.signal_timeout_secs, 5);
    }
}

//! `deckcap capture`
//!
//! Caller-side policies live here, not in the engine: trying formats until
//! one is accepted, and bounding the wait for a signal lock.

use crate::settings::CaptureSettings;
use anyhow::{bail, Context, Result};
use capture_engine::{
    BlankFrameDetector, CaptureContext, CaptureError, CaptureSession, ChannelConfig, LatencyMode,
    SessionConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// How often the poll loop asks for a new frame
const POLL_INTERVAL: Duration = Duration::from_millis(5);
/// How often the lock state is checked while waiting for signal
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(10);
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

fn channel_config(settings: &CaptureSettings, session: &SessionConfig) -> ChannelConfig {
    let mut config = ChannelConfig::new(
        session.format(),
        LatencyMode::from_low_latency(settings.low_latency),
    )
    .with_queue_depth(settings.queue_depth)
    .with_signal(settings.signal);
    if settings.blank_detection {
        config = config.with_inspector(Arc::new(BlankFrameDetector::default()));
    }
    config
}

/// Open the first candidate format the device accepts
pub fn open_with_fallback(ctx: &CaptureContext, settings: &CaptureSettings) -> Result<CaptureSession> {
    if settings.formats.is_empty() {
        bail!("No capture formats configured");
    }

    for format in &settings.formats {
        let session_config = SessionConfig {
            device_index: settings.device,
            port: settings.port,
            width: format.width,
            height: format.height,
            frame_rate: format.frame_rate,
            low_latency: settings.low_latency,
            queue_depth: settings.queue_depth,
            signal: settings.signal,
        };
        match CaptureSession::open_with(ctx, &session_config, channel_config(settings, &session_config)) {
            Ok(session) => {
                info!(%format, "Format accepted");
                return Ok(session);
            }
            Err(CaptureError::FormatUnsupported(_)) => {
                warn!(%format, "Format not supported, trying next");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open device {}", settings.device));
            }
        }
    }
    bail!("Device {} supports none of the configured formats", settings.device)
}

/// Poll until the signal locks or `timeout` passes
pub async fn wait_for_signal(session: &CaptureSession, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if session.has_valid_signal() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(SIGNAL_POLL_INTERVAL).await;
    }
}

#[derive(Debug, Default)]
struct Stats {
    delivered: u64,
    bytes: u64,
}

pub async fn run(ctx: &CaptureContext, settings: &CaptureSettings) -> Result<()> {
    let session = open_with_fallback(ctx, settings)?;
    let channel = session.channel();
    info!(
        device = %session.device().name(),
        port = channel.port(),
        mode = %channel.display_mode().name,
        latency = %channel.latency_mode(),
        "Capturing"
    );

    let timeout = Duration::from_secs(settings.signal_timeout_secs);
    if !wait_for_signal(&session, timeout).await {
        session.close();
        bail!("No signal within {}s", settings.signal_timeout_secs);
    }
    info!("Signal locked");

    let mut poll = interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut report = interval(REPORT_INTERVAL);
    report.tick().await;

    let stop_at = settings.duration_secs.map(|s| Instant::now() + Duration::from_secs(s));
    let mut stats = Stats::default();
    let mut last_report = Stats::default();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = poll.tick() => {
                while session.update() {
                    if let Some(frame) = session.get_frame(settings.layout)? {
                        stats.delivered += 1;
                        stats.bytes += frame.data.len() as u64;
                    }
                }
                if stop_at.is_some_and(|t| Instant::now() >= t) {
                    break;
                }
            }
            _ = report.tick() => {
                info!(
                    frames = session.frame_count(),
                    delivered = stats.delivered - last_report.delivered,
                    mb = (stats.bytes - last_report.bytes) as f64 / 1_000_000.0,
                    locked = session.has_valid_signal(),
                    stable = channel.has_stable_frame_rate(),
                    overflows = channel.overflow_count(),
                    dropped = channel.dropped_count(),
                    "Capture stats"
                );
                last_report = Stats { delivered: stats.delivered, bytes: stats.bytes };
            }
        }
    }

    info!(
        frames = session.frame_count(),
        delivered = stats.delivered,
        overflows = channel.overflow_count(),
        "Capture finished"
    );
    session.close();
    Ok(())
}

//! Capture channels
//!
//! A channel is one active stream: a port on a device, opened in a
//! negotiated mode. The hardware thread pushes frames in through
//! [`ChannelCore::on_frame`]; the consumer polls through [`CaptureChannel`].
//!
//! All mutable per-channel state sits behind a single mutex. The producer
//! copies pixels and runs content checks before taking it, so the critical
//! section is a pointer swap plus a few counter updates, and any frame that
//! leaves the mailbox is freed after the lock is released.

use crate::device::DeviceShared;
use crate::hardware::{HardwareFault, HardwareFrame};
use crate::inspect::FrameInspector;
use crate::mode::DisplayMode;
use crate::signal::{SignalLockTracker, SignalParameters, SignalState, SignalTransition};
use crate::{CaptureError, CaptureFormat, ChannelConfig, LatencyMode};
use frame_buffer::{CapturedFrame, Frame, FrameBuffer, PublishOutcome};
use metrics::Counter;
use pixel_convert::{ImageDesc, PixelLayout};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Frames needed before the arrival rate is judged
const STABLE_RATE_MIN_FRAMES: u64 = 10;
/// Longest gap since the last arrival for the rate to count as stable
const STABLE_RATE_MAX_GAP: Duration = Duration::from_millis(500);

/// Channel lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Registered with the device, stream not yet started
    Opening,
    /// Streaming, no lock acquired yet
    WaitingSignal,
    Locked,
    /// Lock was lost, waiting for it to come back
    Unlocked,
    Closed,
}

struct ChannelState {
    status: ChannelStatus,
    buffer: FrameBuffer,
    tracker: SignalLockTracker,
    frame_count: u64,
    fault_count: u64,
    last_arrival: Option<Instant>,
    /// The FIFO refused the previous arrival
    overflowing: bool,
    /// Geometry of the most recent frame with usable pixels
    last_desc: Option<ImageDesc>,
}

struct ChannelMetrics {
    frames: Counter,
    bad_frames: Counter,
    overflows: Counter,
    acquired: Counter,
    lost: Counter,
}

impl ChannelMetrics {
    fn new(device: usize, port: usize) -> Self {
        let device = device.to_string();
        let port = port.to_string();
        Self {
            frames: metrics::counter!("capture_frames_total", "device" => device.clone(), "port" => port.clone()),
            bad_frames: metrics::counter!("capture_bad_frames_total", "device" => device.clone(), "port" => port.clone()),
            overflows: metrics::counter!("capture_buffer_overflow_total", "device" => device.clone(), "port" => port.clone()),
            acquired: metrics::counter!("capture_signal_transitions_total", "device" => device.clone(), "port" => port.clone(), "kind" => "acquired"),
            lost: metrics::counter!("capture_signal_transitions_total", "device" => device, "port" => port, "kind" => "lost"),
        }
    }
}

/// Channel state shared between the hardware callback and the consumer
pub(crate) struct ChannelCore {
    device_index: usize,
    port: usize,
    format: CaptureFormat,
    mode: DisplayMode,
    latency: LatencyMode,
    inspector: Option<Arc<dyn FrameInspector>>,
    /// Arrival ticket, numbered outside the lock
    sequence: AtomicU64,
    metrics: ChannelMetrics,
    state: Mutex<ChannelState>,
}

impl ChannelCore {
    pub(crate) fn new(
        device_index: usize,
        port: usize,
        mode: DisplayMode,
        config: ChannelConfig,
    ) -> Result<Self, CaptureError> {
        config.signal.validate()?;
        let buffer = FrameBuffer::new(config.latency.buffer_policy(config.queue_depth))?;

        Ok(Self {
            device_index,
            port,
            format: config.format,
            mode,
            latency: config.latency,
            inspector: config.inspector,
            sequence: AtomicU64::new(0),
            metrics: ChannelMetrics::new(device_index, port),
            state: Mutex::new(ChannelState {
                status: ChannelStatus::Opening,
                buffer,
                tracker: SignalLockTracker::new(config.signal),
                frame_count: 0,
                fault_count: 0,
                last_arrival: None,
                overflowing: false,
                last_desc: None,
            }),
        })
    }

    /// Lock the state, recovering it if a callback panicked while holding it
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn port(&self) -> usize {
        self.port
    }

    /// Hardware has started streaming
    pub(crate) fn mark_streaming(&self) {
        let mut state = self.lock();
        if state.status == ChannelStatus::Opening {
            state.status = ChannelStatus::WaitingSignal;
        }
    }

    /// Terminal; later callbacks are ignored
    pub(crate) fn mark_closed(&self) {
        let released = {
            let mut state = self.lock();
            if state.status == ChannelStatus::Closed {
                return;
            }
            state.status = ChannelStatus::Closed;
            // Swap the mailbox out so its frames are freed after unlocking
            std::mem::replace(&mut state.buffer, FrameBuffer::LatestWins(Default::default()))
        };
        drop(released);
        info!(device = self.device_index, port = self.port, "Channel closed");
    }

    /// Producer entry point, called on the hardware thread
    pub(crate) fn on_frame(&self, frame: Result<HardwareFrame<'_>, HardwareFault>) {
        let frame = match frame {
            Ok(frame) => frame,
            Err(fault) => {
                warn!(device = self.device_index, port = self.port, %fault, "Hardware fault during frame delivery");
                self.record_fault();
                return;
            }
        };

        let captured = self.capture(&frame);
        let valid = match &captured {
            Some(c) => c.valid,
            None => false,
        };
        let captured = captured.map(Arc::new);

        let (transition, outcome, released, frame_count, first_overflow) = {
            let mut state = self.lock();
            if state.status == ChannelStatus::Closed {
                return;
            }
            state.frame_count += 1;
            state.last_arrival = Some(Instant::now());

            let transition = state.tracker.record(valid);
            apply_transition(&mut state.status, transition);

            let (outcome, released) = match captured {
                Some(captured) => {
                    state.last_desc = Some(captured.desc);
                    let publish = state.buffer.publish(captured);
                    (Some(publish.outcome), publish.released)
                }
                None => (None, None),
            };
            let first_overflow = overflow_run_started(&mut state.overflowing, outcome);
            (transition, outcome, released, state.frame_count, first_overflow)
        };
        drop(released);

        self.metrics.frames.increment(1);
        if !valid {
            self.metrics.bad_frames.increment(1);
        }
        match outcome {
            Some(PublishOutcome::Full) => {
                self.metrics.overflows.increment(1);
                if first_overflow {
                    warn!(device = self.device_index, port = self.port, frame_count, "Frame queue full, refusing arrivals");
                } else {
                    debug!(port = self.port, frame_count, "Frame queue still full, arrival refused");
                }
            }
            Some(PublishOutcome::Replaced { dropped_sequence }) => {
                trace!(port = self.port, dropped_sequence, "Unread frame replaced");
            }
            _ => {}
        }
        self.log_transition(transition);
    }

    /// Copy the hardware buffer and classify the frame
    ///
    /// Returns `None` when there are no usable pixels to keep.
    fn capture(&self, frame: &HardwareFrame<'_>) -> Option<CapturedFrame> {
        let bytes = frame.bytes?;
        let desc = ImageDesc::with_stride(frame.width, frame.height, frame.row_bytes, frame.layout);
        if let Err(e) = desc.validate(bytes.len()) {
            debug!(port = self.port, error = %e, "Discarding malformed frame");
            return None;
        }

        let geometry_ok = frame.width == self.mode.width && frame.height == self.mode.height;
        let mut captured = CapturedFrame {
            data: bytes[..desc.required_len()].to_vec(),
            desc,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp_ns: frame.timestamp_ns,
            valid: !frame.no_input_source && geometry_ok,
            arrived_at: Instant::now(),
        };

        if captured.valid {
            if let Some(inspector) = &self.inspector {
                captured.valid = inspector.inspect(&captured);
            }
        }
        Some(captured)
    }

    /// Count a fault as an invalid frame
    pub(crate) fn record_fault(&self) {
        let transition = {
            let mut state = self.lock();
            if state.status == ChannelStatus::Closed {
                return;
            }
            state.fault_count += 1;
            let transition = state.tracker.record(false);
            apply_transition(&mut state.status, transition);
            transition
        };
        self.metrics.bad_frames.increment(1);
        self.log_transition(transition);
    }

    fn log_transition(&self, transition: Option<SignalTransition>) {
        match transition {
            Some(SignalTransition::Acquired) => {
                self.metrics.acquired.increment(1);
                info!(device = self.device_index, port = self.port, mode = %self.mode.name, "Signal locked");
            }
            Some(SignalTransition::Lost) => {
                self.metrics.lost.increment(1);
                warn!(device = self.device_index, port = self.port, "Signal lost");
            }
            None => {}
        }
    }
}

/// Track runs of refused arrivals; `true` for the first refusal of a run
fn overflow_run_started(overflowing: &mut bool, outcome: Option<PublishOutcome>) -> bool {
    match outcome {
        Some(PublishOutcome::Full) => !std::mem::replace(overflowing, true),
        Some(_) => {
            *overflowing = false;
            false
        }
        None => false,
    }
}

fn apply_transition(status: &mut ChannelStatus, transition: Option<SignalTransition>) {
    match transition {
        Some(SignalTransition::Acquired) => *status = ChannelStatus::Locked,
        Some(SignalTransition::Lost) => *status = ChannelStatus::Unlocked,
        None => {}
    }
}

/// Consumer handle for one channel
///
/// Dropping the handle closes the channel.
pub struct CaptureChannel {
    core: Arc<ChannelCore>,
    device: Arc<DeviceShared>,
}

impl CaptureChannel {
    pub(crate) fn new(core: Arc<ChannelCore>, device: Arc<DeviceShared>) -> Self {
        Self { core, device }
    }

    /// Consume the "new frame" notification
    ///
    /// Returns `true` if a frame the consumer has not seen is now current.
    /// In FIFO mode this advances by exactly one queued frame. Signal state
    /// is only ever changed by arrivals, never by polling.
    pub fn update(&self) -> bool {
        let (advanced, released) = {
            let mut state = self.core.lock();
            if state.status == ChannelStatus::Closed {
                return false;
            }
            state.buffer.advance()
        };
        drop(released);
        advanced
    }

    /// Copy out the current frame, converted to `layout`
    ///
    /// `Ok(None)` until the first frame arrives. The mailbox is untouched
    /// when the conversion fails.
    pub fn get_frame(&self, layout: PixelLayout) -> Result<Option<Frame>, CaptureError> {
        let current = {
            let state = self.core.lock();
            if state.status == ChannelStatus::Closed {
                return Err(CaptureError::ChannelClosed);
            }
            state.buffer.current()
        };
        match current {
            Some(frame) => Ok(Some(frame.to_frame(layout)?)),
            None => Ok(None),
        }
    }

    /// Whether the signal is currently locked
    pub fn has_valid_signal(&self) -> bool {
        let state = self.core.lock();
        state.status != ChannelStatus::Closed && state.tracker.is_locked()
    }

    /// Frames received from the hardware, valid or not
    pub fn frame_count(&self) -> u64 {
        self.core.lock().frame_count
    }

    /// Concurrent channels the owning device supports
    pub fn channel_count(&self) -> usize {
        self.device.channel_capacity()
    }

    /// Change the lock thresholds; applies from the next frame
    pub fn set_signal_parameters(&self, min_good_frames: u32, max_bad_frames: u32) -> Result<(), CaptureError> {
        let params = SignalParameters::new(min_good_frames, max_bad_frames);
        let mut state = self.core.lock();
        if state.status == ChannelStatus::Closed {
            return Err(CaptureError::ChannelClosed);
        }
        state.tracker.set_parameters(params)?;
        debug!(port = self.core.port, min_good_frames, max_bad_frames, "Signal parameters updated");
        Ok(())
    }

    pub fn signal_parameters(&self) -> SignalParameters {
        self.core.lock().tracker.parameters()
    }

    pub fn signal_state(&self) -> SignalState {
        self.core.lock().tracker.state()
    }

    /// At least ten frames seen and the last one arrived within 500 ms
    pub fn has_stable_frame_rate(&self) -> bool {
        let state = self.core.lock();
        state.frame_count >= STABLE_RATE_MIN_FRAMES
            && state
                .last_arrival
                .is_some_and(|t| t.elapsed() < STABLE_RATE_MAX_GAP)
    }

    /// Bytes `get_frame(layout)` would return for the current geometry, 0
    /// before the first frame
    pub fn frame_size(&self, layout: PixelLayout) -> usize {
        match self.core.lock().last_desc {
            Some(desc) => layout.frame_size(desc.width, desc.height),
            None => 0,
        }
    }

    /// Arrivals refused by a full FIFO
    pub fn overflow_count(&self) -> u64 {
        self.core.lock().buffer.overflows()
    }

    /// Unread frames replaced in low-latency mode
    pub fn dropped_count(&self) -> u64 {
        self.core.lock().buffer.dropped()
    }

    /// Hardware faults seen during delivery
    pub fn fault_count(&self) -> u64 {
        self.core.lock().fault_count
    }

    /// Frames waiting for `update`
    pub fn pending(&self) -> usize {
        self.core.lock().buffer.pending()
    }

    pub fn status(&self) -> ChannelStatus {
        self.core.lock().status
    }

    pub fn is_closed(&self) -> bool {
        self.status() == ChannelStatus::Closed
    }

    pub fn port(&self) -> usize {
        self.core.port
    }

    pub fn device_index(&self) -> usize {
        self.core.device_index
    }

    pub fn format(&self) -> CaptureFormat {
        self.core.format
    }

    /// Mode the hardware is streaming in
    pub fn display_mode(&self) -> &DisplayMode {
        &self.core.mode
    }

    pub fn latency_mode(&self) -> LatencyMode {
        self.core.latency
    }

    /// Stop the stream and release the port
    ///
    /// Returns once no callback for this channel is running. Idempotent.
    pub fn close(&self) {
        self.device.release_channel(&self.core);
    }
}

impl Drop for CaptureChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CaptureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureChannel")
            .field("device", &self.core.device_index)
            .field("port", &self.core.port)
            .field("mode", &self.core.mode.name)
            .field("latency", &self.core.latency)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NO_FRAME_DROPS;

    fn core(config: ChannelConfig) -> ChannelCore {
        let mode = DisplayMode::new(0, "tiny", 4, 2, 1000, 30000);
        ChannelCore::new(0, 0, mode, config).unwrap()
    }

    fn hw_frame(bytes: &[u8]) -> HardwareFrame<'_> {
        HardwareFrame {
            bytes: Some(bytes),
            width: 4,
            height: 2,
            row_bytes: 8,
            layout: PixelLayout::Uyvy,
            timestamp_ns: 0,
            no_input_source: false,
        }
    }

    const PIXELS: [u8; 16] = [128, 100, 128, 100, 128, 100, 128, 100, 128, 100, 128, 100, 128, 100, 128, 100];

    #[test]
    fn test_valid_frames_lock() {
        let core = core(ChannelConfig::default());
        core.mark_streaming();
        for _ in 0..3 {
            core.on_frame(Ok(hw_frame(&PIXELS)));
        }
        let state = core.lock();
        assert_eq!(state.status, ChannelStatus::Locked);
        assert_eq!(state.frame_count, 3);
    }

    #[test]
    fn test_no_input_frames_are_kept_but_invalid() {
        let core = core(ChannelConfig::default());
        let mut frame = hw_frame(&PIXELS);
        frame.no_input_source = true;
        core.on_frame(Ok(frame));

        let state = core.lock();
        assert_eq!(state.frame_count, 1);
        assert_eq!(state.tracker.state().consecutive_bad, 1);
        let current = state.buffer.current().unwrap();
        assert!(!current.valid);
    }

    #[test]
    fn test_missing_bytes_count_as_bad() {
        let core = core(ChannelConfig::default());
        let mut frame = hw_frame(&PIXELS);
        frame.bytes = None;
        core.on_frame(Ok(frame));
        core.on_frame(Ok(hw_frame(&PIXELS[..4])));

        let state = core.lock();
        assert_eq!(state.frame_count, 2);
        assert_eq!(state.tracker.state().consecutive_bad, 2);
        assert!(state.buffer.current().is_none());
    }

    #[test]
    fn test_wrong_geometry_is_invalid() {
        let core = core(ChannelConfig::default());
        let mut frame = hw_frame(&PIXELS);
        frame.width = 2;
        frame.row_bytes = 4;
        frame.height = 4;
        core.on_frame(Ok(frame));
        assert!(!core.lock().buffer.current().unwrap().valid);
    }

    #[test]
    fn test_fault_feeds_tracker() {
        let core = core(ChannelConfig::default().with_signal(SignalParameters::new(1, 2)));
        core.on_frame(Ok(hw_frame(&PIXELS)));
        core.on_frame(Err(HardwareFault::BufferUnavailable));
        core.on_frame(Err(HardwareFault::Transport("link down".into())));

        let state = core.lock();
        assert_eq!(state.status, ChannelStatus::Unlocked);
        assert_eq!(state.fault_count, 2);
        assert_eq!(state.frame_count, 1);
    }

    #[test]
    fn test_inspector_veto() {
        let config = ChannelConfig::default().with_inspector(Arc::new(|_: &CapturedFrame| false));
        let core = core(config);
        for _ in 0..5 {
            core.on_frame(Ok(hw_frame(&PIXELS)));
        }
        assert_eq!(core.lock().status, ChannelStatus::Opening);
    }

    #[test]
    fn test_closed_core_ignores_frames() {
        let core = core(ChannelConfig::new(Default::default(), NO_FRAME_DROPS));
        core.on_frame(Ok(hw_frame(&PIXELS)));
        core.mark_closed();
        core.on_frame(Ok(hw_frame(&PIXELS)));
        core.record_fault();

        let state = core.lock();
        assert_eq!(state.status, ChannelStatus::Closed);
        assert_eq!(state.frame_count, 1);
        assert_eq!(state.fault_count, 0);
        assert!(state.buffer.current().is_none());
    }

    #[test]
    fn test_overflow_runs() {
        let mut overflowing = false;
        assert!(overflow_run_started(&mut overflowing, Some(PublishOutcome::Full)));
        assert!(!overflow_run_started(&mut overflowing, Some(PublishOutcome::Full)));
        assert!(!overflow_run_started(&mut overflowing, None));
        assert!(overflowing);
        assert!(!overflow_run_started(&mut overflowing, Some(PublishOutcome::Stored)));
        assert!(overflow_run_started(&mut overflowing, Some(PublishOutcome::Full)));
    }

    #[test]
    fn test_full_queue_marks_overflow_until_drained() {
        let core = core(ChannelConfig::new(Default::default(), NO_FRAME_DROPS).with_queue_depth(2));
        for _ in 0..4 {
            core.on_frame(Ok(hw_frame(&PIXELS)));
        }
        {
            let mut state = core.lock();
            assert!(state.overflowing);
            assert_eq!(state.buffer.overflows(), 2);
            assert!(state.buffer.advance().0);
        }
        core.on_frame(Ok(hw_frame(&PIXELS)));
        assert!(!core.lock().overflowing);
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let core = core(ChannelConfig::new(Default::default(), NO_FRAME_DROPS));
        core.on_frame(Ok(hw_frame(&PIXELS)));
        core.on_frame(Ok(hw_frame(&PIXELS)));
        let mut state = core.lock();
        assert!(state.buffer.advance().0);
        assert_eq!(state.buffer.current().unwrap().sequence, 1);
        assert!(state.buffer.advance().0);
        assert_eq!(state.buffer.current().unwrap().sequence, 2);
    }
}

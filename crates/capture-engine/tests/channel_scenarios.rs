//! End-to-end channel behaviour against simulated hardware

use capture_engine::{
    CaptureContext, CaptureError, CaptureFormat, CaptureSession, CapturedFrame, ChannelConfig,
    ChannelStatus, HardwareFault, PixelLayout, SessionConfig, SignalParameters, SimDeviceSpec, SimFrame,
    SimulatedHardware, LOW_LATENCY, NO_FRAME_DROPS,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

const MINI: usize = 0;
const QUAD: usize = 1;

fn setup() -> (Arc<SimulatedHardware>, CaptureContext) {
    let hw = Arc::new(SimulatedHardware::default());
    let ctx = CaptureContext::new(hw.clone());
    (hw, ctx)
}

fn fmt_1080p2997() -> CaptureFormat {
    CaptureFormat::new(1920, 1080, 29.97)
}

fn small_format() -> CaptureFormat {
    CaptureFormat::new(720, 486, 29.97)
}

#[test]
fn test_three_good_frames_lock_the_signal() {
    let (hw, ctx) = setup();
    let session = CaptureSession::open(
        &ctx,
        &SessionConfig {
            device_index: MINI,
            port: 0,
            width: 1920,
            height: 1080,
            frame_rate: 29.97,
            ..Default::default()
        },
    )
    .unwrap();

    let frame = SimFrame::color_bars(1920, 1080);
    for i in 0..3 {
        assert!(!session.has_valid_signal());
        assert!(hw.inject(MINI, 0, &frame.clone().with_timestamp(i * 33_366_666)));
    }

    assert!(session.update());
    assert!(session.has_valid_signal());
    assert_eq!(session.frame_count(), 3);
    assert_eq!(session.channel().status(), ChannelStatus::Locked);
    assert_eq!(session.channel().display_mode().name, "1080p29.97");

    let rgb = session.get_frame(PixelLayout::Rgb24).unwrap().unwrap();
    assert_eq!(rgb.shape(), (1080, 1920, 3));
    assert_eq!(rgb.data.len(), 1920 * 1080 * 3);
    assert_eq!(rgb.timestamp_ns, 2 * 33_366_666);
}

#[test]
fn test_signal_drops_after_max_bad_frames() {
    let (hw, ctx) = setup();
    let device = ctx.create_device(MINI).unwrap();
    let channel = device.create_channel(0, small_format()).unwrap();

    let good = SimFrame::color_bars(720, 486);
    let bad = SimFrame::black(720, 486).without_input();
    for _ in 0..3 {
        hw.inject(MINI, 0, &good);
    }
    assert!(channel.has_valid_signal());

    for _ in 0..4 {
        hw.inject(MINI, 0, &bad);
        assert!(channel.has_valid_signal());
    }
    hw.inject(MINI, 0, &bad);
    assert!(!channel.has_valid_signal());
    assert_eq!(channel.status(), ChannelStatus::Unlocked);
    assert_eq!(channel.frame_count(), 8);

    // Frames keep flowing while unlocked
    assert!(channel.update());
    let frame = channel.get_frame(PixelLayout::Uyvy).unwrap().unwrap();
    assert!(!frame.valid);
}

#[test]
fn test_frame_count_before_first_frame() {
    let (_hw, ctx) = setup();
    let device = ctx.create_device(MINI).unwrap();
    let channel = device.create_channel(0, small_format()).unwrap();
    assert_eq!(channel.frame_count(), 0);
    assert!(!channel.update());
    assert!(channel.get_frame(PixelLayout::Rgb24).unwrap().is_none());
    assert_eq!(channel.status(), ChannelStatus::WaitingSignal);
}

#[test]
fn test_low_latency_returns_newest_frame() {
    let (hw, ctx) = setup();
    let device = ctx.create_device(QUAD).unwrap();
    let channel = device
        .create_channel_with(1, ChannelConfig::new(small_format(), LOW_LATENCY))
        .unwrap();

    for luma in [40u8, 80, 120, 160, 200] {
        hw.inject(QUAD, 1, &SimFrame::solid(720, 486, [128, luma, 128]));
    }

    assert!(channel.update());
    assert!(!channel.update());
    let gray = channel.get_frame(PixelLayout::Gray8).unwrap().unwrap();
    assert!(gray.data.iter().all(|&y| y == 200));
    assert_eq!(gray.sequence, 5);
    assert_eq!(channel.dropped_count(), 4);
    assert_eq!(channel.overflow_count(), 0);
}

#[test]
fn test_no_frame_drops_reports_overflow() {
    let (hw, ctx) = setup();
    let device = ctx.create_device(QUAD).unwrap();
    let channel = device
        .create_channel_with(
            0,
            ChannelConfig::new(small_format(), NO_FRAME_DROPS).with_queue_depth(3),
        )
        .unwrap();

    for luma in [40u8, 80, 120, 160, 200] {
        hw.inject(QUAD, 0, &SimFrame::solid(720, 486, [128, luma, 128]));
    }
    assert_eq!(channel.overflow_count(), 2);
    assert_eq!(channel.pending(), 3);
    assert_eq!(channel.frame_count(), 5);

    // Frames come out oldest first, one per update
    let mut seen = Vec::new();
    while channel.update() {
        let frame = channel.get_frame(PixelLayout::Gray8).unwrap().unwrap();
        seen.push(frame.data[0]);
    }
    assert_eq!(seen, vec![40, 80, 120]);
    assert_eq!(channel.dropped_count(), 0);
}

#[test]
fn test_invalid_queue_depth_rejected() {
    let (_hw, ctx) = setup();
    let device = ctx.create_device(QUAD).unwrap();
    let err = device
        .create_channel_with(0, ChannelConfig::new(small_format(), NO_FRAME_DROPS).with_queue_depth(1))
        .unwrap_err();
    assert!(matches!(err, CaptureError::Buffer(_)));
    // Nothing was left claimed
    assert_eq!(device.active_channels(), 0);
    assert!(device.create_channel(0, small_format()).is_ok());
}

#[test]
fn test_unsupported_layout_leaves_frame_intact() {
    let (hw, ctx) = setup();
    let device = ctx.create_device(MINI).unwrap();
    let channel = device.create_channel(0, small_format()).unwrap();
    hw.inject(MINI, 0, &SimFrame::color_bars(720, 486));
    channel.update();

    let err = channel.get_frame(PixelLayout::Nv12).unwrap_err();
    assert_eq!(err, CaptureError::UnsupportedFormat(PixelLayout::Nv12));

    let rgb = channel.get_frame(PixelLayout::Rgb24).unwrap().unwrap();
    assert_eq!(rgb.data.len(), channel.frame_size(PixelLayout::Rgb24));
    let bgra = channel.get_frame(PixelLayout::Bgra32).unwrap().unwrap();
    assert_eq!(bgra.data.len(), 720 * 486 * 4);
}

#[test]
fn test_get_frame_returns_independent_copies() {
    let (hw, ctx) = setup();
    let device = ctx.create_device(MINI).unwrap();
    let channel = device.create_channel(0, small_format()).unwrap();
    hw.inject(MINI, 0, &SimFrame::solid(720, 486, [128, 90, 128]));

    let mut first = channel.get_frame(PixelLayout::Uyvy).unwrap().unwrap();
    first.data.fill(0);
    let second = channel.get_frame(PixelLayout::Uyvy).unwrap().unwrap();
    assert_eq!(second.data[1], 90);
}

#[test]
fn test_parameter_change_applies_to_next_frame() {
    let (hw, ctx) = setup();
    let device = ctx.create_device(MINI).unwrap();
    let channel = device.create_channel(0, small_format()).unwrap();
    channel.set_signal_parameters(10, 5).unwrap();

    let good = SimFrame::color_bars(720, 486);
    for _ in 0..4 {
        hw.inject(MINI, 0, &good);
    }
    assert!(!channel.has_valid_signal());

    channel.set_signal_parameters(2, 5).unwrap();
    assert!(!channel.has_valid_signal());
    hw.inject(MINI, 0, &good);
    assert!(channel.has_valid_signal());

    assert!(matches!(
        channel.set_signal_parameters(0, 5),
        Err(CaptureError::InvalidSignalParameters { .. })
    ));
    assert_eq!(channel.signal_parameters(), SignalParameters::new(2, 5));
}

#[test]
fn test_faults_and_missing_buffers_are_bad_frames() {
    let (hw, ctx) = setup();
    let device = ctx.create_device(MINI).unwrap();
    let channel = device
        .create_channel_with(
            0,
            ChannelConfig::new(small_format(), LOW_LATENCY).with_signal(SignalParameters::new(1, 3)),
        )
        .unwrap();

    hw.inject(MINI, 0, &SimFrame::color_bars(720, 486));
    assert!(channel.has_valid_signal());

    hw.inject_fault(MINI, 0, HardwareFault::Transport("checksum".into()));
    hw.inject(MINI, 0, &SimFrame::color_bars(720, 486).without_bytes());
    assert!(channel.has_valid_signal());
    hw.inject_fault(MINI, 0, HardwareFault::BufferUnavailable);
    assert!(!channel.has_valid_signal());
    assert_eq!(channel.fault_count(), 2);
}

#[test]
fn test_panicking_inspector_counts_as_fault() {
    let (hw, ctx) = setup();
    let device = ctx.create_device(MINI).unwrap();

    let panicked = Arc::new(AtomicBool::new(false));
    let inspector = {
        let panicked = panicked.clone();
        move |_: &CapturedFrame| {
            if !panicked.swap(true, Ordering::SeqCst) {
                panic!("inspector failure");
            }
            true
        }
    };
    let channel = device
        .create_channel_with(
            0,
            ChannelConfig::new(small_format(), LOW_LATENCY).with_inspector(Arc::new(inspector)),
        )
        .unwrap();

    let frame = SimFrame::color_bars(720, 486);
    hw.inject(MINI, 0, &frame);
    assert!(panicked.load(Ordering::SeqCst));
    assert_eq!(channel.fault_count(), 1);
    assert_eq!(channel.frame_count(), 0);
    assert_eq!(channel.signal_state().consecutive_bad, 1);
    assert!(!channel.has_valid_signal());

    // The channel keeps accepting frames after the panic
    for _ in 0..3 {
        assert!(hw.inject(MINI, 0, &frame));
    }
    assert!(channel.has_valid_signal());
    assert_eq!(channel.frame_count(), 3);
    assert!(channel.update());
}

#[test]
fn test_polling_after_a_gap_keeps_lock() {
    let (hw, ctx) = setup();
    let device = ctx.create_device(MINI).unwrap();
    let channel = device.create_channel(0, small_format()).unwrap();

    for _ in 0..3 {
        hw.inject(MINI, 0, &SimFrame::color_bars(720, 486));
    }
    assert!(channel.has_valid_signal());

    // Several frame periods with no arrivals
    std::thread::sleep(Duration::from_millis(250));
    assert!(channel.update());
    assert!(channel.has_valid_signal());
    assert!(!channel.update());
    assert!(channel.has_valid_signal());
    assert_eq!(channel.signal_state().consecutive_bad, 0);
    assert_eq!(channel.status(), ChannelStatus::Locked);
}

#[test]
fn test_wrong_size_frames_never_lock() {
    let (hw, ctx) = setup();
    let device = ctx.create_device(MINI).unwrap();
    let channel = device.create_channel(0, fmt_1080p2997()).unwrap();
    for _ in 0..10 {
        hw.inject(MINI, 0, &SimFrame::color_bars(1280, 720));
    }
    assert!(!channel.has_valid_signal());
    assert_eq!(channel.frame_count(), 10);
}

#[test]
fn test_blank_detector_vetoes_black_frames() {
    let (hw, ctx) = setup();
    let device = ctx.create_device(MINI).unwrap();
    let channel = device
        .create_channel_with(
            0,
            ChannelConfig::new(small_format(), LOW_LATENCY)
                .with_inspector(Arc::new(capture_engine::BlankFrameDetector::default())),
        )
        .unwrap();

    for _ in 0..5 {
        hw.inject(MINI, 0, &SimFrame::black(720, 486));
    }
    assert!(!channel.has_valid_signal());
    for _ in 0..3 {
        hw.inject(MINI, 0, &SimFrame::color_bars(720, 486));
    }
    assert!(channel.has_valid_signal());
}

#[test]
fn test_stable_frame_rate() {
    let (hw, ctx) = setup();
    let device = ctx.create_device(MINI).unwrap();
    let channel = device.create_channel(0, small_format()).unwrap();
    let frame = SimFrame::color_bars(720, 486);

    for _ in 0..9 {
        hw.inject(MINI, 0, &frame);
    }
    assert!(!channel.has_stable_frame_rate());
    hw.inject(MINI, 0, &frame);
    assert!(channel.has_stable_frame_rate());
}

#[test]
fn test_close_waits_for_in_flight_callback() {
    let (hw, ctx) = setup();
    let device = ctx.create_device(MINI).unwrap();

    let entered = Arc::new(Barrier::new(2));
    let finished = Arc::new(AtomicBool::new(false));
    let inspector = {
        let entered = entered.clone();
        let finished = finished.clone();
        move |_: &CapturedFrame| {
            entered.wait();
            std::thread::sleep(Duration::from_millis(150));
            finished.store(true, Ordering::SeqCst);
            true
        }
    };
    let channel = device
        .create_channel_with(
            0,
            ChannelConfig::new(small_format(), LOW_LATENCY).with_inspector(Arc::new(inspector)),
        )
        .unwrap();

    let producer = {
        let hw = hw.clone();
        std::thread::spawn(move || hw.inject(MINI, 0, &SimFrame::color_bars(720, 486)))
    };

    entered.wait();
    channel.close();
    // close() only returns after the callback has left the channel
    assert!(finished.load(Ordering::SeqCst));
    assert!(producer.join().unwrap());

    assert_eq!(channel.status(), ChannelStatus::Closed);
    assert!(!channel.update());
    assert!(!channel.has_valid_signal());
    assert_eq!(channel.get_frame(PixelLayout::Rgb24), Err(CaptureError::ChannelClosed));

    // Late callbacks are ignored
    assert!(!hw.inject(MINI, 0, &SimFrame::color_bars(720, 486)));
    assert_eq!(channel.frame_count(), 1);
}

#[test]
fn test_close_is_idempotent() {
    let (_hw, ctx) = setup();
    let device = ctx.create_device(MINI).unwrap();
    let channel = device.create_channel(0, small_format()).unwrap();
    channel.close();
    channel.close();
    assert!(channel.is_closed());
    assert_eq!(device.active_channels(), 0);
}

#[test]
fn test_generated_stream_locks() {
    let hw = Arc::new(SimulatedHardware::generating(vec![SimDeviceSpec::mini_recorder()]));
    let ctx = CaptureContext::new(hw.clone());
    let session = CaptureSession::open(
        &ctx,
        &SessionConfig {
            width: 720,
            height: 576,
            frame_rate: 25.0,
            ..Default::default()
        },
    )
    .unwrap();

    let mut locked = false;
    for _ in 0..100 {
        if session.has_valid_signal() {
            locked = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(locked, "generator never produced a lock");
    assert!(session.update());
    session.close();
    assert!(!hw.is_streaming(0, 0));
}

//! Simulated capture hardware
//!
//! Behaves like a real backend: exclusive acquisition, per-port enable and
//! disable, callbacks from a thread the engine does not own. Frames are
//! either injected by the caller (delivered synchronously on the calling
//! thread) or produced by a generator thread at the mode's frame rate.

use crate::hardware::{
    DeviceInfo, FrameSink, HardwareError, HardwareFault, HardwareFrame, HardwareInterface,
    HardwareUnit, InputPort,
};
use crate::mode::DisplayMode;
use pixel_convert::PixelLayout;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 75% colour bars, (U, Y, V)
const BARS: [[u8; 3]; 8] = [
    [128, 180, 128],
    [44, 162, 142],
    [156, 131, 44],
    [72, 112, 58],
    [184, 84, 198],
    [100, 65, 212],
    [212, 35, 114],
    [128, 16, 128],
];

/// Description of a simulated device
#[derive(Debug, Clone)]
pub struct SimDeviceSpec {
    pub name: String,
    pub ports: Vec<String>,
    pub channel_capacity: usize,
    pub display_modes: Vec<DisplayMode>,
}

impl SimDeviceSpec {
    pub fn new(name: &str, ports: &[&str], channel_capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            ports: ports.iter().map(|p| p.to_string()).collect(),
            channel_capacity,
            display_modes: DisplayMode::standard_modes(),
        }
    }

    /// Single-input recorder with SDI and HDMI connectors
    pub fn mini_recorder() -> Self {
        Self::new("Sim Mini Recorder", &["SDI", "HDMI"], 1)
    }

    /// Four independent SDI inputs
    pub fn quad() -> Self {
        Self::new("Sim Quad SDI", &["SDI 1", "SDI 2", "SDI 3", "SDI 4"], 4)
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.name.clone(),
            ports: self
                .ports
                .iter()
                .enumerate()
                .map(|(index, name)| InputPort {
                    index,
                    name: name.clone(),
                })
                .collect(),
            channel_capacity: self.channel_capacity,
            display_modes: self.display_modes.clone(),
        }
    }
}

/// What the generator thread emits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SimSignal {
    /// Colour bars
    #[default]
    Present,
    /// Black frames flagged "no input source"
    NoInput,
    /// Black frames that look structurally fine
    Black,
}

/// A frame to inject
#[derive(Debug, Clone)]
pub struct SimFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub row_bytes: usize,
    pub layout: PixelLayout,
    pub timestamp_ns: u64,
    pub no_input_source: bool,
    /// Deliver the frame without a pixel buffer
    pub withhold_bytes: bool,
}

impl SimFrame {
    /// UYVY frame filled with one colour
    pub fn solid(width: u32, height: u32, [u, y, v]: [u8; 3]) -> Self {
        let row_bytes = width as usize * 2;
        let mut data = Vec::with_capacity(row_bytes * height as usize);
        for _ in 0..(width as usize / 2) * height as usize {
            data.extend_from_slice(&[u, y, v, y]);
        }
        Self::from_data(data, width, height, row_bytes)
    }

    /// UYVY vertical colour bars
    pub fn color_bars(width: u32, height: u32) -> Self {
        let row_bytes = width as usize * 2;
        let mut data = Vec::with_capacity(row_bytes * height as usize);
        for _ in 0..height {
            for x in 0..width / 2 {
                let [u, y, v] = BARS[(x as usize * 2 * BARS.len()) / width.max(1) as usize];
                data.extend_from_slice(&[u, y, v, y]);
            }
        }
        Self::from_data(data, width, height, row_bytes)
    }

    /// Black UYVY frame
    pub fn black(width: u32, height: u32) -> Self {
        Self::solid(width, height, [128, 16, 128])
    }

    fn from_data(data: Vec<u8>, width: u32, height: u32, row_bytes: usize) -> Self {
        Self {
            data,
            width,
            height,
            row_bytes,
            layout: PixelLayout::Uyvy,
            timestamp_ns: 0,
            no_input_source: false,
            withhold_bytes: false,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    pub fn without_input(mut self) -> Self {
        self.no_input_source = true;
        self
    }

    pub fn without_bytes(mut self) -> Self {
        self.withhold_bytes = true;
        self
    }

    fn as_hardware(&self) -> HardwareFrame<'_> {
        HardwareFrame {
            bytes: if self.withhold_bytes { None } else { Some(self.data.as_slice()) },
            width: self.width,
            height: self.height,
            row_bytes: self.row_bytes,
            layout: self.layout,
            timestamp_ns: self.timestamp_ns,
            no_input_source: self.no_input_source,
        }
    }
}

struct Generator {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct SimDeviceState {
    acquired: bool,
    sink: Option<Arc<dyn FrameSink>>,
    routed: Option<usize>,
    enabled: Vec<Option<DisplayMode>>,
    generators: Vec<Option<Generator>>,
    signal: SimSignal,
}

struct SimDevice {
    spec: SimDeviceSpec,
    state: Mutex<SimDeviceState>,
}

impl SimDevice {
    fn new(spec: SimDeviceSpec) -> Self {
        let ports = spec.ports.len();
        Self {
            spec,
            state: Mutex::new(SimDeviceState {
                acquired: false,
                sink: None,
                routed: None,
                enabled: vec![None; ports],
                generators: (0..ports).map(|_| None).collect(),
                signal: SimSignal::Present,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimDeviceState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Hand `frame` to the installed sink if `port` is streaming
    fn deliver(&self, port: usize, frame: Result<HardwareFrame<'_>, HardwareFault>) -> bool {
        let sink = {
            let state = self.lock();
            let streaming = state.enabled.get(port).is_some_and(|m| m.is_some());
            match (&state.sink, streaming) {
                (Some(sink), true) => sink.clone(),
                _ => return false,
            }
        };
        sink.frame_arrived(port, frame);
        true
    }

    fn stop_generator(&self, port: usize) {
        let generator = self.lock().generators.get_mut(port).and_then(Option::take);
        if let Some(generator) = generator {
            generator.stop.store(true, Ordering::SeqCst);
            if generator.handle.join().is_err() {
                warn!(device = %self.spec.name, port, "Frame generator panicked");
            }
        }
    }
}

/// In-process [`HardwareInterface`]
pub struct SimulatedHardware {
    devices: Vec<Arc<SimDevice>>,
    generate: bool,
    shutdowns: AtomicUsize,
}

impl SimulatedHardware {
    /// Devices that only produce injected frames
    pub fn new(devices: Vec<SimDeviceSpec>) -> Self {
        Self {
            devices: devices.into_iter().map(|d| Arc::new(SimDevice::new(d))).collect(),
            generate: false,
            shutdowns: AtomicUsize::new(0),
        }
    }

    /// Devices that also stream on their own once an input is enabled
    pub fn generating(devices: Vec<SimDeviceSpec>) -> Self {
        Self {
            generate: true,
            ..Self::new(devices)
        }
    }

    /// A mini recorder and a quad-input card
    pub fn default_devices() -> Vec<SimDeviceSpec> {
        vec![SimDeviceSpec::mini_recorder(), SimDeviceSpec::quad()]
    }

    /// Deliver `frame` on the calling thread; `false` if the port is not streaming
    pub fn inject(&self, device: usize, port: usize, frame: &SimFrame) -> bool {
        match self.devices.get(device) {
            Some(d) => d.deliver(port, Ok(frame.as_hardware())),
            None => false,
        }
    }

    /// Deliver a fault instead of a frame
    pub fn inject_fault(&self, device: usize, port: usize, fault: HardwareFault) -> bool {
        match self.devices.get(device) {
            Some(d) => d.deliver(port, Err(fault)),
            None => false,
        }
    }

    /// Change what generator threads emit
    pub fn set_signal(&self, device: usize, signal: SimSignal) {
        if let Some(d) = self.devices.get(device) {
            d.lock().signal = signal;
        }
    }

    pub fn is_acquired(&self, device: usize) -> bool {
        self.devices.get(device).is_some_and(|d| d.lock().acquired)
    }

    pub fn is_streaming(&self, device: usize, port: usize) -> bool {
        self.devices
            .get(device)
            .is_some_and(|d| d.lock().enabled.get(port).is_some_and(|m| m.is_some()))
    }

    /// Port the input selector points at
    pub fn routed_port(&self, device: usize) -> Option<usize> {
        self.devices.get(device).and_then(|d| d.lock().routed)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self::new(Self::default_devices())
    }
}

impl HardwareInterface for SimulatedHardware {
    fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn device_info(&self, index: usize) -> Option<DeviceInfo> {
        self.devices.get(index).map(|d| d.spec.info())
    }

    fn acquire(&self, index: usize) -> Result<Box<dyn HardwareUnit>, HardwareError> {
        let device = self.devices.get(index).ok_or(HardwareError::NoSuchDevice(index))?;
        {
            let mut state = device.lock();
            if state.acquired {
                return Err(HardwareError::AccessDenied);
            }
            state.acquired = true;
        }
        Ok(Box::new(SimUnit {
            device: device.clone(),
            generate: self.generate,
        }))
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        debug!("Simulated backend shut down");
    }
}

struct SimUnit {
    device: Arc<SimDevice>,
    generate: bool,
}

impl SimUnit {
    fn spawn_generator(&self, port: usize, mode: DisplayMode) -> Generator {
        let stop = Arc::new(AtomicBool::new(false));
        let device = self.device.clone();
        let flag = stop.clone();

        let period = Duration::from_nanos(mode.frame_period_ns().max(1_000_000));
        let bars = SimFrame::color_bars(mode.width, mode.height);
        let black = SimFrame::black(mode.width, mode.height);

        let handle = std::thread::spawn(move || {
            let started = Instant::now();
            let mut next = started;

            while !flag.load(Ordering::SeqCst) {
                let signal = device.lock().signal;
                let source = match signal {
                    SimSignal::Present => &bars,
                    SimSignal::Black | SimSignal::NoInput => &black,
                };
                let mut frame = source.as_hardware();
                frame.timestamp_ns = started.elapsed().as_nanos() as u64;
                frame.no_input_source = signal == SimSignal::NoInput;
                device.deliver(port, Ok(frame));

                next += period;
                let now = Instant::now();
                if next > now {
                    std::thread::sleep(next - now);
                } else {
                    next = now;
                }
            }
        });

        Generator { stop, handle }
    }
}

impl HardwareUnit for SimUnit {
    fn set_callback(&mut self, sink: Option<Arc<dyn FrameSink>>) {
        self.device.lock().sink = sink;
    }

    fn route_input(&mut self, port: usize) -> Result<(), HardwareError> {
        if port >= self.device.spec.ports.len() {
            return Err(HardwareError::NoSuchPort(port));
        }
        self.device.lock().routed = Some(port);
        Ok(())
    }

    fn enable_input(&mut self, port: usize, mode: &DisplayMode) -> Result<(), HardwareError> {
        if port >= self.device.spec.ports.len() {
            return Err(HardwareError::NoSuchPort(port));
        }
        if !self.device.spec.display_modes.contains(mode) {
            return Err(HardwareError::InvalidArgument(format!("mode {} not supported", mode.name)));
        }
        self.device.lock().enabled[port] = Some(mode.clone());

        if self.generate {
            let generator = self.spawn_generator(port, mode.clone());
            self.device.lock().generators[port] = Some(generator);
        }
        debug!(device = %self.device.spec.name, port, mode = %mode.name, "Input enabled");
        Ok(())
    }

    fn disable_input(&mut self, port: usize) {
        if let Some(slot) = self.device.lock().enabled.get_mut(port) {
            *slot = None;
        }
        self.device.stop_generator(port);
        debug!(device = %self.device.spec.name, port, "Input disabled");
    }
}

impl Drop for SimUnit {
    fn drop(&mut self) {
        for port in 0..self.device.spec.ports.len() {
            self.disable_input(port);
        }
        let mut state = self.device.lock();
        state.sink = None;
        state.routed = None;
        state.acquired = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[derive(Default)]
    struct CountingSink {
        frames: AtomicU64,
        faults: AtomicU64,
    }

    impl FrameSink for CountingSink {
        fn frame_arrived(&self, _port: usize, frame: Result<HardwareFrame<'_>, HardwareFault>) {
            match frame {
                Ok(_) => self.frames.fetch_add(1, Ordering::SeqCst),
                Err(_) => self.faults.fetch_add(1, Ordering::SeqCst),
            };
        }
    }

    fn mode_1080p30() -> DisplayMode {
        DisplayMode::standard_modes()
            .into_iter()
            .find(|m| m.name == "1080p30")
            .unwrap()
    }

    #[test]
    fn test_acquire_is_exclusive() {
        let hw = SimulatedHardware::default();
        let unit = hw.acquire(0).unwrap();
        assert!(matches!(hw.acquire(0), Err(HardwareError::AccessDenied)));
        assert!(hw.is_acquired(0));
        drop(unit);
        assert!(!hw.is_acquired(0));
        assert!(hw.acquire(0).is_ok());
        assert!(matches!(hw.acquire(9), Err(HardwareError::NoSuchDevice(9))));
    }

    #[test]
    fn test_inject_requires_enabled_port() {
        let hw = SimulatedHardware::default();
        let sink = Arc::new(CountingSink::default());
        let mut unit = hw.acquire(1).unwrap();
        unit.set_callback(Some(sink.clone() as Arc<dyn FrameSink>));

        let frame = SimFrame::color_bars(1920, 1080);
        assert!(!hw.inject(1, 2, &frame));

        unit.enable_input(2, &mode_1080p30()).unwrap();
        assert!(hw.inject(1, 2, &frame));
        assert!(hw.inject_fault(1, 2, HardwareFault::BufferUnavailable));
        assert!(!hw.inject(1, 3, &frame));

        unit.disable_input(2);
        assert!(!hw.inject(1, 2, &frame));
        assert_eq!(sink.frames.load(Ordering::SeqCst), 1);
        assert_eq!(sink.faults.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_enable_rejects_unknown_mode() {
        let hw = SimulatedHardware::default();
        let mut unit = hw.acquire(0).unwrap();
        let bogus = DisplayMode::new(99, "bogus", 100, 100, 1000, 7000);
        assert!(matches!(
            unit.enable_input(0, &bogus),
            Err(HardwareError::InvalidArgument(_))
        ));
        assert!(matches!(unit.route_input(5), Err(HardwareError::NoSuchPort(5))));
    }

    #[test]
    fn test_generator_streams_until_disabled() {
        let hw = SimulatedHardware::generating(vec![SimDeviceSpec::mini_recorder()]);
        let sink = Arc::new(CountingSink::default());
        let mut unit = hw.acquire(0).unwrap();
        unit.set_callback(Some(sink.clone() as Arc<dyn FrameSink>));
        unit.enable_input(0, &mode_1080p30()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.frames.load(Ordering::SeqCst) < 2 {
            assert!(Instant::now() < deadline, "generator delivered too few frames");
            std::thread::sleep(Duration::from_millis(5));
        }
        unit.disable_input(0);
        let seen = sink.frames.load(Ordering::SeqCst);

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(sink.frames.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_color_bars_geometry() {
        let frame = SimFrame::color_bars(16, 4);
        assert_eq!(frame.data.len(), 16 * 4 * 2);
        // First bar is white, last is black
        assert_eq!(frame.data[1], 180);
        assert_eq!(frame.data[16 * 2 - 1], 16);
    }
}

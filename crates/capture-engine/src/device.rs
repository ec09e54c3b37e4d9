//! Capture devices
//!
//! A [`CaptureDevice`] holds exclusive access to one hardware unit and
//! fans its callbacks out to the channels opened on it.

use crate::channel::{CaptureChannel, ChannelCore};
use crate::context::ContextInner;
use crate::hardware::{DeviceInfo, FrameSink, HardwareError, HardwareFault, HardwareFrame, HardwareUnit};
use crate::mode::negotiate;
use crate::{CaptureError, CaptureFormat, ChannelConfig};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, trace};

/// Routes hardware callbacks to the channel registered on each port
///
/// A callback holds the port's read lock for the whole delivery, so taking
/// the write lock to detach a channel waits out any delivery in flight.
pub(crate) struct Dispatcher {
    device_index: usize,
    routes: Vec<RwLock<Option<Arc<ChannelCore>>>>,
}

impl Dispatcher {
    fn new(device_index: usize, ports: usize) -> Self {
        Self {
            device_index,
            routes: (0..ports).map(|_| RwLock::new(None)).collect(),
        }
    }

    fn attach(&self, port: usize, core: Arc<ChannelCore>) {
        if let Some(route) = self.routes.get(port) {
            *route.write().unwrap_or_else(|p| p.into_inner()) = Some(core);
        }
    }

    /// Unregister `port`, blocking until its in-flight callback returns
    fn detach(&self, port: usize) -> Option<Arc<ChannelCore>> {
        let route = self.routes.get(port)?;
        let mut guard = route.write().unwrap_or_else(|p| p.into_inner());
        guard.take()
    }
}

impl FrameSink for Dispatcher {
    fn frame_arrived(&self, port: usize, frame: Result<HardwareFrame<'_>, HardwareFault>) {
        let Some(route) = self.routes.get(port) else {
            trace!(device = self.device_index, port, "Callback for unknown port");
            return;
        };
        let guard = route.read().unwrap_or_else(|p| p.into_inner());
        let Some(core) = guard.as_ref() else {
            return;
        };

        // A panic must not unwind into the hardware thread
        if catch_unwind(AssertUnwindSafe(|| core.on_frame(frame))).is_err() {
            error!(device = self.device_index, port, "Frame delivery panicked, counting as bad frame");
            let _ = catch_unwind(AssertUnwindSafe(|| core.record_fault()));
        }
    }
}

struct DeviceInner {
    /// `None` once the device is closed
    hardware: Option<Box<dyn HardwareUnit>>,
    /// Open channel per port
    claims: Vec<Option<Arc<ChannelCore>>>,
    selected_port: Option<usize>,
}

impl DeviceInner {
    fn active_channels(&self) -> usize {
        self.claims.iter().filter(|c| c.is_some()).count()
    }
}

pub(crate) struct DeviceShared {
    index: usize,
    info: DeviceInfo,
    dispatcher: Arc<Dispatcher>,
    inner: Mutex<DeviceInner>,
    context: Arc<ContextInner>,
}

impl DeviceShared {
    fn lock(&self) -> MutexGuard<'_, DeviceInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn channel_capacity(&self) -> usize {
        self.info.channel_capacity
    }

    /// Stop and unregister `core` if it still owns its port, then close it
    pub(crate) fn release_channel(&self, core: &Arc<ChannelCore>) {
        let port = core.port();
        {
            let mut inner = self.lock();
            let owned = inner
                .claims
                .get(port)
                .and_then(|c| c.as_ref())
                .is_some_and(|c| Arc::ptr_eq(c, core));
            if owned {
                if let Some(hardware) = inner.hardware.as_mut() {
                    hardware.disable_input(port);
                }
                self.dispatcher.detach(port);
                inner.claims[port] = None;
                debug!(device = self.index, port, "Port released");
            }
        }
        core.mark_closed();
    }

    fn close(&self) {
        let mut inner = self.lock();
        let Some(mut hardware) = inner.hardware.take() else {
            return;
        };

        let mut closed = Vec::new();
        for (port, claim) in inner.claims.iter_mut().enumerate() {
            if let Some(core) = claim.take() {
                hardware.disable_input(port);
                self.dispatcher.detach(port);
                closed.push(core);
            }
        }
        hardware.set_callback(None);
        drop(hardware);
        drop(inner);

        for core in &closed {
            core.mark_closed();
        }
        info!(device = self.index, name = %self.info.name, channels = closed.len(), "Device closed");
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        self.close();
        self.context.device_released();
    }
}

fn map_hardware_error(err: HardwareError, port: usize, format: &CaptureFormat) -> CaptureError {
    match err {
        HardwareError::AccessDenied => CaptureError::PortBusy { port },
        HardwareError::InvalidArgument(_) => CaptureError::FormatUnsupported(*format),
        other => CaptureError::StreamStart(other.to_string()),
    }
}

/// An open capture device
///
/// Dropping the handle closes the device and every channel opened on it.
pub struct CaptureDevice {
    shared: Arc<DeviceShared>,
}

impl CaptureDevice {
    pub(crate) fn open(
        context: Arc<ContextInner>,
        index: usize,
        info: DeviceInfo,
        mut hardware: Box<dyn HardwareUnit>,
    ) -> Self {
        let ports = info.ports.len();
        let dispatcher = Arc::new(Dispatcher::new(index, ports));
        let sink: Arc<dyn FrameSink> = dispatcher.clone();
        hardware.set_callback(Some(sink));

        info!(device = index, name = %info.name, ports, capacity = info.channel_capacity, "Device opened");
        context.device_acquired();

        Self {
            shared: Arc::new(DeviceShared {
                index,
                info,
                dispatcher,
                inner: Mutex::new(DeviceInner {
                    hardware: Some(hardware),
                    claims: vec![None; ports],
                    selected_port: None,
                }),
                context,
            }),
        }
    }

    pub fn index(&self) -> usize {
        self.shared.index
    }

    pub fn name(&self) -> &str {
        &self.shared.info.name
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.shared.info
    }

    /// Input port names in enumeration order
    pub fn list_ports(&self) -> Vec<String> {
        self.shared.info.port_names()
    }

    /// Channels that may stream at once
    pub fn channel_capacity(&self) -> usize {
        self.shared.info.channel_capacity
    }

    pub fn active_channels(&self) -> usize {
        self.shared.lock().active_channels()
    }

    pub fn selected_port(&self) -> Option<usize> {
        self.shared.lock().selected_port
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().hardware.is_some()
    }

    /// Route the device's input to `port`
    ///
    /// On single-channel devices this fails while a channel streams from a
    /// different port.
    pub fn select_port(&self, port: usize) -> Result<(), CaptureError> {
        let mut inner = self.shared.lock();
        let available = self.shared.info.ports.len();
        if port >= available {
            return Err(CaptureError::InvalidPort { port, available });
        }
        let conflicting = inner
            .claims
            .iter()
            .enumerate()
            .any(|(p, claim)| claim.is_some() && p != port);
        if conflicting && self.shared.info.channel_capacity <= 1 {
            return Err(CaptureError::PortBusy { port });
        }

        let hardware = inner.hardware.as_mut().ok_or(CaptureError::DeviceClosed)?;
        hardware
            .route_input(port)
            .map_err(|e| CaptureError::StreamStart(e.to_string()))?;
        inner.selected_port = Some(port);
        debug!(device = self.shared.index, port, "Input selected");
        Ok(())
    }

    /// Open a low-latency channel on `port`
    pub fn create_channel(&self, port: usize, format: CaptureFormat) -> Result<CaptureChannel, CaptureError> {
        self.create_channel_with(port, ChannelConfig::new(format, Default::default()))
    }

    /// Open a channel on `port` with full configuration
    pub fn create_channel_with(&self, port: usize, config: ChannelConfig) -> Result<CaptureChannel, CaptureError> {
        let shared = &self.shared;
        let mut inner = shared.lock();
        if inner.hardware.is_none() {
            return Err(CaptureError::DeviceClosed);
        }

        let available = shared.info.ports.len();
        if port >= available {
            return Err(CaptureError::InvalidPort { port, available });
        }
        if inner.claims[port].is_some() {
            return Err(CaptureError::PortBusy { port });
        }
        let capacity = shared.info.channel_capacity;
        if inner.active_channels() >= capacity {
            return Err(CaptureError::ResourceExhausted { capacity });
        }

        let format = config.format;
        let mode = negotiate(&shared.info.display_modes, &format)
            .cloned()
            .ok_or(CaptureError::FormatUnsupported(format))?;
        let core = Arc::new(ChannelCore::new(shared.index, port, mode.clone(), config)?);

        let Some(hardware) = inner.hardware.as_mut() else {
            return Err(CaptureError::DeviceClosed);
        };
        hardware
            .route_input(port)
            .map_err(|e| map_hardware_error(e, port, &format))?;

        // Register before enabling so the first callback finds its channel
        shared.dispatcher.attach(port, core.clone());
        if let Err(e) = hardware.enable_input(port, &mode) {
            shared.dispatcher.detach(port);
            error!(device = shared.index, port, error = %e, "Failed to enable input");
            return Err(map_hardware_error(e, port, &format));
        }
        core.mark_streaming();

        inner.claims[port] = Some(core.clone());
        inner.selected_port = Some(port);
        drop(inner);

        info!(device = shared.index, port, mode = %mode.name, "Channel opened");
        Ok(CaptureChannel::new(core, shared.clone()))
    }

    /// Stop every channel and release the hardware. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for CaptureDevice {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl std::fmt::Debug for CaptureDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureDevice")
            .field("index", &self.shared.index)
            .field("name", &self.shared.info.name)
            .finish()
    }
}

//! Library context
//!
//! Owns the hardware backend. Every [`CaptureContext`] clone and every open
//! device keeps the backend alive; it is shut down exactly once, when the
//! last of them goes away.

use crate::device::CaptureDevice;
use crate::hardware::{DeviceInfo, HardwareError, HardwareInterface};
use crate::CaptureError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub(crate) struct ContextInner {
    hardware: Arc<dyn HardwareInterface>,
    open_devices: AtomicUsize,
}

impl ContextInner {
    pub(crate) fn device_acquired(&self) {
        self.open_devices.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn device_released(&self) {
        self.open_devices.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.hardware.shutdown();
        info!("Capture backend shut down");
    }
}

/// Handle to the capture backend
#[derive(Clone)]
pub struct CaptureContext {
    inner: Arc<ContextInner>,
}

impl CaptureContext {
    /// Initialize the library over `hardware`
    pub fn new(hardware: Arc<dyn HardwareInterface>) -> Self {
        let devices = hardware.device_count();
        info!(devices, "Capture backend initialized");
        Self {
            inner: Arc::new(ContextInner {
                hardware,
                open_devices: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of devices attached
    pub fn device_count(&self) -> usize {
        self.inner.hardware.device_count()
    }

    /// Name of device `index`, `None` if out of range
    pub fn device_name(&self, index: usize) -> Option<String> {
        self.inner.hardware.device_info(index).map(|info| info.name)
    }

    /// `(index, name)` for every device
    pub fn devices(&self) -> Vec<(usize, String)> {
        (0..self.device_count())
            .filter_map(|index| self.device_name(index).map(|name| (index, name)))
            .collect()
    }

    pub fn device_info(&self, index: usize) -> Option<DeviceInfo> {
        self.inner.hardware.device_info(index)
    }

    /// Input port names of device `index`
    pub fn input_ports(&self, index: usize) -> Result<Vec<String>, CaptureError> {
        self.device_info(index)
            .map(|info| info.port_names())
            .ok_or_else(|| CaptureError::DeviceUnavailable {
                index,
                reason: "no such device".to_string(),
            })
    }

    /// Take exclusive access to device `index`
    pub fn create_device(&self, index: usize) -> Result<CaptureDevice, CaptureError> {
        let unavailable = |reason: &str| CaptureError::DeviceUnavailable {
            index,
            reason: reason.to_string(),
        };
        let info = self
            .inner
            .hardware
            .device_info(index)
            .ok_or_else(|| unavailable("no such device"))?;

        let unit = self.inner.hardware.acquire(index).map_err(|e| match e {
            HardwareError::AccessDenied => unavailable("already in use"),
            other => unavailable(&other.to_string()),
        })?;
        debug!(device = index, "Hardware acquired");

        Ok(CaptureDevice::open(self.inner.clone(), index, info, unit))
    }

    /// Devices currently open through this backend
    pub fn open_devices(&self) -> usize {
        self.inner.open_devices.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CaptureContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureContext")
            .field("open_devices", &self.open_devices())
            .finish()
    }
}

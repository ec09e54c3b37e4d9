//! FFI bindings for the vendor capture SDK
//!
//! The SDK itself is C++ and COM-style; a thin C shim (`libbmd_shim`)
//! flattens it into the functions below. Frames arrive on an SDK-owned
//! thread through [`frame_trampoline`], which never lets a panic cross back
//! into C.

use crate::hardware::{
    DeviceInfo, FrameSink, HardwareError, HardwareFault, HardwareFrame, HardwareInterface,
    HardwareUnit, VideoConnection,
};
use crate::mode::DisplayMode;
use libc::{c_char, c_void};
use pixel_convert::PixelLayout;
use std::ffi::CStr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Frame flag: the hardware reports no input source
const FRAME_FLAG_NO_INPUT: i32 = 1 << 0;

const NAME_LEN: usize = 128;

/// C frame structure (matches bmd_shim.h)
#[repr(C)]
pub struct CShimFrame {
    pub data: *const u8,
    pub size: usize,
    pub width: u32,
    pub height: u32,
    pub row_bytes: u32,
    pub timestamp_ns: i64,
    pub flags: i32,
}

/// C display mode structure
#[repr(C)]
pub struct CShimMode {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub frame_duration: i64,
    pub time_scale: i64,
    pub name: [c_char; 64],
}

/// Status codes from the shim
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShimStatus {
    Ok = 0,
    AccessDenied = -1,
    InvalidArgument = -2,
    OutOfMemory = -3,
    NoDevice = -4,
    Disconnected = -5,
    NoFrameBuffer = -6,
    Unknown = -99,
}

impl From<i32> for ShimStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            -1 => Self::AccessDenied,
            -2 => Self::InvalidArgument,
            -3 => Self::OutOfMemory,
            -4 => Self::NoDevice,
            -5 => Self::Disconnected,
            -6 => Self::NoFrameBuffer,
            _ => Self::Unknown,
        }
    }
}

fn check(code: i32, context: &str) -> Result<(), HardwareError> {
    match ShimStatus::from(code) {
        ShimStatus::Ok => Ok(()),
        ShimStatus::AccessDenied => Err(HardwareError::AccessDenied),
        ShimStatus::InvalidArgument => Err(HardwareError::InvalidArgument(context.to_string())),
        ShimStatus::OutOfMemory => Err(HardwareError::OutOfMemory),
        ShimStatus::Disconnected => Err(HardwareError::Disconnected),
        _ => Err(HardwareError::Sdk(code)),
    }
}

type FrameCallback = extern "C" fn(user: *mut c_void, port: i32, frame: *const CShimFrame, status: i32);

extern "C" {
    fn bmd_shim_init() -> i32;
    fn bmd_shim_shutdown();
    fn bmd_shim_device_count() -> i32;
    fn bmd_shim_device_name(index: i32, buf: *mut c_char, len: i32) -> i32;
    fn bmd_shim_input_connections(index: i32) -> i64;
    fn bmd_shim_channel_capacity(index: i32) -> i32;
    fn bmd_shim_display_mode_count(index: i32) -> i32;
    fn bmd_shim_display_mode(index: i32, mode_index: i32, out: *mut CShimMode) -> i32;
    fn bmd_shim_open(index: i32, status: *mut i32) -> *mut c_void;
    fn bmd_shim_close(device: *mut c_void);
    fn bmd_shim_set_callback(device: *mut c_void, callback: Option<FrameCallback>, user: *mut c_void) -> i32;
    fn bmd_shim_route_input(device: *mut c_void, port: i32) -> i32;
    fn bmd_shim_enable_input(device: *mut c_void, port: i32, mode_id: u32, pixel_format: i32) -> i32;
    fn bmd_shim_disable_input(device: *mut c_void, port: i32);
}

/// Pixel format code for 8-bit 4:2:2 in the shim
const SHIM_FORMAT_UYVY: i32 = 0;

/// Entry point for SDK callbacks
///
/// `user` is the `Arc<dyn FrameSink>` boxed by [`FfiUnit::set_callback`].
extern "C" fn frame_trampoline(user: *mut c_void, port: i32, frame: *const CShimFrame, status: i32) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        if user.is_null() || port < 0 {
            return;
        }
        // SAFETY: `user` points at the boxed sink, which outlives every
        // callback because the shim drains them before set_callback returns
        let sink = unsafe { &*(user as *const Arc<dyn FrameSink>) };
        let port = port as usize;

        if ShimStatus::from(status) != ShimStatus::Ok {
            let fault = match ShimStatus::from(status) {
                ShimStatus::NoFrameBuffer => HardwareFault::BufferUnavailable,
                other => HardwareFault::Transport(format!("{other:?}")),
            };
            sink.frame_arrived(port, Err(fault));
            return;
        }

        // SAFETY: the shim guarantees a valid frame for the callback's duration
        let Some(raw) = (unsafe { frame.as_ref() }) else {
            sink.frame_arrived(port, Err(HardwareFault::BufferUnavailable));
            return;
        };
        let bytes = if raw.data.is_null() || raw.size == 0 {
            None
        } else {
            // SAFETY: `data` is valid for `size` bytes until the callback returns
            Some(unsafe { std::slice::from_raw_parts(raw.data, raw.size) })
        };

        sink.frame_arrived(
            port,
            Ok(HardwareFrame {
                bytes,
                width: raw.width,
                height: raw.height,
                row_bytes: raw.row_bytes as usize,
                layout: PixelLayout::Uyvy,
                timestamp_ns: raw.timestamp_ns.max(0) as u64,
                no_input_source: raw.flags & FRAME_FLAG_NO_INPUT != 0,
            }),
        );
    }));

    if result.is_err() {
        error!(port, "Panic in frame callback suppressed");
    }
}

/// The vendor SDK as a [`HardwareInterface`]
pub struct FfiHardware {
    _private: (),
}

impl FfiHardware {
    /// Load and initialize the SDK
    pub fn new() -> Result<Self, HardwareError> {
        check(unsafe { bmd_shim_init() }, "init")?;
        info!(devices = unsafe { bmd_shim_device_count() }, "Capture SDK initialized");
        Ok(Self { _private: () })
    }

    fn device_name(index: i32) -> Option<String> {
        let mut buf = [0 as c_char; NAME_LEN];
        let code = unsafe { bmd_shim_device_name(index, buf.as_mut_ptr(), NAME_LEN as i32) };
        if code != 0 {
            return None;
        }
        // SAFETY: the shim always NUL-terminates within `len`
        let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Some(name.to_string_lossy().into_owned())
    }

    fn display_modes(index: i32) -> Vec<DisplayMode> {
        let count = unsafe { bmd_shim_display_mode_count(index) }.max(0);
        (0..count)
            .filter_map(|mode_index| {
                let mut raw = CShimMode {
                    id: 0,
                    width: 0,
                    height: 0,
                    frame_duration: 0,
                    time_scale: 0,
                    name: [0; 64],
                };
                if unsafe { bmd_shim_display_mode(index, mode_index, &mut raw) } != 0 {
                    return None;
                }
                let name = unsafe { CStr::from_ptr(raw.name.as_ptr()) }.to_string_lossy();
                Some(DisplayMode::new(
                    raw.id,
                    &name,
                    raw.width,
                    raw.height,
                    raw.frame_duration,
                    raw.time_scale,
                ))
            })
            .collect()
    }
}

impl HardwareInterface for FfiHardware {
    fn device_count(&self) -> usize {
        unsafe { bmd_shim_device_count() }.max(0) as usize
    }

    fn device_info(&self, index: usize) -> Option<DeviceInfo> {
        let idx = i32::try_from(index).ok()?;
        let name = Self::device_name(idx)?;
        let connections = unsafe { bmd_shim_input_connections(idx) };
        Some(DeviceInfo {
            name,
            ports: VideoConnection::ports_from_mask(connections.max(0) as u32),
            channel_capacity: unsafe { bmd_shim_channel_capacity(idx) }.max(1) as usize,
            display_modes: Self::display_modes(idx),
        })
    }

    fn acquire(&self, index: usize) -> Result<Box<dyn HardwareUnit>, HardwareError> {
        let idx = i32::try_from(index).map_err(|_| HardwareError::NoSuchDevice(index))?;
        let mut status = 0;
        let handle = unsafe { bmd_shim_open(idx, &mut status) };
        check(status, "open")?;
        let handle = NonNull::new(handle).ok_or(HardwareError::NoSuchDevice(index))?;
        debug!(device = index, "SDK device opened");
        Ok(Box::new(FfiUnit {
            handle,
            callback: None,
        }))
    }

    fn shutdown(&self) {
        unsafe { bmd_shim_shutdown() };
        info!("Capture SDK shut down");
    }
}

/// An opened SDK device
pub struct FfiUnit {
    handle: NonNull<c_void>,
    /// Keeps the sink alive while the shim holds a pointer to it
    callback: Option<Box<Arc<dyn FrameSink>>>,
}

// SAFETY: the shim serializes calls on a device handle internally
unsafe impl Send for FfiUnit {}

impl HardwareUnit for FfiUnit {
    fn set_callback(&mut self, sink: Option<Arc<dyn FrameSink>>) {
        let boxed = sink.map(Box::new);
        let (callback, user): (Option<FrameCallback>, *mut c_void) = match &boxed {
            Some(b) => (
                Some(frame_trampoline as FrameCallback),
                &**b as *const Arc<dyn FrameSink> as *mut c_void,
            ),
            None => (None, std::ptr::null_mut()),
        };
        let code = unsafe { bmd_shim_set_callback(self.handle.as_ptr(), callback, user) };
        if let Err(e) = check(code, "set_callback") {
            error!(error = %e, "Failed to install frame callback");
        }
        // The old sink is only freed once the shim has stopped using it
        self.callback = boxed;
    }

    fn route_input(&mut self, port: usize) -> Result<(), HardwareError> {
        let port = i32::try_from(port).map_err(|_| HardwareError::NoSuchPort(port))?;
        check(unsafe { bmd_shim_route_input(self.handle.as_ptr(), port) }, "route_input")
    }

    fn enable_input(&mut self, port: usize, mode: &DisplayMode) -> Result<(), HardwareError> {
        let port = i32::try_from(port).map_err(|_| HardwareError::NoSuchPort(port))?;
        check(
            unsafe { bmd_shim_enable_input(self.handle.as_ptr(), port, mode.id, SHIM_FORMAT_UYVY) },
            "enable_input",
        )
    }

    fn disable_input(&mut self, port: usize) {
        if let Ok(port) = i32::try_from(port) {
            unsafe { bmd_shim_disable_input(self.handle.as_ptr(), port) };
        }
    }
}

impl Drop for FfiUnit {
    fn drop(&mut self) {
        unsafe {
            bmd_shim_set_callback(self.handle.as_ptr(), None, std::ptr::null_mut());
            bmd_shim_close(self.handle.as_ptr());
        }
        self.callback = None;
    }
}

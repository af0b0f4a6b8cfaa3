//! GPU support: process-wide device handle, reference-counted programs and
//! the clearance range-fill delegate.
//!
//! The device handle is the only process-wide state in the crate. It is
//! initialised lazily on first use (or explicitly via
//! [`initialise_device`]) and reclaimed by the OS at process end. Absence
//! of a usable adapter is not an error; callers fall back to the CPU.

mod program;
mod range_fill;

pub use program::{GpuProgramRef, ProgramSource};
pub(crate) use range_fill::RangeFill;

use std::sync::Arc;
use std::sync::OnceLock;

use log::{debug, warn};

/// Handle to the active compute device.
#[derive(Debug)]
pub struct GpuDevice {
    /// Logical device
    pub device: wgpu::Device,
    /// Submission queue
    pub queue: wgpu::Queue,
}

static DEVICE: OnceLock<Option<Arc<GpuDevice>>> = OnceLock::new();

/// The process-wide compute device, `None` when no adapter is usable.
///
/// Initialised lazily on the first call; read-mostly afterwards.
pub fn gpu_device() -> Option<Arc<GpuDevice>> {
    DEVICE.get_or_init(request_device).clone()
}

/// Explicitly initialise the device handle.
///
/// Returns true when a device is available. Subsequent calls (and
/// [`gpu_device`]) observe the first outcome.
pub fn initialise_device() -> bool {
    gpu_device().is_some()
}

fn request_device() -> Option<Arc<GpuDevice>> {
    let instance = wgpu::Instance::default();
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::default(),
        force_fallback_adapter: false,
        compatible_surface: None,
    }))?;
    debug!("gpu adapter: {}", adapter.get_info().name);

    match pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("akash-map"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
        },
        None,
    )) {
        Ok((device, queue)) => Some(Arc::new(GpuDevice { device, queue })),
        Err(err) => {
            warn!("gpu device request failed: {}", err);
            None
        }
    }
}

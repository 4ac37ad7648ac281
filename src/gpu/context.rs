//! GPU context initialization.
//!
//! This module provides a thin wrapper around wgpu's instance, adapter,
//! device and queue objects, extended with the lane and bank bookkeeping
//! a banked run needs.  The `new_blocking` constructor hides the
//! asynchronous nature of requesting an adapter and device by using the
//! [`pollster`] crate.

use log::info;
use wgpu::{Adapter, Device, Instance, Queue};

use crate::device::BankTable;
use crate::error::{Error, Result};

/// A GPU context encapsulates all state needed to submit lane work.
///
/// GPUs expose no addressable memory banks, so bank ids are logical:
/// every lane buffer still claims its bank from the context's table,
/// which keeps the one-buffer-per-bank rule identical across contexts.
pub struct GpuContext {
    /// The global GPU instance.  In headless compute applications the
    /// instance is only needed to request an adapter.
    pub instance: Instance,
    /// The physical device selected for computation.
    pub adapter: Adapter,
    /// Logical device used to create resources and command encoders.
    pub device: Device,
    /// Command submission queue used to send recorded command buffers
    /// to the GPU.
    pub queue: Queue,
    pub(crate) name: String,
    pub(crate) lane_capacity: usize,
    pub(crate) banks: BankTable,
}

impl GpuContext {
    /// Create a new GPU context synchronously.
    ///
    /// Blocks the current thread while waiting for the adapter and
    /// device requests to finish.  See [`Self::new_async`].
    pub fn new_blocking(lane_capacity: usize, banks: usize) -> Result<Self> {
        pollster::block_on(Self::new_async(lane_capacity, banks))
    }

    /// Create a new GPU context asynchronously.
    ///
    /// Picks the default adapter, which must support compute shaders.
    /// Any failure to find one is reported as [`Error::NoDeviceFound`].
    pub async fn new_async(lane_capacity: usize, banks: usize) -> Result<Self> {
        if lane_capacity == 0 || banks == 0 {
            return Err(Error::NoDeviceFound(format!(
                "GPU context with {lane_capacity} lanes and {banks} banks"
            )));
        }
        let instance = Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .map_err(|e| Error::NoDeviceFound(format!("no suitable GPU adapter: {e}")))?;
        let capabilities = adapter.get_downlevel_capabilities();
        if !capabilities.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
            return Err(Error::NoDeviceFound(
                "selected adapter does not support compute shaders".into(),
            ));
        }
        // Ask for the adapter's own limits so that large lane blocks fit
        // into a single storage binding.
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("hbm_scale_device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| Error::NoDeviceFound(format!("failed to create GPU device: {e}")))?;

        let name = adapter.get_info().name;
        info!("acquired GPU context on {name} ({lane_capacity} lanes, {banks} banks)");
        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            name,
            lane_capacity,
            banks: BankTable::new(banks),
        })
    }

    /// Number of banks currently holding a buffer.
    pub fn banks_in_use(&self) -> usize {
        self.banks.occupied()
    }
}

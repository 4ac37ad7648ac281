//! Bank-resident GPU buffers and host readback.
//!
//! A [`GpuBuffer`] wraps the storage [`wgpu::Buffer`] a kernel binds to,
//! the element length, the bank it claimed and, for output buffers, a
//! host-mappable download buffer.  Readback is split in two halves so
//! that a barrier can sit between them: [`GpuBuffer::enqueue_download`]
//! records the copy and requests the mapping, and
//! [`GpuBuffer::read_mapped`] copies the mapped bytes out once the device
//! has been polled.

use std::sync::Arc;

use bytemuck::{cast_slice, Pod};
use parking_lot::Mutex;
use wgpu::{Buffer, BufferDescriptor, BufferUsages};

use crate::device::{Access, BankClaim, BankId};
use crate::error::DeviceError;

use super::GpuContext;

/// Outcome of a map request; `None` while still pending.
pub(crate) type MapState = Arc<Mutex<Option<Result<(), String>>>>;

/// A typed GPU buffer living in one (logical) bank.
pub struct GpuBuffer<T: Pod = f32> {
    pub buffer: Buffer,
    pub len: usize,
    pub access: Access,
    download: Option<Buffer>,
    mapped: MapState,
    claim: BankClaim,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Pod> GpuBuffer<T> {
    /// Create a storage buffer of `len` elements.
    ///
    /// Read-only buffers are upload targets (`COPY_DST`); write-only
    /// buffers are copy sources and get a `MAP_READ` download buffer of
    /// the same size.
    pub fn new(
        context: &GpuContext,
        access: Access,
        claim: BankClaim,
        len: usize,
    ) -> Result<Self, DeviceError> {
        let size = (len * std::mem::size_of::<T>()) as u64;
        let limits = context.device.limits();
        let limit = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        if size > limit {
            return Err(DeviceError::BufferTooLarge { bytes: size, limit });
        }
        let bank = claim.bank();
        let (usage, label) = match access {
            Access::ReadOnly => (BufferUsages::STORAGE | BufferUsages::COPY_DST, "in"),
            Access::WriteOnly => (BufferUsages::STORAGE | BufferUsages::COPY_SRC, "out"),
        };
        let buffer = context.device.create_buffer(&BufferDescriptor {
            label: Some(&format!("bank{bank}_{label}")),
            size,
            usage,
            mapped_at_creation: false,
        });
        let download = (access == Access::WriteOnly).then(|| {
            context.device.create_buffer(&BufferDescriptor {
                label: Some(&format!("bank{bank}_download")),
                size,
                usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
                mapped_at_creation: false,
            })
        });
        Ok(Self {
            buffer,
            len,
            access,
            download,
            mapped: Arc::new(Mutex::new(None)),
            claim,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn bank(&self) -> BankId {
        self.claim.bank()
    }

    pub fn byte_len(&self) -> u64 {
        (self.len * std::mem::size_of::<T>()) as u64
    }

    /// Queue a write of `data` into the buffer.  The write is ordered
    /// before any later submission on the same queue.
    pub fn write(&self, context: &GpuContext, data: &[T]) -> Result<(), DeviceError> {
        if self.access != Access::ReadOnly {
            return Err(DeviceError::AccessMismatch {
                bank: self.bank(),
                access: self.access,
                expected: Access::ReadOnly,
            });
        }
        if data.len() != self.len {
            return Err(DeviceError::LengthMismatch {
                host: data.len(),
                device: self.len,
            });
        }
        if !data.is_empty() {
            context.queue.write_buffer(&self.buffer, 0, cast_slice(data));
        }
        Ok(())
    }

    /// Copy the buffer into its download buffer and request a mapping.
    ///
    /// The returned state is filled in by wgpu once the device is polled.
    pub(crate) fn enqueue_download(&self, context: &GpuContext) -> Result<MapState, DeviceError> {
        let download = self.download.as_ref().ok_or(DeviceError::AccessMismatch {
            bank: self.bank(),
            access: self.access,
            expected: Access::WriteOnly,
        })?;
        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("download_encoder"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, download, 0, self.byte_len());
        context.queue.submit([encoder.finish()]);

        *self.mapped.lock() = None;
        let state = Arc::clone(&self.mapped);
        download.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            *state.lock() = Some(result.map_err(|e| e.to_string()));
        });
        Ok(Arc::clone(&self.mapped))
    }

    /// Copy the mapped download buffer into `host` and unmap it.
    pub fn read_mapped(&self, host: &mut [T]) -> Result<(), DeviceError> {
        if host.len() != self.len {
            return Err(DeviceError::LengthMismatch {
                host: host.len(),
                device: self.len,
            });
        }
        let download = match (&self.download, self.mapped.lock().take()) {
            (Some(download), Some(Ok(()))) => download,
            (_, Some(Err(e))) => return Err(DeviceError::Map(e)),
            _ => return Err(DeviceError::NotRetrieved(self.bank())),
        };
        {
            let data = download.slice(..).get_mapped_range();
            host.copy_from_slice(cast_slice::<u8, T>(&data));
        }
        download.unmap();
        Ok(())
    }
}

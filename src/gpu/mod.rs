//! wgpu-backed execution context.
//!
//! Each lane becomes a pair of storage buffers, a uniform with the
//! kernel arguments and one compute dispatch per execution.  Fences are
//! either submission indices or pending buffer mappings; a barrier polls
//! the device until the queue is idle and then checks every mapping.

pub mod buffer;
pub mod compute;
pub mod context;

use log::debug;

pub use buffer::GpuBuffer;
pub use compute::{GpuKernel, GpuProgram};
pub use context::GpuContext;

use crate::device::{Access, BankId, Device, KernelArgs, ProgramImage};
use crate::error::{DeviceError, Error, FenceError, Result};
use crate::kernel::{self, ENTRY_POINT, SCALE_SHADER};

/// Completion handle of an enqueued GPU operation.
pub enum GpuFence {
    Submitted(wgpu::SubmissionIndex),
    Mapping {
        bank: BankId,
        state: buffer::MapState,
    },
}

impl Device for GpuContext {
    type Program = GpuProgram;
    type Buffer = GpuBuffer;
    type Kernel = GpuKernel;
    type Fence = GpuFence;

    fn name(&self) -> &str {
        &self.name
    }

    fn lane_capacity(&self) -> usize {
        self.lane_capacity
    }

    fn bank_count(&self) -> usize {
        self.banks.len()
    }

    fn load_program(&self, image: &ProgramImage) -> Result<GpuProgram> {
        let path = image.path().cloned();
        let source = match &path {
            None => SCALE_SHADER.to_string(),
            Some(path) => std::fs::read_to_string(path).map_err(|e| Error::ProgramLoadFailed {
                path: Some(path.clone()),
                reason: e.to_string(),
            })?,
        };
        GpuProgram::compile(self, &source, path.clone())
            .map_err(|reason| Error::ProgramLoadFailed { path, reason })
    }

    fn allocate_buffer(
        &self,
        access: Access,
        bank: BankId,
        len: usize,
    ) -> Result<GpuBuffer, DeviceError> {
        let claim = self.banks.claim(bank)?;
        GpuBuffer::new(self, access, claim, len)
    }

    fn bind_kernel(
        &self,
        program: &GpuProgram,
        entry: &str,
        input: &GpuBuffer,
        output: &GpuBuffer,
        args: KernelArgs,
    ) -> Result<GpuKernel, DeviceError> {
        let (kernel_name, _) = kernel::parse_entry(entry);
        if kernel_name != ENTRY_POINT {
            return Err(DeviceError::KernelNotFound(entry.to_string()));
        }
        for (buffer, expected) in [(input, Access::ReadOnly), (output, Access::WriteOnly)] {
            if buffer.access != expected {
                return Err(DeviceError::AccessMismatch {
                    bank: buffer.bank(),
                    access: buffer.access,
                    expected,
                });
            }
        }
        let available = input.len.min(output.len);
        if args.element_count > available {
            return Err(DeviceError::KernelOutOfBounds {
                requested: args.element_count,
                available,
            });
        }
        let kernel = program.bind(self, entry, input, output, args)?;
        debug!(
            "kernel {entry} ready with element_count={}, scale={}, grid={:?}",
            args.element_count, args.scale, kernel.groups
        );
        Ok(kernel)
    }

    fn enqueue_to_device(&self, buffer: &GpuBuffer, host: &[f32]) -> Result<GpuFence, DeviceError> {
        buffer.write(self, host)?;
        // An empty submission flushes the staged write.
        Ok(GpuFence::Submitted(self.queue.submit(std::iter::empty())))
    }

    fn enqueue_execute(&self, kernel: &GpuKernel) -> Result<GpuFence, DeviceError> {
        Ok(GpuFence::Submitted(kernel.submit(self)))
    }

    fn enqueue_to_host(&self, buffer: &GpuBuffer) -> Result<GpuFence, DeviceError> {
        let state = buffer.enqueue_download(self)?;
        Ok(GpuFence::Mapping {
            bank: buffer.bank(),
            state,
        })
    }

    fn read_back(&self, buffer: &GpuBuffer, host: &mut [f32]) -> Result<(), DeviceError> {
        buffer.read_mapped(host)
    }

    fn barrier(&self, fences: Vec<GpuFence>) -> Result<(), FenceError> {
        if fences.is_empty() {
            return Ok(());
        }
        // Submissions retire in order, so when only executions and
        // uploads are pending the last one covers them all.  Mappings
        // need a full wait to run their callbacks.
        let only_submissions = fences.iter().all(|f| matches!(f, GpuFence::Submitted(_)));
        let poll = match fences.last() {
            Some(GpuFence::Submitted(index)) if only_submissions => {
                wgpu::PollType::WaitForSubmissionIndex(index.clone())
            }
            _ => wgpu::PollType::Wait,
        };
        self.device
            .poll(poll)
            .map_err(|e| FenceError::Context(DeviceError::Poll(e.to_string())))?;
        for (index, fence) in fences.into_iter().enumerate() {
            if let GpuFence::Mapping { bank, state } = fence {
                let source = match &*state.lock() {
                    Some(Ok(())) => continue,
                    Some(Err(e)) => DeviceError::Map(e.clone()),
                    None => DeviceError::NotRetrieved(bank),
                };
                return Err(FenceError::Fence { index, source });
            }
        }
        Ok(())
    }
}

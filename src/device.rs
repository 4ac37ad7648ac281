//! The execution-context boundary.
//!
//! The orchestrator never talks to hardware directly.  Everything it
//! needs from an execution context is captured by the [`Device`] trait:
//! loading a program, allocating bank-resident buffers, binding kernel
//! instances, enqueueing transfers and executions, and waiting for a set
//! of outstanding operations at a barrier.  Two contexts ship with the
//! crate: [`crate::host::HostDevice`], which runs every lane on its own
//! thread, and [`crate::gpu::GpuContext`], which runs lanes as wgpu
//! compute dispatches.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{DeviceError, FenceError, Result};

/// Index of a memory bank.
pub type BankId = usize;

/// How a kernel accesses a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
}

/// Where a program comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProgramImage {
    /// The scale kernel compiled into the crate.
    #[default]
    Builtin,
    /// A program image on disk.
    File(PathBuf),
}

impl ProgramImage {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ProgramImage::Builtin => None,
            ProgramImage::File(path) => Some(path),
        }
    }
}

impl From<Option<PathBuf>> for ProgramImage {
    fn from(path: Option<PathBuf>) -> Self {
        path.map_or(ProgramImage::Builtin, ProgramImage::File)
    }
}

/// Scalar arguments of one kernel instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelArgs {
    /// Number of leading elements the kernel processes.
    pub element_count: usize,
    pub scale: f32,
}

/// An execution context capable of running parallel lanes.
///
/// Enqueue operations return immediately with a fence; the work they
/// describe may complete in any order.  [`Device::barrier`] blocks until
/// every fence it is given has completed.
pub trait Device {
    type Program;
    type Buffer;
    type Kernel;
    type Fence;

    /// Human-readable name of the context.
    fn name(&self) -> &str;

    /// Maximum number of lanes that can run concurrently.
    fn lane_capacity(&self) -> usize;

    /// Number of memory banks buffers can be placed in.
    fn bank_count(&self) -> usize;

    fn load_program(&self, image: &ProgramImage) -> Result<Self::Program>;

    /// Allocate a buffer of `len` elements in `bank`.
    ///
    /// A bank holds at most one buffer at a time; it is released when the
    /// buffer is dropped.
    fn allocate_buffer(
        &self,
        access: Access,
        bank: BankId,
        len: usize,
    ) -> Result<Self::Buffer, DeviceError>;

    /// Instantiate the kernel `entry` of `program` over a buffer pair.
    fn bind_kernel(
        &self,
        program: &Self::Program,
        entry: &str,
        input: &Self::Buffer,
        output: &Self::Buffer,
        args: KernelArgs,
    ) -> Result<Self::Kernel, DeviceError>;

    /// Start copying `host` into `buffer`.
    fn enqueue_to_device(
        &self,
        buffer: &Self::Buffer,
        host: &[f32],
    ) -> Result<Self::Fence, DeviceError>;

    /// Start one execution of `kernel`.
    fn enqueue_execute(&self, kernel: &Self::Kernel) -> Result<Self::Fence, DeviceError>;

    /// Start copying `buffer` back to host-visible memory.
    fn enqueue_to_host(&self, buffer: &Self::Buffer) -> Result<Self::Fence, DeviceError>;

    /// Copy a buffer whose device-to-host transfer has completed into `host`.
    fn read_back(&self, buffer: &Self::Buffer, host: &mut [f32]) -> Result<(), DeviceError>;

    /// Block until every fence has completed.
    ///
    /// All fences are waited on even if one of them fails; the first
    /// failure, by position in `fences`, is reported.  A failure of the
    /// context itself, which no single fence caused, is reported as
    /// [`FenceError::Context`].
    fn barrier(&self, fences: Vec<Self::Fence>) -> Result<(), FenceError>;
}

/// Tracks which banks of a context are occupied.
#[derive(Debug, Clone)]
pub struct BankTable {
    in_use: Arc<Mutex<Vec<bool>>>,
}

impl BankTable {
    pub fn new(banks: usize) -> Self {
        Self {
            in_use: Arc::new(Mutex::new(vec![false; banks])),
        }
    }

    pub fn len(&self) -> usize {
        self.in_use.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of banks currently held.
    pub fn occupied(&self) -> usize {
        self.in_use.lock().iter().filter(|used| **used).count()
    }

    /// Take exclusive ownership of `bank` until the claim is dropped.
    pub fn claim(&self, bank: BankId) -> Result<BankClaim, DeviceError> {
        let mut in_use = self.in_use.lock();
        let banks = in_use.len();
        let slot = in_use
            .get_mut(bank)
            .ok_or(DeviceError::BankOutOfRange { bank, banks })?;
        if *slot {
            return Err(DeviceError::BankInUse(bank));
        }
        *slot = true;
        Ok(BankClaim {
            bank,
            table: Arc::clone(&self.in_use),
        })
    }
}

/// Exclusive hold on one bank.
#[derive(Debug)]
pub struct BankClaim {
    bank: BankId,
    table: Arc<Mutex<Vec<bool>>>,
}

impl BankClaim {
    pub fn bank(&self) -> BankId {
        self.bank
    }
}

impl Drop for BankClaim {
    fn drop(&mut self) {
        if let Some(slot) = self.table.lock().get_mut(self.bank) {
            *slot = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banks_are_exclusive_until_released() {
        let table = BankTable::new(4);
        let claim = table.claim(2).unwrap();
        assert_eq!(claim.bank(), 2);
        assert!(matches!(table.claim(2), Err(DeviceError::BankInUse(2))));
        assert_eq!(table.occupied(), 1);
        drop(claim);
        assert_eq!(table.occupied(), 0);
        assert!(table.claim(2).is_ok());
    }

    #[test]
    fn out_of_range_bank() {
        let table = BankTable::new(2);
        assert!(matches!(
            table.claim(2),
            Err(DeviceError::BankOutOfRange { bank: 2, banks: 2 })
        ));
    }

    #[test]
    fn program_image_from_path() {
        assert_eq!(ProgramImage::from(None), ProgramImage::Builtin);
        let image = ProgramImage::from(Some(PathBuf::from("scal.xclbin")));
        assert_eq!(image.path(), Some(&PathBuf::from("scal.xclbin")));
    }
}

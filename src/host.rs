//! A banked execution context backed by host threads.
//!
//! [`HostDevice`] models a device with a fixed number of memory banks and
//! a fixed number of compute units.  Each buffer lives in its own bank,
//! each kernel execution runs on a dedicated OS thread, and transfers are
//! plain copies that complete before their fence is returned.  Faults can
//! be injected per bank to exercise the failure paths of a run.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info};
use parking_lot::{Mutex, RwLock};

use crate::device::{Access, BankClaim, BankId, BankTable, Device, KernelArgs, ProgramImage};
use crate::error::{DeviceError, Error, FenceError, Result};
use crate::kernel::{self, ENTRY_POINT};

/// Default number of compute units.
pub const DEFAULT_LANE_CAPACITY: usize = 16;
/// Default number of memory banks (two per compute unit).
pub const DEFAULT_BANKS: usize = 32;

/// An operation that fails when it touches a given bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Allocation of a buffer in the bank.
    Allocate(BankId),
    /// Any transfer to or from the bank.
    Transfer(BankId),
    /// Execution of a kernel whose input lives in the bank.
    Execute(BankId),
}

/// Host-thread execution context.
#[derive(Debug)]
pub struct HostDevice {
    name: String,
    lane_capacity: usize,
    banks: BankTable,
    faults: Vec<Fault>,
}

/// Builder for [`HostDevice`].
#[derive(Debug, Clone)]
pub struct HostDeviceBuilder {
    lane_capacity: usize,
    banks: usize,
    faults: Vec<Fault>,
}

impl Default for HostDeviceBuilder {
    fn default() -> Self {
        Self {
            lane_capacity: DEFAULT_LANE_CAPACITY,
            banks: DEFAULT_BANKS,
            faults: Vec::new(),
        }
    }
}

impl HostDeviceBuilder {
    pub fn lane_capacity(mut self, lanes: usize) -> Self {
        self.lane_capacity = lanes;
        self
    }

    pub fn banks(mut self, banks: usize) -> Self {
        self.banks = banks;
        self
    }

    pub fn fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Acquire the context.  A context without compute units or banks
    /// cannot run anything and is reported as missing.
    pub fn build(self) -> Result<HostDevice> {
        if self.lane_capacity == 0 || self.banks == 0 {
            return Err(Error::NoDeviceFound(format!(
                "host context with {} compute units and {} banks",
                self.lane_capacity, self.banks
            )));
        }
        let name = format!("host ({} units, {} banks)", self.lane_capacity, self.banks);
        info!("acquired {name}");
        Ok(HostDevice {
            name,
            lane_capacity: self.lane_capacity,
            banks: BankTable::new(self.banks),
            faults: self.faults,
        })
    }
}

impl HostDevice {
    pub fn builder() -> HostDeviceBuilder {
        HostDeviceBuilder::default()
    }

    /// A context with `lane_capacity` units and two banks per unit.
    pub fn new(lane_capacity: usize) -> Result<Self> {
        Self::builder()
            .lane_capacity(lane_capacity)
            .banks(lane_capacity * 2)
            .build()
    }

    /// Number of banks currently holding a buffer.
    pub fn banks_in_use(&self) -> usize {
        self.banks.occupied()
    }

    fn check_fault(&self, fault: Fault) -> Result<(), DeviceError> {
        if self.faults.contains(&fault) {
            let bank = match fault {
                Fault::Allocate(bank) | Fault::Transfer(bank) | Fault::Execute(bank) => bank,
            };
            return Err(DeviceError::Injected(bank));
        }
        Ok(())
    }
}

/// A loaded program: the built-in scale kernel with one compute unit per
/// lane of the context.
#[derive(Debug, Clone)]
pub struct HostProgram {
    image: ProgramImage,
    compute_units: usize,
}

impl HostProgram {
    pub fn image(&self) -> &ProgramImage {
        &self.image
    }
}

/// A bank-resident buffer.
#[derive(Debug)]
pub struct HostBank {
    claim: BankClaim,
    access: Access,
    data: Arc<RwLock<Vec<f32>>>,
    retrieved: Mutex<bool>,
}

impl HostBank {
    pub fn bank(&self) -> BankId {
        self.claim.bank()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A kernel instance bound to a buffer pair.
#[derive(Debug)]
pub struct HostKernel {
    name: String,
    bank: BankId,
    input: Arc<RwLock<Vec<f32>>>,
    output: Arc<RwLock<Vec<f32>>>,
    args: KernelArgs,
}

/// Completion handle of an enqueued host operation.
#[derive(Debug)]
pub enum HostFence {
    Ready(Result<(), DeviceError>),
    Worker(JoinHandle<Result<(), DeviceError>>),
}

impl HostFence {
    fn wait(self) -> Result<(), DeviceError> {
        match self {
            HostFence::Ready(result) => result,
            HostFence::Worker(handle) => handle.join().map_err(|_| DeviceError::WorkerPanicked)?,
        }
    }
}

impl Device for HostDevice {
    type Program = HostProgram;
    type Buffer = HostBank;
    type Kernel = HostKernel;
    type Fence = HostFence;

    fn name(&self) -> &str {
        &self.name
    }

    fn lane_capacity(&self) -> usize {
        self.lane_capacity
    }

    fn bank_count(&self) -> usize {
        self.banks.len()
    }

    fn load_program(&self, image: &ProgramImage) -> Result<HostProgram> {
        if let ProgramImage::File(path) = image {
            let bytes = std::fs::read(path).map_err(|e| Error::ProgramLoadFailed {
                path: Some(path.clone()),
                reason: e.to_string(),
            })?;
            if bytes.is_empty() {
                return Err(Error::ProgramLoadFailed {
                    path: Some(path.clone()),
                    reason: "image is empty".into(),
                });
            }
            info!(
                "loaded {} byte image {}; host units run the built-in kernel",
                bytes.len(),
                path.display()
            );
        }
        Ok(HostProgram {
            image: image.clone(),
            compute_units: self.lane_capacity,
        })
    }

    fn allocate_buffer(
        &self,
        access: Access,
        bank: BankId,
        len: usize,
    ) -> Result<HostBank, DeviceError> {
        self.check_fault(Fault::Allocate(bank))?;
        let claim = self.banks.claim(bank)?;
        Ok(HostBank {
            claim,
            access,
            data: Arc::new(RwLock::new(vec![0.0; len])),
            retrieved: Mutex::new(false),
        })
    }

    fn bind_kernel(
        &self,
        program: &HostProgram,
        entry: &str,
        input: &HostBank,
        output: &HostBank,
        args: KernelArgs,
    ) -> Result<HostKernel, DeviceError> {
        let (kernel_name, unit) = kernel::parse_entry(entry);
        if kernel_name != ENTRY_POINT {
            return Err(DeviceError::KernelNotFound(entry.to_string()));
        }
        if let Some(unit) = unit {
            let index = unit
                .strip_prefix(ENTRY_POINT)
                .and_then(|n| n.strip_prefix('_'))
                .and_then(|n| n.parse::<usize>().ok());
            match index {
                Some(n) if (1..=program.compute_units).contains(&n) => {}
                _ => return Err(DeviceError::KernelNotFound(entry.to_string())),
            }
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
        let available = input.len().min(output.len());
        if args.element_count > available {
            return Err(DeviceError::KernelOutOfBounds {
                requested: args.element_count,
                available,
            });
        }
        debug!(
            "kernel {entry} ready with element_count={}, scale={}",
            args.element_count, args.scale
        );
        Ok(HostKernel {
            name: entry.to_string(),
            bank: input.bank(),
            input: Arc::clone(&input.data),
            output: Arc::clone(&output.data),
            args,
        })
    }

    fn enqueue_to_device(&self, buffer: &HostBank, host: &[f32]) -> Result<HostFence, DeviceError> {
        let result = self.check_fault(Fault::Transfer(buffer.bank())).and_then(|()| {
            let mut data = buffer.data.write();
            if data.len() != host.len() {
                return Err(DeviceError::LengthMismatch {
                    host: host.len(),
                    device: data.len(),
                });
            }
            data.copy_from_slice(host);
            Ok(())
        });
        Ok(HostFence::Ready(result))
    }

    fn enqueue_execute(&self, kernel: &HostKernel) -> Result<HostFence, DeviceError> {
        let fault = self.check_fault(Fault::Execute(kernel.bank));
        let input = Arc::clone(&kernel.input);
        let output = Arc::clone(&kernel.output);
        let KernelArgs { element_count, scale } = kernel.args;
        let handle = thread::Builder::new()
            .name(kernel.name.clone())
            .spawn(move || -> Result<(), DeviceError> {
                fault?;
                let input = input.read();
                let mut output = output.write();
                kernel::scale_block(&input, &mut output, element_count, scale);
                Ok(())
            })?;
        Ok(HostFence::Worker(handle))
    }

    fn enqueue_to_host(&self, buffer: &HostBank) -> Result<HostFence, DeviceError> {
        let result = self.check_fault(Fault::Transfer(buffer.bank()));
        if result.is_ok() {
            *buffer.retrieved.lock() = true;
        }
        Ok(HostFence::Ready(result))
    }

    fn read_back(&self, buffer: &HostBank, host: &mut [f32]) -> Result<(), DeviceError> {
        let mut retrieved = buffer.retrieved.lock();
        if !*retrieved {
            return Err(DeviceError::NotRetrieved(buffer.bank()));
        }
        let data = buffer.data.read();
        if data.len() != host.len() {
            return Err(DeviceError::LengthMismatch {
                host: host.len(),
                device: data.len(),
            });
        }
        host.copy_from_slice(&data);
        *retrieved = false;
        Ok(())
    }

    fn barrier(&self, fences: Vec<HostFence>) -> Result<(), FenceError> {
        let mut first = None;
        for (index, fence) in fences.into_iter().enumerate() {
            if let Err(source) = fence.wait() {
                first.get_or_insert(FenceError::Fence { index, source });
            }
        }
        first.map_or(Ok(()), Err)
    }
}

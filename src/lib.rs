//! Memory bandwidth benchmark for a banked elementwise scale kernel.
//!
//! The benchmark computes `out[i] = scale * in[i]` over one large buffer,
//! either on a single lane or fanned out across many lanes that each own
//! a pair of memory banks, and reports the throughput of the compute
//! phase alone.  The pieces fit together as follows:
//!
//! * [`partition`] splits the buffer into chunk-aligned blocks, one per
//!   lane;
//! * [`lane`] binds every block to an input/output bank pair and a kernel
//!   instance;
//! * [`orchestrator`] stages inputs, launches every lane, waits for all
//!   of them and drains the outputs, timing only the launch-to-completion
//!   interval;
//! * [`verify`] checks the result against a sequential recomputation.
//!
//! Lanes run on an execution context implementing [`Device`]: the
//! thread-backed [`HostDevice`] or the wgpu-backed [`GpuContext`].  The
//! API is synchronous and blocking.

pub mod bench;
pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod gpu;
pub mod host;
pub mod kernel;
pub mod lane;
pub mod orchestrator;
pub mod partition;
pub mod report;
pub mod verify;
pub mod workload;

// Re‑export the most common types at the crate root so that users can
// simply `use hbm_scale::*;`.
pub use bench::{run_benchmark, run_reference, BenchReport, Mode};
pub use buffer::HostBuffer;
pub use config::BenchConfig;
pub use device::{Access, BankId, Device, KernelArgs, ProgramImage};
pub use error::{DeviceError, Error, Phase, Result};
pub use gpu::GpuContext;
pub use host::HostDevice;
pub use orchestrator::{Orchestrator, RunPlan, RunResult, RunState};
pub use partition::{partition, BlockDescriptor};
pub use report::Throughput;
pub use workload::Workload;

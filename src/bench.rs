//! End-to-end benchmark runs.

use std::fmt;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use log::info;

use crate::buffer::HostBuffer;
use crate::config::BenchConfig;
use crate::device::Device;
use crate::error::Result;
use crate::orchestrator::{Orchestrator, RunPlan};
use crate::report::Throughput;
use crate::verify;
use crate::workload::Workload;

/// Which path computes the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// One lane over the whole buffer.
    SingleLane,
    /// One lane per bank pair.
    MultiLane,
    /// The sequential host computation only.
    ReferenceOnly,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_possible_value() {
            Some(value) => f.write_str(value.get_name()),
            None => Ok(()),
        }
    }
}

/// Result of a benchmark.
#[derive(Debug, Clone)]
pub struct BenchReport {
    pub mode: Mode,
    /// Number of lanes that actually ran.
    pub lanes: usize,
    pub throughput: Throughput,
    /// Whether the output was checked against the reference.  A failed
    /// check is an error, so `true` means the output matched.
    pub verified: bool,
    pub workload: Workload,
    pub output: HostBuffer,
}

impl BenchReport {
    pub fn elapsed(&self) -> Duration {
        self.throughput.elapsed
    }
}

/// Generate the workload and compute it on `device` in `mode`.
///
/// The output is checked against the sequential reference when
/// `config.verify` is set; a mismatch is returned as
/// [`crate::Error::Verification`].
pub fn run_benchmark<D: Device>(
    device: &D,
    config: &BenchConfig,
    mode: Mode,
) -> Result<BenchReport> {
    if mode == Mode::ReferenceOnly {
        return run_reference(config);
    }
    config.validate()?;
    let chunk_elements = config.chunk_elements()?;
    let workload = Workload::generate(config.total_elements, config.seed);
    info!("generated {} elements with seed {}", workload.len(), config.seed);

    let program = device.load_program(&config.program_image())?;
    let plan = match mode {
        Mode::SingleLane => RunPlan::uniform(chunk_elements),
        _ => RunPlan::banked(config.lanes, chunk_elements),
    }
    .with_size_divisor(config.size_divisor);

    info!("running {mode} on {}", device.name());
    let result = Orchestrator::new(device).run(&program, &workload.input, workload.scale, &plan)?;

    if config.verify {
        verify::check(&workload.input, workload.scale, &result.output, config.tolerance)?;
    }
    Ok(BenchReport {
        mode,
        lanes: result.blocks.len(),
        throughput: Throughput::new(workload.len(), result.elapsed),
        verified: config.verify,
        workload,
        output: result.output,
    })
}

/// Compute the workload sequentially on the host.  The reported time is
/// the wall time of the computation alone.
pub fn run_reference(config: &BenchConfig) -> Result<BenchReport> {
    config.validate()?;
    let workload = Workload::generate(config.total_elements, config.seed);
    let start = Instant::now();
    let output = verify::reference(&workload.input, workload.scale);
    let elapsed = start.elapsed();
    Ok(BenchReport {
        mode: Mode::ReferenceOnly,
        lanes: 1,
        throughput: Throughput::new(workload.len(), elapsed),
        verified: false,
        workload,
        output: HostBuffer::from_vec(output),
    })
}

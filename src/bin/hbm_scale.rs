//! Command-line front end.
//!
//! ```text
//! hbm-scale multi-lane                      # host context, built-in kernel
//! hbm-scale multi-lane scal.wgsl --backend gpu --lanes 8
//! hbm-scale reference-only --print 10
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hbm_scale::config::DeviceConfig;
use hbm_scale::{run_benchmark, BenchConfig, BenchReport, Device, GpuContext, HostDevice, Mode};

/// Measure memory bandwidth of `out[i] = scale * in[i]` across banked lanes
#[derive(Parser)]
#[command(name = "hbm-scale")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Which path computes the result
    #[arg(value_enum)]
    mode: Mode,

    /// Program image loaded onto the device (built-in kernel if omitted)
    #[arg(value_name = "PROGRAM")]
    program: Option<PathBuf>,

    /// TOML configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Execution context running the lanes
    #[arg(short, long, value_enum, default_value_t = Backend::Host)]
    backend: Backend,

    /// Buffer length in elements
    #[arg(short = 'n', long)]
    elements: Option<usize>,

    /// Number of lanes for multi-lane runs
    #[arg(short, long)]
    lanes: Option<usize>,

    /// Alignment of block boundaries in bytes
    #[arg(long)]
    chunk_bytes: Option<usize>,

    /// Let each kernel process only 1/N of its block
    #[arg(long)]
    size_divisor: Option<usize>,

    /// Seed of the input generator
    #[arg(long)]
    seed: Option<u64>,

    /// Check the result against the sequential reference
    #[arg(long, conflicts_with = "no_verify")]
    verify: bool,

    /// Skip the reference check
    #[arg(long)]
    no_verify: bool,

    /// Per-element tolerance of the reference check
    #[arg(long)]
    tolerance: Option<f32>,

    /// Print the first N `(out, scale * in)` pairs
    #[arg(long, value_name = "N")]
    print: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Host,
    Gpu,
}

impl Cli {
    fn config(&self) -> Result<BenchConfig> {
        let mut config = match &self.config {
            Some(path) => BenchConfig::from_toml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => BenchConfig::default(),
        };
        if let Some(program) = &self.program {
            config.program = Some(program.clone());
        }
        if let Some(n) = self.elements {
            config.total_elements = n;
        }
        if let Some(lanes) = self.lanes {
            config.lanes = lanes;
        }
        if let Some(bytes) = self.chunk_bytes {
            config.chunk_bytes = bytes;
        }
        if let Some(divisor) = self.size_divisor {
            config.size_divisor = divisor;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.verify {
            config.verify = true;
        }
        if self.no_verify {
            config.verify = false;
        }
        if let Some(tolerance) = self.tolerance {
            config.tolerance = tolerance;
        }
        Ok(config)
    }
}

fn run_on<D: Device>(device: &D, config: &BenchConfig, mode: Mode) -> Result<BenchReport> {
    run_benchmark(device, config, mode).with_context(|| format!("{mode} run on {}", device.name()))
}

fn print_results(report: &BenchReport, count: usize) {
    let scale = report.workload.scale;
    for (out, x) in report.output.iter().zip(report.workload.input.iter()).take(count) {
        println!("( {out} , {scale} * {x} )");
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = cli.config()?;
    config.validate()?;
    println!("Successfully setup environment");

    let report = match (cli.mode, cli.backend) {
        (Mode::ReferenceOnly, _) => hbm_scale::run_reference(&config)?,
        (mode, Backend::Host) => {
            let device = HostDevice::builder()
                .lane_capacity(config.device.lane_capacity)
                .banks(config.device.banks)
                .build()?;
            run_on(&device, &config, mode)?
        }
        (mode, Backend::Gpu) => {
            let DeviceConfig { lane_capacity, banks } = config.device;
            let device = GpuContext::new_blocking(lane_capacity, banks)?;
            run_on(&device, &config, mode)?
        }
    };

    if let Some(count) = cli.print {
        print_results(&report, count);
    }
    println!();
    println!("{} ({} lanes)", report.mode, report.lanes);
    println!("{}", report.throughput);
    if report.verified {
        println!("Output matches the reference");
    } else if report.mode == Mode::ReferenceOnly {
        println!("Note that the rate is indicative only for the reference path");
    }
    Ok(())
}

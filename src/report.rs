//! Throughput figures for a timed run.

use std::fmt;
use std::time::Duration;

const GIB: f64 = (1u64 << 30) as f64;

/// Bandwidth achieved while scaling `elements` values in `elapsed`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub elements: usize,
    pub elapsed: Duration,
    /// Input bytes processed per second, in GiB/s.
    pub gib_per_s: f64,
}

impl Throughput {
    pub fn new(elements: usize, elapsed: Duration) -> Self {
        let bytes = (elements * std::mem::size_of::<f32>()) as f64;
        let secs = elapsed.as_secs_f64();
        let gib_per_s = if secs > 0.0 { bytes / (secs * GIB) } else { 0.0 };
        Self {
            elements,
            elapsed,
            gib_per_s,
        }
    }

    /// Memory traffic rate: every element is read once and written once.
    pub fn access_gib_per_s(&self) -> f64 {
        2.0 * self.gib_per_s
    }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Kernel time without time to load/unload data: {:.6} s",
            self.elapsed.as_secs_f64()
        )?;
        writeln!(f, "GB/s computed: {:.3}", self.gib_per_s)?;
        write!(
            f,
            "Hence memory access speed is {:.3} GB/s for this program",
            self.access_gib_per_s()
        )
    }
}

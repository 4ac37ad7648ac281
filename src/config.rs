//! Benchmark configuration.
//!
//! Everything a run depends on (buffer size, lane count, alignment,
//! seed, whether to verify) lives in [`BenchConfig`] and is passed in
//! explicitly.  Configurations can be read from TOML; missing keys fall
//! back to the defaults below.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::ProgramImage;
use crate::error::{Error, Result};
use crate::partition::chunk_elements;
use crate::verify::DEFAULT_TOLERANCE;

/// Default buffer length in elements (64 MiB of `f32`).
pub const DEFAULT_TOTAL_ELEMENTS: usize = 1 << 24;
/// Default number of lanes.
pub const DEFAULT_LANES: usize = 16;
/// Default alignment of block boundaries, in bytes.
pub const DEFAULT_CHUNK_BYTES: usize = 4096;

/// Shape of the execution context to acquire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    pub lane_capacity: usize,
    pub banks: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            lane_capacity: DEFAULT_LANES,
            banks: 2 * DEFAULT_LANES,
        }
    }
}

/// Parameters of one benchmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    /// Length of the input and output buffers, in elements.
    pub total_elements: usize,
    /// Lanes used by multi-lane runs.
    pub lanes: usize,
    /// Block boundaries fall on multiples of this many bytes.
    pub chunk_bytes: usize,
    /// Kernels process `block length / size_divisor` elements.
    pub size_divisor: usize,
    pub seed: u64,
    /// Compare the result with a sequential recomputation.
    pub verify: bool,
    pub tolerance: f32,
    /// Program image; the built-in kernel when absent.
    pub program: Option<PathBuf>,
    pub device: DeviceConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            total_elements: DEFAULT_TOTAL_ELEMENTS,
            lanes: DEFAULT_LANES,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            size_divisor: 1,
            seed: 1,
            verify: cfg!(debug_assertions),
            tolerance: DEFAULT_TOLERANCE,
            program: None,
            device: DeviceConfig::default(),
        }
    }
}

impl BenchConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Alignment unit of block boundaries, in elements.
    pub fn chunk_elements(&self) -> Result<usize> {
        chunk_elements::<f32>(self.chunk_bytes).ok_or_else(|| {
            Error::Config(format!(
                "chunk of {} bytes is not a whole number of f32 elements",
                self.chunk_bytes
            ))
        })
    }

    pub fn program_image(&self) -> ProgramImage {
        ProgramImage::from(self.program.clone())
    }

    /// Reject configurations no run can be built from.
    pub fn validate(&self) -> Result<()> {
        if self.total_elements == 0 {
            return Err(Error::Config("buffer length must be positive".into()));
        }
        if self.lanes == 0 {
            return Err(Error::Config("lane count must be positive".into()));
        }
        if self.size_divisor == 0 {
            return Err(Error::Config("size divisor must be positive".into()));
        }
        if self.tolerance.is_nan() || self.tolerance < 0.0 {
            return Err(Error::Config(format!("tolerance {} is not usable", self.tolerance)));
        }
        self.chunk_elements()?;
        if self.lanes > self.device.lane_capacity {
            return Err(Error::Config(format!(
                "{} lanes exceed the device capacity of {}",
                self.lanes, self.device.lane_capacity
            )));
        }
        if 2 * self.lanes > self.device.banks {
            return Err(Error::Config(format!(
                "{} lanes need {} banks, device has {}",
                self.lanes,
                2 * self.lanes,
                self.device.banks
            )));
        }
        Ok(())
    }
}

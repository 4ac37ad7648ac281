//! Error types.
//!
//! Execution contexts report failures as [`DeviceError`].  The
//! orchestration layer wraps them in [`Error`] together with the lane
//! index and the [`Phase`] in which they occurred so that a failed run
//! can be diagnosed without re-running it.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::device::{Access, BankId};

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The step of a run in which a failure was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Buffer allocation and kernel instantiation.
    Bind,
    /// Host-to-device transfer of the input blocks.
    Staging,
    /// Kernel execution.
    Running,
    /// Device-to-host transfer of the output blocks.
    Draining,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Bind => "bind",
            Phase::Staging => "staging",
            Phase::Running => "running",
            Phase::Draining => "draining",
        };
        f.write_str(name)
    }
}

/// A failure raised by an execution context.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("bank {bank} is out of range (device has {banks} banks)")]
    BankOutOfRange { bank: BankId, banks: usize },
    #[error("bank {0} is already in use")]
    BankInUse(BankId),
    #[error("buffer of {bytes} bytes exceeds the device limit of {limit} bytes")]
    BufferTooLarge { bytes: u64, limit: u64 },
    #[error("buffer on bank {bank} is {access:?}, kernel needs {expected:?}")]
    AccessMismatch {
        bank: BankId,
        access: Access,
        expected: Access,
    },
    #[error("kernel asks for {requested} elements but the buffer holds {available}")]
    KernelOutOfBounds { requested: usize, available: usize },
    #[error("host block has {host} elements but the device buffer holds {device}")]
    LengthMismatch { host: usize, device: usize },
    #[error("program has no kernel named `{0}`")]
    KernelNotFound(String),
    #[error("buffer on bank {0} has no completed device-to-host transfer")]
    NotRetrieved(BankId),
    #[error("buffer mapping failed: {0}")]
    Map(String),
    #[error("device validation failed: {0}")]
    Validation(String),
    #[error("device poll failed: {0}")]
    Poll(String),
    #[error("lane worker panicked")]
    WorkerPanicked,
    #[error("injected fault on bank {0}")]
    Injected(BankId),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A failure reported by [`crate::device::Device::barrier`].
#[derive(Debug, Error)]
pub enum FenceError {
    /// The fence at `index` of the waited-on set failed.
    #[error("fence {index} failed: {source}")]
    Fence {
        index: usize,
        #[source]
        source: DeviceError,
    },
    /// The context itself failed while waiting; no single fence is to blame.
    #[error("context failed while waiting: {0}")]
    Context(#[source] DeviceError),
}

/// Errors surfaced by the benchmark.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no device found: {0}")]
    NoDeviceFound(String),
    #[error("failed to load program {path:?}: {reason}")]
    ProgramLoadFailed { path: Option<PathBuf>, reason: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("lane {lane} failed during {phase}: {source}")]
    Lane {
        lane: usize,
        phase: Phase,
        #[source]
        source: DeviceError,
    },
    #[error("device failed during {phase}: {source}")]
    Device {
        phase: Phase,
        #[source]
        source: DeviceError,
    },
    #[error("verification failed: {mismatches} of {len} elements differ, first at index {index} (expected {expected}, got {actual})")]
    Verification {
        index: usize,
        expected: f32,
        actual: f32,
        mismatches: usize,
        len: usize,
    },
    #[error("verification failed: candidate has {candidate} elements, input has {input}")]
    VerificationLength { input: usize, candidate: usize },
}

impl Error {
    /// Attribute a barrier failure to the lane whose fence failed, or to
    /// the whole context when no fence is to blame.
    pub(crate) fn from_fence(phase: Phase, err: FenceError) -> Self {
        match err {
            FenceError::Fence { index, source } => Error::Lane {
                lane: index,
                phase,
                source,
            },
            FenceError::Context(source) => Error::Device { phase, source },
        }
    }

    /// `true` for failures of the dispatch path (as opposed to setup,
    /// configuration or verification failures).  Such a run may be
    /// retried from scratch.
    pub fn is_dispatch(&self) -> bool {
        matches!(self, Error::Lane { .. } | Error::Device { .. })
    }
}

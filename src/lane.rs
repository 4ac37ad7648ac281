//! Binding blocks to banks and kernel instances.

use log::{debug, warn};

use crate::device::{Access, BankId, Device, KernelArgs};
use crate::error::{Error, Phase, Result};
use crate::kernel::{compute_unit_entry, ENTRY_POINT};
use crate::partition::BlockDescriptor;

/// How lanes map onto the program's compute units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneLayout {
    /// One lane running the plain `scal` kernel.
    Uniform,
    /// Up to `lanes` lanes, lane `i` running compute unit `scal_{i+1}`.
    Banked { lanes: usize },
}

impl LaneLayout {
    pub fn lanes(&self) -> usize {
        match self {
            LaneLayout::Uniform => 1,
            LaneLayout::Banked { lanes } => *lanes,
        }
    }

    fn entry(&self, lane: usize) -> String {
        match self {
            LaneLayout::Uniform => ENTRY_POINT.to_string(),
            LaneLayout::Banked { .. } => compute_unit_entry(lane),
        }
    }
}

/// Bank receiving lane `lane`'s input.
pub fn input_bank(lane: usize) -> BankId {
    2 * lane
}

/// Bank receiving lane `lane`'s output.
pub fn output_bank(lane: usize) -> BankId {
    2 * lane + 1
}

/// One lane of a run: a block, its two device buffers and the kernel
/// instance that reads one and writes the other.
pub struct Lane<D: Device> {
    pub index: usize,
    pub block: BlockDescriptor,
    pub entry: String,
    pub input: D::Buffer,
    pub output: D::Buffer,
    pub kernel: D::Kernel,
}

impl<D: Device> Lane<D> {
    pub fn input_bank(&self) -> BankId {
        input_bank(self.index)
    }

    pub fn output_bank(&self) -> BankId {
        output_bank(self.index)
    }
}

/// Allocate buffers and kernel instances for every block.
///
/// `blocks_in` and `blocks_out` describe the same partition of the input
/// and output buffers.  Each kernel processes `length / size_divisor`
/// elements of its block.  Nothing executes during binding.  On failure
/// the lanes bound so far are dropped, releasing their banks.
///
/// # Panics
///
/// Panics if the two partitions differ or `size_divisor` is zero.
pub fn bind<D: Device>(
    device: &D,
    program: &D::Program,
    blocks_in: &[BlockDescriptor],
    blocks_out: &[BlockDescriptor],
    scale: f32,
    layout: LaneLayout,
    size_divisor: usize,
) -> Result<Vec<Lane<D>>> {
    assert_eq!(blocks_in, blocks_out, "input and output partitions differ");
    assert!(size_divisor > 0, "size divisor must be positive");

    let lanes = blocks_in.len();
    if lanes > layout.lanes() {
        return Err(Error::Config(format!(
            "{lanes} blocks for a layout of {} lanes",
            layout.lanes()
        )));
    }
    if lanes > device.lane_capacity() {
        return Err(Error::Config(format!(
            "{lanes} lanes requested but {} supports {}",
            device.name(),
            device.lane_capacity()
        )));
    }
    if 2 * lanes > device.bank_count() {
        return Err(Error::Config(format!(
            "{lanes} lanes need {} banks but {} has {}",
            2 * lanes,
            device.name(),
            device.bank_count()
        )));
    }
    if size_divisor > 1 {
        warn!("kernels process 1/{size_divisor} of each block");
    }

    let mut bound = Vec::with_capacity(lanes);
    for (index, block) in blocks_in.iter().enumerate() {
        let lane_err = |source| Error::Lane {
            lane: index,
            phase: Phase::Bind,
            source,
        };
        let input = device
            .allocate_buffer(Access::ReadOnly, input_bank(index), block.length)
            .map_err(lane_err)?;
        let output = device
            .allocate_buffer(Access::WriteOnly, output_bank(index), block.length)
            .map_err(lane_err)?;
        let entry = layout.entry(index);
        let args = KernelArgs {
            element_count: block.length / size_divisor,
            scale,
        };
        let kernel = device
            .bind_kernel(program, &entry, &input, &output, args)
            .map_err(lane_err)?;
        debug!(
            "lane {index}: {entry} over [{}, {}) banks {}/{}",
            block.offset,
            block.end(),
            input_bank(index),
            output_bank(index)
        );
        bound.push(Lane {
            index,
            block: *block,
            entry,
            input,
            output,
            kernel,
        });
    }
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ProgramImage;
    use crate::error::DeviceError;
    use crate::host::{Fault, HostDevice};
    use crate::partition::partition;

    const BANKED: LaneLayout = LaneLayout::Banked { lanes: 4 };

    #[test]
    fn banks_are_even_odd_pairs() {
        assert_eq!((input_bank(0), output_bank(0)), (0, 1));
        assert_eq!((input_bank(7), output_bank(7)), (14, 15));
    }

    #[test]
    fn binds_one_lane_per_block() {
        let device = HostDevice::new(4).unwrap();
        let program = device.load_program(&ProgramImage::Builtin).unwrap();
        let blocks = partition(1025, 4, 4);
        let lanes = bind(&device, &program, &blocks, &blocks, 2.0, BANKED, 1).unwrap();
        assert_eq!(lanes.len(), 4);
        assert_eq!(device.banks_in_use(), 8);
        assert_eq!(lanes[3].entry, "scal:{scal_4}");
        assert_eq!(lanes[3].block.length, 257);
        assert_eq!(lanes[2].input_bank(), 4);
        assert_eq!(lanes[2].output_bank(), 5);
        drop(lanes);
        assert_eq!(device.banks_in_use(), 0);
    }

    #[test]
    fn uniform_layout_uses_plain_entry() {
        let device = HostDevice::new(1).unwrap();
        let program = device.load_program(&ProgramImage::Builtin).unwrap();
        let blocks = partition(100, 1, 4);
        let layout = LaneLayout::Uniform;
        let lanes = bind(&device, &program, &blocks, &blocks, 1.0, layout, 1).unwrap();
        assert_eq!(lanes.len(), 1);
        assert_eq!(lanes[0].entry, "scal");
    }

    #[test]
    fn too_many_lanes_for_device() {
        let device = HostDevice::new(2).unwrap();
        let program = device.load_program(&ProgramImage::Builtin).unwrap();
        let blocks = partition(64, 4, 4);
        let result = bind(&device, &program, &blocks, &blocks, 1.0, BANKED, 1);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn allocation_failure_aborts_binding_and_releases_banks() {
        let device = HostDevice::builder()
            .lane_capacity(4)
            .banks(8)
            .fault(Fault::Allocate(5))
            .build()
            .unwrap();
        let program = device.load_program(&ProgramImage::Builtin).unwrap();
        let blocks = partition(64, 4, 4);
        let result = bind(&device, &program, &blocks, &blocks, 1.0, BANKED, 1);
        match result {
            Err(Error::Lane {
                lane: 2,
                phase: Phase::Bind,
                source: DeviceError::Injected(5),
            }) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("binding should fail"),
        }
        assert_eq!(device.banks_in_use(), 0);
    }

    #[test]
    fn size_divisor_shrinks_kernel_work() {
        let device = HostDevice::new(1).unwrap();
        let program = device.load_program(&ProgramImage::Builtin).unwrap();
        let blocks = partition(10, 1, 4);
        assert!(bind(&device, &program, &blocks, &blocks, 1.0, LaneLayout::Uniform, 4).is_ok());
    }
}

//! Running the lanes of one benchmark pass.
//!
//! A run moves through `Idle → Staging → Running → Draining → Done`.
//! Every phase fans out one operation per lane and then waits for all of
//! them at a barrier before the next phase starts:
//!
//! * staging copies each lane's input block to its bank;
//! * running launches every kernel without waiting on any single one,
//!   bracketed by the timestamps that make up [`RunResult::elapsed`];
//! * draining copies each output block back into the host buffer.
//!
//! A failure in any lane ends the run with an error naming the lane and
//! the phase.  No partial output is returned.

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::buffer::HostBuffer;
use crate::device::Device;
use crate::error::{DeviceError, Error, Phase, Result};
use crate::lane::{self, Lane, LaneLayout};
use crate::partition::{partition, BlockDescriptor};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Staging,
    Running,
    Draining,
    Done,
}

/// Shape of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPlan {
    pub layout: LaneLayout,
    /// Alignment unit of block boundaries, in elements.
    pub chunk_elements: usize,
    /// Each kernel processes `block length / size_divisor` elements.
    pub size_divisor: usize,
}

impl RunPlan {
    pub fn uniform(chunk_elements: usize) -> Self {
        Self {
            layout: LaneLayout::Uniform,
            chunk_elements,
            size_divisor: 1,
        }
    }

    pub fn banked(lanes: usize, chunk_elements: usize) -> Self {
        Self {
            layout: LaneLayout::Banked { lanes },
            chunk_elements,
            size_divisor: 1,
        }
    }

    pub fn with_size_divisor(mut self, size_divisor: usize) -> Self {
        self.size_divisor = size_divisor;
        self
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Time from the first launch to the observed completion of the
    /// last lane.  Transfers are not included.
    pub elapsed: Duration,
    pub output: HostBuffer,
    /// The partition the lanes ran over.
    pub blocks: Vec<BlockDescriptor>,
}

/// Drives runs on one execution context.
pub struct Orchestrator<'d, D: Device> {
    device: &'d D,
    state: RunState,
}

impl<'d, D: Device> Orchestrator<'d, D> {
    pub fn new(device: &'d D) -> Self {
        Self {
            device,
            state: RunState::Idle,
        }
    }

    /// The state reached by the most recent run.  After a failure in
    /// staging, running or draining this is the phase that failed; a run
    /// that fails while binding stays `Idle`.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Scale `input` by `scale` across the lanes described by `plan`.
    ///
    /// Every run starts from [`RunState::Idle`], so a failed run can be
    /// retried by calling `run` again.
    pub fn run(
        &mut self,
        program: &D::Program,
        input: &HostBuffer,
        scale: f32,
        plan: &RunPlan,
    ) -> Result<RunResult> {
        self.state = RunState::Idle;
        if plan.chunk_elements == 0 || plan.layout.lanes() == 0 {
            return Err(Error::Config(format!("unusable run plan {plan:?}")));
        }
        let blocks = partition(input.len(), plan.layout.lanes(), plan.chunk_elements);
        let lanes = lane::bind(
            self.device,
            program,
            &blocks,
            &blocks,
            scale,
            plan.layout,
            plan.size_divisor,
        )?;
        let mut output = HostBuffer::zeroed(input.len());

        self.state = RunState::Staging;
        self.fan_out(&lanes, Phase::Staging, |lane| {
            self.device.enqueue_to_device(&lane.input, input.block(&lane.block))
        })?;

        self.state = RunState::Running;
        info!("starting computation on {} lanes", lanes.len());
        let t0 = Instant::now();
        self.fan_out(&lanes, Phase::Running, |lane| {
            self.device.enqueue_execute(&lane.kernel)
        })?;
        let elapsed = t0.elapsed();
        info!("computation done in {elapsed:?}");

        self.state = RunState::Draining;
        self.fan_out(&lanes, Phase::Draining, |lane| {
            self.device.enqueue_to_host(&lane.output)
        })?;
        for (lane, host) in lanes.iter().zip(output.blocks_mut(&blocks)) {
            self.device
                .read_back(&lane.output, host)
                .map_err(|source| Error::Lane {
                    lane: lane.index,
                    phase: Phase::Draining,
                    source,
                })?;
        }

        drop(lanes);
        self.state = RunState::Done;
        Ok(RunResult {
            elapsed,
            output,
            blocks,
        })
    }

    /// Enqueue `op` for every lane, then wait for all of them.
    ///
    /// If enqueueing fails part way, the operations already in flight are
    /// still waited on before the error is returned.
    fn fan_out<F>(&self, lanes: &[Lane<D>], phase: Phase, mut op: F) -> Result<()>
    where
        F: FnMut(&Lane<D>) -> Result<D::Fence, DeviceError>,
    {
        let mut fences = Vec::with_capacity(lanes.len());
        for lane in lanes {
            match op(lane) {
                Ok(fence) => fences.push(fence),
                Err(source) => {
                    if let Err(e) = self.device.barrier(fences) {
                        warn!("while abandoning {phase}: {e}");
                    }
                    return Err(Error::Lane {
                        lane: lane.index,
                        phase,
                        source,
                    });
                }
            }
        }
        debug!("{phase}: waiting on {} fences", fences.len());
        self.device
            .barrier(fences)
            .map_err(|e| Error::from_fence(phase, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use parking_lot::Mutex;

    use crate::device::{Access, BankId, KernelArgs, ProgramImage};
    use crate::error::FenceError;
    use crate::host::{Fault, HostDevice};

    const TRANSFER_DELAY: Duration = Duration::from_millis(50);

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        ToDevice,
        Execute,
        ToHost,
        Barrier,
    }

    /// Records every call and makes transfers take `TRANSFER_DELAY` to
    /// complete.  Kernels finish as soon as they are enqueued.
    #[derive(Default)]
    struct RecordingDevice {
        calls: Mutex<Vec<Call>>,
        lost_while_waiting_on: Option<Call>,
    }

    impl RecordingDevice {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    struct Bank(Arc<Mutex<Vec<f32>>>);

    struct Scale {
        input: Arc<Mutex<Vec<f32>>>,
        output: Arc<Mutex<Vec<f32>>>,
        args: KernelArgs,
    }

    impl Device for RecordingDevice {
        type Program = ();
        type Buffer = Bank;
        type Kernel = Scale;
        type Fence = Call;

        fn name(&self) -> &str {
            "recording"
        }

        fn lane_capacity(&self) -> usize {
            4
        }

        fn bank_count(&self) -> usize {
            8
        }

        fn load_program(&self, _image: &ProgramImage) -> Result<()> {
            Ok(())
        }

        fn allocate_buffer(
            &self,
            _access: Access,
            _bank: BankId,
            len: usize,
        ) -> Result<Bank, DeviceError> {
            Ok(Bank(Arc::new(Mutex::new(vec![0.0; len]))))
        }

        fn bind_kernel(
            &self,
            _program: &(),
            _entry: &str,
            input: &Bank,
            output: &Bank,
            args: KernelArgs,
        ) -> Result<Scale, DeviceError> {
            Ok(Scale {
                input: Arc::clone(&input.0),
                output: Arc::clone(&output.0),
                args,
            })
        }

        fn enqueue_to_device(&self, buffer: &Bank, host: &[f32]) -> Result<Call, DeviceError> {
            self.calls.lock().push(Call::ToDevice);
            buffer.0.lock().copy_from_slice(host);
            Ok(Call::ToDevice)
        }

        fn enqueue_execute(&self, kernel: &Scale) -> Result<Call, DeviceError> {
            self.calls.lock().push(Call::Execute);
            let input = kernel.input.lock();
            let mut output = kernel.output.lock();
            let n = kernel.args.element_count;
            crate::kernel::scale_block(&input, &mut output, n, kernel.args.scale);
            Ok(Call::Execute)
        }

        fn enqueue_to_host(&self, _buffer: &Bank) -> Result<Call, DeviceError> {
            self.calls.lock().push(Call::ToHost);
            Ok(Call::ToHost)
        }

        fn read_back(&self, buffer: &Bank, host: &mut [f32]) -> Result<(), DeviceError> {
            host.copy_from_slice(&buffer.0.lock());
            Ok(())
        }

        fn barrier(&self, fences: Vec<Call>) -> Result<(), FenceError> {
            self.calls.lock().push(Call::Barrier);
            for fence in fences {
                if self.lost_while_waiting_on == Some(fence) {
                    return Err(FenceError::Context(DeviceError::Poll("device lost".into())));
                }
                if fence != Call::Execute {
                    thread::sleep(TRANSFER_DELAY);
                }
            }
            Ok(())
        }
    }

    fn ramp(len: usize) -> HostBuffer {
        HostBuffer::from_vec((0..len).map(|i| i as f32).collect())
    }

    #[test]
    fn banked_run_scales_every_element() {
        let device = HostDevice::new(4).unwrap();
        let program = device.load_program(&ProgramImage::Builtin).unwrap();
        let input = ramp(1025);
        let mut orchestrator = Orchestrator::new(&device);
        let result = orchestrator
            .run(&program, &input, 0.5, &RunPlan::banked(4, 4))
            .unwrap();
        assert_eq!(orchestrator.state(), RunState::Done);
        assert_eq!(result.blocks.len(), 4);
        for (i, value) in result.output.iter().enumerate() {
            assert_eq!(*value, 0.5 * i as f32);
        }
        assert_eq!(device.banks_in_use(), 0);
    }

    #[test]
    fn uniform_run_uses_one_block() {
        let device = HostDevice::new(1).unwrap();
        let program = device.load_program(&ProgramImage::Builtin).unwrap();
        let input = ramp(33);
        let result = Orchestrator::new(&device)
            .run(&program, &input, 2.0, &RunPlan::uniform(4))
            .unwrap();
        assert_eq!(result.blocks, vec![BlockDescriptor::new(0, 33)]);
        assert_eq!(result.output[32], 64.0);
    }

    #[test]
    fn execution_fault_fails_running_phase() {
        let device = HostDevice::builder()
            .lane_capacity(4)
            .banks(8)
            .fault(Fault::Execute(4))
            .build()
            .unwrap();
        let program = device.load_program(&ProgramImage::Builtin).unwrap();
        let mut orchestrator = Orchestrator::new(&device);
        let err = orchestrator
            .run(&program, &ramp(64), 1.0, &RunPlan::banked(4, 4))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Lane {
                lane: 2,
                phase: Phase::Running,
                source: DeviceError::Injected(4)
            }
        ));
        assert!(err.is_dispatch());
        assert_eq!(orchestrator.state(), RunState::Running);
        assert_eq!(device.banks_in_use(), 0);
    }

    #[test]
    fn transfer_faults_name_their_phase() {
        let device = HostDevice::builder()
            .lane_capacity(2)
            .banks(4)
            .fault(Fault::Transfer(2))
            .fault(Fault::Transfer(3))
            .build()
            .unwrap();
        let program = device.load_program(&ProgramImage::Builtin).unwrap();
        let err = Orchestrator::new(&device)
            .run(&program, &ramp(64), 1.0, &RunPlan::banked(2, 4))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Lane {
                lane: 1,
                phase: Phase::Staging,
                ..
            }
        ));
    }

    #[test]
    fn output_transfer_fault_fails_draining_phase() {
        let device = HostDevice::builder()
            .lane_capacity(2)
            .banks(4)
            .fault(Fault::Transfer(1))
            .build()
            .unwrap();
        let program = device.load_program(&ProgramImage::Builtin).unwrap();
        let mut orchestrator = Orchestrator::new(&device);
        let err = orchestrator
            .run(&program, &ramp(64), 1.0, &RunPlan::banked(2, 4))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Lane {
                lane: 0,
                phase: Phase::Draining,
                ..
            }
        ));
        assert_eq!(orchestrator.state(), RunState::Draining);
    }

    #[test]
    fn size_divisor_leaves_block_tails_untouched() {
        let device = HostDevice::new(2).unwrap();
        let program = device.load_program(&ProgramImage::Builtin).unwrap();
        let input = HostBuffer::from_vec(vec![1.0; 16]);
        let plan = RunPlan::banked(2, 4).with_size_divisor(2);
        let result = Orchestrator::new(&device)
            .run(&program, &input, 3.0, &plan)
            .unwrap();
        let expected: Vec<f32> = [[3.0; 4], [0.0; 4], [3.0; 4], [0.0; 4]].concat();
        assert_eq!(result.output.as_slice(), expected.as_slice());
    }

    #[test]
    fn empty_input_runs_no_lanes() {
        let device = HostDevice::new(2).unwrap();
        let program = device.load_program(&ProgramImage::Builtin).unwrap();
        let result = Orchestrator::new(&device)
            .run(&program, &HostBuffer::zeroed(0), 1.0, &RunPlan::banked(2, 4))
            .unwrap();
        assert!(result.blocks.is_empty());
        assert!(result.output.is_empty());
    }

    #[test]
    fn phases_are_separated_by_barriers() {
        use Call::*;
        let device = RecordingDevice::default();
        let result = Orchestrator::new(&device)
            .run(&(), &ramp(64), 2.0, &RunPlan::banked(2, 4))
            .unwrap();
        assert_eq!(
            device.calls(),
            vec![ToDevice, ToDevice, Barrier, Execute, Execute, Barrier, ToHost, ToHost, Barrier]
        );
        assert_eq!(result.output[63], 126.0);
    }

    #[test]
    fn elapsed_excludes_transfers() {
        let device = RecordingDevice::default();
        let start = Instant::now();
        let result = Orchestrator::new(&device)
            .run(&(), &ramp(64), 2.0, &RunPlan::banked(2, 4))
            .unwrap();
        // Two staged and two drained blocks.
        assert!(start.elapsed() >= 4 * TRANSFER_DELAY);
        assert!(result.elapsed < TRANSFER_DELAY, "{:?}", result.elapsed);
    }

    #[test]
    fn context_failure_is_not_blamed_on_a_lane() {
        let device = RecordingDevice {
            lost_while_waiting_on: Some(Call::Execute),
            ..Default::default()
        };
        let mut orchestrator = Orchestrator::new(&device);
        let err = orchestrator
            .run(&(), &ramp(64), 1.0, &RunPlan::banked(2, 4))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Device {
                phase: Phase::Running,
                source: DeviceError::Poll(_)
            }
        ));
        assert!(err.is_dispatch());
        assert_eq!(orchestrator.state(), RunState::Running);
        assert!(!device.calls().contains(&Call::ToHost));
    }

    #[test]
    fn bind_failure_leaves_run_idle() {
        let device = HostDevice::builder()
            .lane_capacity(2)
            .banks(4)
            .fault(Fault::Allocate(3))
            .build()
            .unwrap();
        let program = device.load_program(&ProgramImage::Builtin).unwrap();
        let mut orchestrator = Orchestrator::new(&device);
        let err = orchestrator
            .run(&program, &ramp(64), 1.0, &RunPlan::banked(2, 4))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Lane {
                lane: 1,
                phase: Phase::Bind,
                ..
            }
        ));
        assert_eq!(orchestrator.state(), RunState::Idle);
        assert_eq!(device.banks_in_use(), 0);
    }
}

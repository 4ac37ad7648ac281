//! Runs on the wgpu context.  Every test returns early when the machine
//! has no usable adapter.

use hbm_scale::{
    run_benchmark, verify, BenchConfig, Device, Error, GpuContext, Mode, Orchestrator,
    ProgramImage, RunPlan, Workload,
};

fn context(lanes: usize) -> Option<GpuContext> {
    match GpuContext::new_blocking(lanes, 2 * lanes) {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping: {e}");
            None
        }
    }
}

#[test]
fn banked_run_matches_reference() {
    let Some(ctx) = context(4) else { return };
    let program = ctx.load_program(&ProgramImage::Builtin).unwrap();
    let workload = Workload::generate(100_000, 5);
    let result = Orchestrator::new(&ctx)
        .run(&program, &workload.input, workload.scale, &RunPlan::banked(4, 64))
        .unwrap();
    assert_eq!(result.blocks.len(), 4);
    verify::check(&workload.input, workload.scale, &result.output, 1e-3).unwrap();
    assert_eq!(ctx.banks_in_use(), 0);
}

#[test]
fn single_lane_benchmark_verifies() {
    let Some(ctx) = context(2) else { return };
    let config = BenchConfig {
        total_elements: 70_000,
        lanes: 2,
        verify: true,
        tolerance: 1e-3,
        ..Default::default()
    };
    let report = run_benchmark(&ctx, &config, Mode::SingleLane).unwrap();
    assert_eq!(report.lanes, 1);
    assert!(report.verified);
}

#[test]
fn wgsl_program_is_loaded_from_file() {
    let Some(ctx) = context(2) else { return };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scal.wgsl");
    std::fs::write(&path, hbm_scale::kernel::SCALE_SHADER).unwrap();
    let program = ctx.load_program(&ProgramImage::File(path)).unwrap();
    let workload = Workload::generate(5000, 2);
    let result = Orchestrator::new(&ctx)
        .run(&program, &workload.input, workload.scale, &RunPlan::banked(2, 16))
        .unwrap();
    assert!(verify::verify(&workload.input, workload.scale, &result.output, 1e-3));

    let broken = dir.path().join("broken.wgsl");
    std::fs::write(&broken, "this is not wgsl").unwrap();
    assert!(matches!(
        ctx.load_program(&ProgramImage::File(broken)),
        Err(Error::ProgramLoadFailed { .. })
    ));
}

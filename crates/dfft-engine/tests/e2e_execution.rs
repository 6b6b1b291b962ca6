//! End-to-end execution scenarios: lifecycle, hardened mode, device faults,
//! queue affinity, trace ledgers and concurrent execution of one plan.

use std::sync::Arc;
use std::thread;

use dfft_engine::{
    BufferLayout, DeviceMemory, Direction, ExecutionContext, FftError, FftErrorKind, HostDevice,
    Placement, PlanCacheConfig, Planner, PlannerOptions, Precision, QueueId, TransformDescriptor,
    TransformTrace, compile, download, execute, synchronize, upload,
};
use dfft_runtime::{Runtime, RuntimeConfig, RuntimeError, RuntimeMode};

fn ramp(n: usize) -> Vec<(f32, f32)> {
    (0..n).map(|i| (i as f32 * 0.25, 1.0 - i as f32 * 0.125)).collect()
}

#[test]
fn e2e_full_lifecycle_with_caller_owned_scratch() {
    let runtime = Runtime::new(RuntimeConfig::default());
    assert_eq!(
        compile(&runtime, &TransformDescriptor::new([16])).expect_err("before setup").kind(),
        FftErrorKind::NotInitialized
    );
    runtime.setup().expect("setup");
    assert_eq!(
        FftError::from(runtime.setup().expect_err("twice")).kind(),
        FftErrorKind::AlreadyInitialized
    );

    let device = HostDevice::new();
    let plan = compile(&runtime, &TransformDescriptor::new([16, 16])).expect("plan");
    let required = plan.scratch_requirement();
    let scratch = device.allocate(required).expect("scratch");
    let x = device.allocate(256 * 8).expect("x");
    let y = device.allocate(256 * 8).expect("y");
    upload(&device, &x, &ramp(256)).expect("upload");

    let mut ctx = ExecutionContext::new(&runtime).expect("ctx");
    ctx.bind_scratch(scratch, required, &[&plan]).expect("bind");
    execute(&runtime, &plan, &mut ctx, &device, &[x], &[y]).expect("execute");
    synchronize(&device, &ctx).expect("sync");

    assert_eq!(
        FftError::from(runtime.cleanup().expect_err("plan and context alive")),
        FftError::LeakedResources {
            plans: 1,
            contexts: 1
        }
    );
    ctx.destroy();
    plan.destroy();
    runtime.cleanup().expect("cleanup");

    // the context never owned the scratch
    device.free(scratch).expect("caller frees scratch");
    device.free(x).expect("free x");
    device.free(y).expect("free y");
    assert_eq!(device.live_allocations(), 0);
    assert_eq!(
        FftError::from(runtime.cleanup().expect_err("already clean")).kind(),
        FftErrorKind::NotInitialized
    );
}

#[test]
fn e2e_out_of_place_never_modifies_input() {
    let runtime = Runtime::initialized(RuntimeConfig::default()).expect("setup");
    let device = Arc::new(HostDevice::new());
    let plan = compile(
        &runtime,
        &TransformDescriptor::new([3, 5, 7]).with_number_of_transforms(2),
    )
    .expect("plan");
    let n = 3 * 5 * 7 * 2;
    let x = device.allocate(n * 8).expect("x");
    let y = device.allocate(n * 8).expect("y");
    let signal = ramp(n);
    upload(device.as_ref(), &x, &signal).expect("upload");
    let mut ctx = ExecutionContext::new(&runtime).expect("ctx");
    ctx.allocate_scratch(device.clone(), &[&plan]).expect("scratch");
    execute(&runtime, &plan, &mut ctx, device.as_ref(), &[x], &[y]).expect("execute");
    let after: Vec<(f32, f32)> = download(device.as_ref(), &x, n).expect("download");
    assert_eq!(after, signal);
}

#[test]
fn e2e_hardened_mode_rejects_non_finite_input() {
    let runtime =
        Runtime::initialized(RuntimeConfig::default().with_mode(RuntimeMode::Hardened))
            .expect("setup");
    let device = HostDevice::new();
    let plan = compile(&runtime, &TransformDescriptor::new([8])).expect("plan");
    let x = device.allocate(64).expect("x");
    let y = device.allocate(64).expect("y");
    let mut signal = ramp(8);
    signal[5].1 = f32::NAN;
    upload(&device, &x, &signal).expect("upload");
    upload(&device, &y, &[(9.0f32, 9.0f32); 8]).expect("sentinel");

    let mut ctx = ExecutionContext::new(&runtime).expect("ctx");
    let err = execute(&runtime, &plan, &mut ctx, &device, &[x], &[y]).expect_err("NaN");
    assert_eq!(err, FftError::NonFiniteInput { index: 5 });
    assert!(ctx.traces().is_empty());
    let untouched: Vec<(f32, f32)> = download(&device, &y, 8).expect("download");
    assert_eq!(untouched, vec![(9.0, 9.0); 8]);

    // strict mode lets the NaN propagate
    let strict = Runtime::initialized(RuntimeConfig::default()).expect("strict");
    let plan = compile(&strict, &TransformDescriptor::new([8])).expect("plan");
    let mut ctx = ExecutionContext::new(&strict).expect("ctx");
    execute(&strict, &plan, &mut ctx, &device, &[x], &[y]).expect("strict");
    let spectrum: Vec<(f32, f32)> = download(&device, &y, 8).expect("download");
    assert!(spectrum.iter().all(|(re, im)| re.is_nan() || im.is_nan()));
}

#[test]
fn e2e_device_faults_are_call_level_retriable() {
    let runtime = Runtime::initialized(RuntimeConfig::default()).expect("setup");
    let device = HostDevice::new();
    let plan = compile(&runtime, &TransformDescriptor::new([12])).expect("plan");
    let scratch = device.allocate(plan.scratch_requirement()).expect("scratch");
    let x = device.allocate(96).expect("x");
    let y = device.allocate(96).expect("y");
    let mut ctx = ExecutionContext::new(&runtime).expect("ctx");
    ctx.bind_scratch(scratch, scratch.len(), &[&plan]).expect("bind");

    device.fail_next_launch("ECC error");
    let err = execute(&runtime, &plan, &mut ctx, &device, &[x], &[y]).expect_err("fault");
    assert_eq!(err.kind(), FftErrorKind::DeviceExecutionFailure);
    assert!(err.kind().is_recoverable());
    assert!(err.to_string().contains("ECC error"));
    execute(&runtime, &plan, &mut ctx, &device, &[x], &[y]).expect("retry succeeds");

    // freeing the scratch behind the context's back is a device fault too
    device.free(scratch).expect("free");
    let err = execute(&runtime, &plan, &mut ctx, &device, &[x], &[y]).expect_err("dangling");
    assert_eq!(err.kind(), FftErrorKind::DeviceExecutionFailure);
}

#[test]
fn e2e_unsupported_shapes_are_terminal() {
    let runtime = Runtime::initialized(RuntimeConfig::default()).expect("setup");
    let planner = Planner::new(
        runtime.clone(),
        PlannerOptions::default().with_bluestein(false),
    );
    let err = planner
        .compile(&TransformDescriptor::new([8, 17]))
        .expect_err("prime axis");
    assert_eq!(err.kind(), FftErrorKind::UnsupportedConfiguration);
    assert!(!err.kind().is_recoverable());

    let err = compile(
        &runtime,
        &TransformDescriptor::new([23]).with_precision(Precision::Half),
    )
    .expect_err("half bluestein");
    assert_eq!(err.kind(), FftErrorKind::UnsupportedConfiguration);

    let err = compile(
        &runtime,
        &TransformDescriptor::new([8])
            .with_placement(Placement::InPlace)
            .with_output_layout(BufferLayout::planar()),
    )
    .expect_err("in-place layouts differ");
    assert_eq!(err.kind(), FftErrorKind::InvalidDescriptor);
    assert!(err.kind().is_recoverable());
}

#[test]
fn e2e_traces_record_successful_executions() {
    let runtime = Runtime::initialized(RuntimeConfig::default().with_trace_capacity(2))
        .expect("setup");
    let device = Arc::new(HostDevice::new());
    let planner = Planner::new(
        runtime.clone(),
        PlannerOptions::default().with_cache(PlanCacheConfig::default()),
    );
    let forward = planner.compile(&TransformDescriptor::new([64])).expect("forward");
    let inverse = planner
        .compile(&TransformDescriptor::new([64]).with_direction(Direction::Inverse))
        .expect("inverse");
    let x = device.allocate(512).expect("x");
    let y = device.allocate(512).expect("y");
    let mut ctx = ExecutionContext::new(&runtime)
        .expect("ctx")
        .with_queue(QueueId(4));
    ctx.allocate_scratch(device.clone(), &[&forward, &inverse])
        .expect("scratch");

    for plan in [&forward, &inverse, &forward] {
        execute(&runtime, plan, &mut ctx, device.as_ref(), &[x], &[y]).expect("execute");
    }
    assert_eq!(device.launches_on(QueueId(4)), 3);
    assert_eq!(device.launches_on(QueueId::DEFAULT), 0);

    let traces = ctx.traces();
    assert_eq!(traces.len(), 2);
    assert_eq!(traces.evicted(), 1);
    let latest = traces.latest().expect("latest");
    assert_eq!(latest.direction, Direction::Forward);
    assert_eq!(latest.queue, QueueId(4));
    assert_eq!(latest.scratch_bytes, forward.scratch_requirement());
    assert_eq!(latest.plan_digest, forward.digest());

    let lines = traces.to_jsonl();
    let parsed: Vec<TransformTrace> = lines
        .lines()
        .map(|line| serde_json::from_str(line).expect("trace line"))
        .collect();
    assert_eq!(parsed[0].direction, Direction::Inverse);
    assert!(parsed[0].plan_cache_hit);
    assert_ne!(parsed[0].operation_id, parsed[1].operation_id);

    let drained = ctx.take_traces();
    assert_eq!(drained.len(), 2);
    assert!(ctx.traces().is_empty());
}

#[test]
fn e2e_one_plan_runs_concurrently_through_two_contexts() {
    let runtime = Runtime::initialized(RuntimeConfig::default()).expect("setup");
    let device = Arc::new(HostDevice::new());
    let plan = compile(
        &runtime,
        &TransformDescriptor::new([48, 9]).with_precision(Precision::Double),
    )
    .expect("plan");
    let n = 48 * 9;
    let required = plan.scratch_requirement();
    // one scratch allocation split into two disjoint per-context regions
    let scratch = device.allocate(2 * required).expect("scratch");
    let regions = [
        scratch.slice(0, required).expect("low"),
        scratch.slice(required, required).expect("high"),
    ];

    let signals: Vec<Vec<(f64, f64)>> = (0..2)
        .map(|k| {
            (0..n)
                .map(|i| (((i + k * 7) % 13) as f64, (i % 5) as f64 - 2.0))
                .collect()
        })
        .collect();

    let results: Vec<Vec<(f64, f64)>> = thread::scope(|scope| {
        let handles: Vec<_> = regions
            .iter()
            .zip(&signals)
            .enumerate()
            .map(|(k, (&region, signal))| {
                let runtime = &runtime;
                let plan = &plan;
                let device = device.as_ref();
                scope.spawn(move || {
                    let x = device.allocate(n * 16).expect("x");
                    let y = device.allocate(n * 16).expect("y");
                    upload(device, &x, signal).expect("upload");
                    let mut ctx = ExecutionContext::new(runtime)
                        .expect("ctx")
                        .with_queue(QueueId(k as u32 + 1));
                    ctx.bind_scratch(region, required, &[plan]).expect("bind");
                    for _ in 0..4 {
                        execute(runtime, plan, &mut ctx, device, &[x], &[y]).expect("execute");
                    }
                    synchronize(device, &ctx).expect("sync");
                    download::<f64>(device, &y, n).expect("download")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("worker"))
            .collect()
    });

    // each result must match a sequential run on a fresh context
    for (signal, concurrent) in signals.iter().zip(&results) {
        let x = device.allocate(n * 16).expect("x");
        let y = device.allocate(n * 16).expect("y");
        upload(device.as_ref(), &x, signal).expect("upload");
        let mut ctx = ExecutionContext::new(&runtime).expect("ctx");
        ctx.allocate_scratch(device.clone(), &[&plan]).expect("scratch");
        execute(&runtime, &plan, &mut ctx, device.as_ref(), &[x], &[y]).expect("execute");
        let sequential: Vec<(f64, f64)> = download(device.as_ref(), &y, n).expect("download");
        assert_eq!(&sequential, concurrent);
    }
    assert_eq!(runtime.live_contexts(), 0);
}

#[test]
fn e2e_runtime_error_converts_into_engine_error() {
    let err: FftError = RuntimeError::AlreadyInitialized.into();
    assert_eq!(err.kind(), FftErrorKind::AlreadyInitialized);
}

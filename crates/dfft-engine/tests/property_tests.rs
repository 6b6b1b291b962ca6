//! Property tests for the plan/execute contract.
//!
//! Convention: test_{area}_{property}
//!
//! Seed replay: `PROPTEST_CASES=1000 cargo test -p dfft-engine --test property_tests`
//! Reproduce: `PROPTEST_SEED=<seed> cargo test -p dfft-engine --test property_tests`

use std::sync::Arc;

use dfft_engine::{
    Complex64, DeviceMemory, Direction, ExecutionContext, FftErrorKind, HostDevice, Placement,
    Precision, TransformDescriptor, compile, download, execute, get_scratch_requirement, upload,
};
use dfft_runtime::{Runtime, RuntimeConfig, RuntimeMode, TestLogEntry, TestResult, max_abs_error};
use proptest::prelude::*;

fn setup() -> (Runtime, Arc<HostDevice>) {
    (
        Runtime::initialized(RuntimeConfig::default()).expect("setup"),
        Arc::new(HostDevice::new()),
    )
}

/// Deterministic signal in [-1, 1]² from a seed.
fn seeded_signal(len: usize, seed: u64) -> Vec<(f32, f32)> {
    let mut state = seed | 1;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
    };
    (0..len)
        .map(|_| (next() as f32, next() as f32))
        .collect()
}

fn widen(values: &[(f32, f32)]) -> Vec<Complex64> {
    values
        .iter()
        .map(|&(re, im)| (f64::from(re), f64::from(im)))
        .collect()
}

/// 1 to 3 axes of length 1..=20 (primes included), at most 800 elements.
fn shapes() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..=20, 1..=3)
        .prop_filter("keep transforms small", |dims| {
            dims.iter().product::<usize>() <= 800
        })
}

// ═══════════════════════════════════════════════════════════════
// Property 1: forward then inverse, scaled by 1/N, reproduces the input
// ═══════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_roundtrip_single_precision(
        dims in shapes(),
        batch in 1usize..=3,
        seed in any::<u64>(),
        in_place in any::<bool>(),
    ) {
        let (runtime, device) = setup();
        let placement = if in_place { Placement::InPlace } else { Placement::OutOfPlace };
        let forward_desc = TransformDescriptor::new(dims.clone())
            .with_number_of_transforms(batch)
            .with_placement(placement);
        let forward = compile(&runtime, &forward_desc).expect("forward");
        let inverse = compile(&runtime, &forward_desc.clone().with_direction(Direction::Inverse))
            .expect("inverse");

        let n: usize = dims.iter().product();
        let total = n * batch;
        let signal = seeded_signal(total, seed);
        let x = device.allocate(total * 8).expect("x");
        let y = if in_place { x } else { device.allocate(total * 8).expect("y") };
        let z = if in_place { x } else { device.allocate(total * 8).expect("z") };
        upload(device.as_ref(), &x, &signal).expect("upload");

        let mut ctx = ExecutionContext::new(&runtime).expect("ctx");
        ctx.allocate_scratch(device.clone(), &[&forward, &inverse]).expect("scratch");
        execute(&runtime, &forward, &mut ctx, device.as_ref(), &[x], &[y]).expect("forward");
        execute(&runtime, &inverse, &mut ctx, device.as_ref(), &[y], &[z]).expect("inverse");

        let back: Vec<(f32, f32)> = download(device.as_ref(), &z, total).expect("download");
        let scale = 1.0 / n as f64;
        let back: Vec<Complex64> = widen(&back)
            .into_iter()
            .map(|(re, im)| (re * scale, im * scale))
            .collect();
        let err = max_abs_error(&back, &widen(&signal));
        prop_assert!(err < 1e-5, "dims={dims:?} batch={batch}: round-trip error {err}");
    }
}

// ═══════════════════════════════════════════════════════════════
// Property 2: identical descriptors compile to identical plans
// ═══════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn test_compile_is_deterministic(
        dims in shapes(),
        batch in 1usize..=8,
        precision in prop_oneof![Just(Precision::Single), Just(Precision::Double)],
    ) {
        let (runtime, _) = setup();
        let desc = TransformDescriptor::new(dims)
            .with_number_of_transforms(batch)
            .with_precision(precision);
        let a = compile(&runtime, &desc).expect("first");
        let b = compile(&runtime, &desc).expect("second");
        prop_assert_eq!(get_scratch_requirement(&a), get_scratch_requirement(&b));
        prop_assert_eq!(a.digest(), b.digest());
        prop_assert_eq!(a.fingerprint(), b.fingerprint());
    }
}

// ═══════════════════════════════════════════════════════════════
// Property 3: exactly the required scratch never overruns
// ═══════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_scratch_requirement_is_sufficient(
        dims in shapes(),
        batch in 1usize..=3,
        precision in prop_oneof![Just(Precision::Single), Just(Precision::Double)],
    ) {
        let (runtime, device) = setup();
        let desc = TransformDescriptor::new(dims.clone())
            .with_number_of_transforms(batch)
            .with_precision(precision);
        let plan = compile(&runtime, &desc).expect("compile");
        let required = plan.scratch_requirement();
        let bytes = dims.iter().product::<usize>() * batch * precision.complex_bytes();
        let x = device.allocate(bytes).expect("x");
        let y = device.allocate(bytes).expect("y");

        let mut ctx = ExecutionContext::new(&runtime).expect("ctx");
        if required > 0 {
            let scratch = device.allocate(required).expect("scratch");
            let err = ctx.bind_scratch(scratch, required - 1, &[&plan]).expect_err("short");
            prop_assert_eq!(err.kind(), FftErrorKind::InsufficientScratch);
            ctx.bind_scratch(scratch, required, &[&plan]).expect("exact");
        }
        let result = execute(&runtime, &plan, &mut ctx, device.as_ref(), &[x], &[y]);
        prop_assert!(result.is_ok(), "dims={dims:?}: {result:?}");
    }
}

// ═══════════════════════════════════════════════════════════════
// Property 4: in-place requires aliasing; out-of-place forbids it
// ═══════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_aliasing_contract(dims in shapes(), seed in any::<u64>()) {
        let (runtime, device) = setup();
        let n: usize = dims.iter().product();
        let in_place = compile(
            &runtime,
            &TransformDescriptor::new(dims.clone()).with_placement(Placement::InPlace),
        )
        .expect("in-place");
        let out_of_place = compile(&runtime, &TransformDescriptor::new(dims.clone()))
            .expect("out-of-place");

        let signal = seeded_signal(n, seed);
        let a = device.allocate(n * 8).expect("a");
        let b = device.allocate(n * 8).expect("b");
        let c = device.allocate(n * 8).expect("c");
        upload(device.as_ref(), &a, &signal).expect("upload a");
        upload(device.as_ref(), &b, &signal).expect("upload b");

        let mut ctx = ExecutionContext::new(&runtime).expect("ctx");
        ctx.allocate_scratch(device.clone(), &[&in_place, &out_of_place]).expect("scratch");

        let err = execute(&runtime, &in_place, &mut ctx, device.as_ref(), &[a], &[c])
            .expect_err("distinct buffers");
        prop_assert_eq!(err.kind(), FftErrorKind::InvalidBufferAlias);
        let err = execute(&runtime, &out_of_place, &mut ctx, device.as_ref(), &[a], &[a])
            .expect_err("aliased buffers");
        prop_assert_eq!(err.kind(), FftErrorKind::InvalidBufferAlias);

        // rejected calls leave the data untouched
        let untouched: Vec<(f32, f32)> = download(device.as_ref(), &a, n).expect("a");
        prop_assert_eq!(&untouched, &signal);

        execute(&runtime, &in_place, &mut ctx, device.as_ref(), &[a], &[a]).expect("in-place");
        execute(&runtime, &out_of_place, &mut ctx, device.as_ref(), &[b], &[c])
            .expect("out-of-place");
        let overwritten: Vec<(f32, f32)> = download(device.as_ref(), &a, n).expect("a");
        let expected: Vec<(f32, f32)> = download(device.as_ref(), &c, n).expect("c");
        prop_assert_eq!(&overwritten, &expected);
        let input: Vec<(f32, f32)> = download(device.as_ref(), &b, n).expect("b");
        prop_assert_eq!(&input, &signal);
    }
}

#[test]
fn test_property_structured_log_convention() {
    let entry = TestLogEntry::new(
        "test_roundtrip_single_precision",
        "dfft_engine",
        "property test: round-trip verified over 48 shapes",
    )
    .with_result(TestResult::Pass)
    .with_mode(RuntimeMode::Strict);

    let json = entry.to_json_line();
    let parsed: serde_json::Value =
        serde_json::from_str(&json).expect("structured log must be valid JSON");
    assert!(parsed["test_id"].is_string());
    assert!(parsed["timestamp_ms"].is_number());
    assert_eq!(parsed["level"], "info");
    assert_eq!(parsed["module"], "dfft_engine");
}

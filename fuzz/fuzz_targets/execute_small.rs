#![no_main]

use arbitrary::Arbitrary;
use dfft_engine::{
    DeviceMemory, Direction, ExecutionContext, HostDevice, TransformDescriptor, compile, download,
    execute, upload,
};
use dfft_runtime::{Runtime, RuntimeConfig, RuntimeMode};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct ExecuteInput {
    dims: Vec<u8>,
    batch: u8,
    hardened: bool,
    samples: Vec<(f64, f64)>,
}

fuzz_target!(|input: ExecuteInput| {
    let dims: Vec<usize> = input
        .dims
        .iter()
        .take(3)
        .map(|&d| usize::from(d % 24) + 1)
        .collect();
    if dims.is_empty() {
        return;
    }
    let batch = usize::from(input.batch % 4) + 1;
    let total = dims.iter().product::<usize>() * batch;
    if total > 4096 {
        return;
    }
    let mode = if input.hardened {
        RuntimeMode::Hardened
    } else {
        RuntimeMode::Strict
    };
    let Ok(runtime) = Runtime::initialized(RuntimeConfig::default().with_mode(mode)) else {
        return;
    };
    let device = HostDevice::new();
    let desc = TransformDescriptor::new(dims.clone())
        .with_number_of_transforms(batch)
        .with_direction(Direction::Forward);
    let Ok(plan) = compile(&runtime, &desc) else {
        return;
    };

    let signal: Vec<(f64, f64)> = (0..total)
        .map(|i| input.samples.get(i).copied().unwrap_or((0.0, 0.0)))
        .collect();
    let typed: Vec<(f32, f32)> = signal
        .iter()
        .map(|&(re, im)| (re as f32, im as f32))
        .collect();
    let x = device.allocate(total * 8).expect("x");
    let y = device.allocate(total * 8).expect("y");
    upload(&device, &x, &typed).expect("upload");
    let mut ctx = ExecutionContext::new(&runtime).expect("ctx");
    if plan.scratch_requirement() > 0 {
        let scratch = device.allocate(plan.scratch_requirement()).expect("scratch");
        ctx.bind_scratch(scratch, scratch.len(), &[&plan]).expect("bind");
    }

    let result = execute(&runtime, &plan, &mut ctx, &device, &[x], &[y]);
    let has_non_finite = typed
        .iter()
        .any(|(re, im)| !re.is_finite() || !im.is_finite());
    if mode == RuntimeMode::Hardened && has_non_finite {
        assert!(result.is_err());
    } else {
        assert!(result.is_ok(), "{result:?}");
        let _: Vec<(f32, f32)> = download(&device, &y, total).expect("download");
    }
});

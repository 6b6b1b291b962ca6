#![no_main]

use arbitrary::Arbitrary;
use dfft_engine::{
    BufferLayout, Direction, Placement, Planner, PlannerOptions, Precision, TransformDescriptor,
};
use dfft_runtime::{Runtime, RuntimeConfig};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct LayoutInput {
    planar: bool,
    strides: Option<Vec<u16>>,
    distance: Option<u16>,
    offset: u8,
}

#[derive(Debug, Arbitrary)]
struct CompileInput {
    dims: Vec<u16>,
    batch: u16,
    precision: u8,
    inverse: bool,
    in_place: bool,
    allow_bluestein: bool,
    max_length: u32,
    input: LayoutInput,
    output: LayoutInput,
}

fn build_layout(input: &LayoutInput) -> BufferLayout {
    let mut layout = if input.planar {
        BufferLayout::planar()
    } else {
        BufferLayout::default()
    };
    if let Some(strides) = &input.strides {
        layout = layout.with_strides(strides.iter().map(|&s| usize::from(s)).collect::<Vec<_>>());
    }
    if let Some(distance) = input.distance {
        layout = layout.with_distance(usize::from(distance));
    }
    layout.with_offset(usize::from(input.offset))
}

fuzz_target!(|input: CompileInput| {
    let runtime = match Runtime::initialized(RuntimeConfig::default()) {
        Ok(runtime) => runtime,
        Err(_) => return,
    };
    let precision = match input.precision % 3 {
        0 => Precision::Half,
        1 => Precision::Single,
        _ => Precision::Double,
    };
    let desc = TransformDescriptor::new(
        input
            .dims
            .iter()
            .take(4)
            .map(|&d| usize::from(d))
            .collect::<Vec<_>>(),
    )
    .with_number_of_transforms(usize::from(input.batch))
    .with_precision(precision)
    .with_direction(if input.inverse {
        Direction::Inverse
    } else {
        Direction::Forward
    })
    .with_placement(if input.in_place {
        Placement::InPlace
    } else {
        Placement::OutOfPlace
    })
    .with_input_layout(build_layout(&input.input))
    .with_output_layout(build_layout(&input.output));

    let planner = Planner::new(
        runtime.clone(),
        PlannerOptions::default()
            .with_bluestein(input.allow_bluestein)
            .with_max_length((input.max_length as usize).min(1 << 16)),
    );
    if let Ok(plan) = planner.compile(&desc) {
        let again = planner.compile(&desc).expect("recompile of an accepted descriptor");
        assert_eq!(plan.scratch_requirement(), again.scratch_requirement());
        assert_eq!(plan.digest(), again.digest());
    }
    assert_eq!(runtime.live_plans(), 0);
});

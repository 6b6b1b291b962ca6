//! The executor: validate an execution request and enqueue its kernels.
//!
//! Every condition that can be checked on the host is checked here, before
//! the device sees the launch. Nothing is retried internally.

use std::time::Instant;

use dfft_runtime::Runtime;
use tracing::{debug, warn};

use crate::context::{ExecutionContext, ensure_sufficient};
use crate::descriptor::{Placement, ResolvedLayout};
use crate::device::{Device, DeviceBuffer, KernelLaunch};
use crate::error::{FftError, FftResult};
use crate::plan::Plan;
use crate::trace::{TransformTrace, next_operation_id};

/// Run `plan` over `input`, writing `output`.
///
/// For in-place plans every output handle must name exactly the same region
/// as the matching input handle. The call returns once the kernels are
/// enqueued on the context's queue; use [`synchronize`] before reading the
/// output on the host.
pub fn execute(
    runtime: &Runtime,
    plan: &Plan,
    context: &mut ExecutionContext,
    device: &dyn Device,
    input: &[DeviceBuffer],
    output: &[DeviceBuffer],
) -> FftResult<()> {
    let started = Instant::now();
    let result = validate(runtime, plan, context, input, output).and_then(|()| {
        let descriptor = plan.descriptor();
        let launch = KernelLaunch {
            queue: context.queue(),
            precision: descriptor.precision(),
            direction: descriptor.direction(),
            dimensions: descriptor.dimensions(),
            number_of_transforms: descriptor.number_of_transforms(),
            axes: plan.axes(),
            input_layout: plan.input_layout(),
            output_layout: plan.output_layout(),
            input,
            output,
            scratch: context.scratch_buffer(),
            scratch_layout: plan.scratch_layout(),
            check_finite: runtime.mode().checks_finite(),
        };
        device.launch(&launch).map_err(FftError::from)
    });

    if let Err(err) = &result {
        warn!(%err, kind = ?err.kind(), digest = plan.digest(), "execution rejected");
        return result;
    }

    let descriptor = plan.descriptor();
    let trace = TransformTrace {
        operation_id: next_operation_id(),
        plan_digest: plan.digest().to_owned(),
        direction: descriptor.direction(),
        precision: descriptor.precision(),
        placement: descriptor.placement(),
        dimensions: descriptor.dimensions().to_vec(),
        number_of_transforms: descriptor.number_of_transforms(),
        queue: context.queue(),
        scratch_bytes: plan.scratch_requirement(),
        plan_cache_hit: plan.cache_hit(),
        mode: runtime.mode(),
        timing_ns: started.elapsed().as_nanos(),
    };
    debug!(
        operation_id = %trace.operation_id,
        digest = %trace.plan_digest,
        queue = trace.queue.0,
        "transform enqueued"
    );
    context.record(trace);
    Ok(())
}

/// Block until everything enqueued on `context`'s queue has completed.
pub fn synchronize(device: &dyn Device, context: &ExecutionContext) -> FftResult<()> {
    device.synchronize(context.queue()).map_err(FftError::from)
}

fn validate(
    runtime: &Runtime,
    plan: &Plan,
    context: &ExecutionContext,
    input: &[DeviceBuffer],
    output: &[DeviceBuffer],
) -> FftResult<()> {
    runtime.ensure_initialized()?;
    if !plan.belongs_to(runtime) {
        return Err(FftError::RuntimeMismatch { resource: "plan" });
    }
    if !context.belongs_to(runtime) {
        return Err(FftError::RuntimeMismatch {
            resource: "execution context",
        });
    }

    let scratch = context.scratch_buffer();
    ensure_sufficient(context.scratch_bytes(), &[plan])?;

    let descriptor = plan.descriptor();
    check_buffers("input", input, plan.input_layout(), plan)?;
    check_buffers("output", output, plan.output_layout(), plan)?;

    match descriptor.placement() {
        Placement::InPlace => {
            if let Some(idx) = input
                .iter()
                .zip(output)
                .position(|(i, o)| !i.same_region(o))
            {
                return Err(FftError::alias(format!(
                    "in-place plan given distinct input and output regions at buffer {idx}"
                )));
            }
        }
        Placement::OutOfPlace => {
            if input.iter().any(|i| output.iter().any(|o| i.overlaps(o))) {
                return Err(FftError::alias(
                    "out-of-place plan given overlapping input and output buffers",
                ));
            }
        }
    }

    // planar halves of one side must not overlap each other either
    for side in [input, output] {
        if side.len() == 2 && side[0].overlaps(&side[1]) {
            return Err(FftError::alias(
                "planar real and imaginary buffers overlap",
            ));
        }
    }

    if let Some(scratch) = scratch.filter(|_| plan.scratch_requirement() > 0)
        && input.iter().chain(output).any(|b| b.overlaps(&scratch))
    {
        return Err(FftError::alias(
            "scratch buffer overlaps an input or output buffer",
        ));
    }
    Ok(())
}

fn check_buffers(
    role: &str,
    buffers: &[DeviceBuffer],
    layout: &ResolvedLayout,
    plan: &Plan,
) -> FftResult<()> {
    let expected = layout.array_type.buffer_count();
    if buffers.len() != expected {
        return Err(FftError::invalid_buffer(format!(
            "{role}: {:?} layout needs {expected} buffer(s), got {}",
            layout.array_type,
            buffers.len()
        )));
    }
    let descriptor = plan.descriptor();
    let required = layout.extent_bytes(
        descriptor.dimensions(),
        descriptor.number_of_transforms(),
        descriptor.precision(),
    )?;
    if let Some((idx, buffer)) = buffers
        .iter()
        .enumerate()
        .find(|(_, buffer)| buffer.len() < required)
    {
        return Err(FftError::invalid_buffer(format!(
            "{role} buffer {idx} holds {} bytes, layout needs {required}",
            buffer.len()
        )));
    }
    Ok(())
}

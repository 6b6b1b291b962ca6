//! Reference kernel chain.
//!
//! A launch gathers the input through its layout, runs one Stockham pass per
//! radix (or one Bluestein convolution) per axis, and scatters through the
//! output layout. Between passes the whole batch is staged through the
//! scratch buffer at the plan's precision, as a device chain ping-pongs.

use std::f64::consts::PI;

use super::Arena;
use crate::Complex64;
use crate::decompose::{AxisAlgorithm, AxisPlan};
use crate::descriptor::{ArrayType, ResolvedLayout};
use crate::device::{DeviceBuffer, KernelLaunch};
use crate::error::DeviceError;
use crate::precision::Precision;

pub(crate) fn run(arena: &mut Arena, launch: &KernelLaunch<'_>) -> Result<(), DeviceError> {
    let mut data = gather(arena, launch)?;
    if launch.check_finite
        && let Some(index) = data
            .iter()
            .position(|(re, im)| !re.is_finite() || !im.is_finite())
    {
        return Err(DeviceError::NonFinite { index });
    }

    let sign = launch.direction.sign();
    let total_passes: usize = launch.axes.iter().map(AxisPlan::passes).sum();
    let mut completed = 0usize;
    for axis in launch.axes {
        match &axis.algorithm {
            AxisAlgorithm::Identity => {}
            AxisAlgorithm::Stockham { radices } => {
                let mut span = 1;
                for &radix in radices {
                    map_lines(&mut data, launch, axis.axis, |_, line| {
                        Ok(stockham_pass(line, span, radix, sign))
                    })?;
                    span *= radix;
                    completed += 1;
                    if completed < total_passes {
                        stage(arena, launch, &mut data)?;
                    }
                }
            }
            AxisAlgorithm::Bluestein {
                padded_length,
                radices,
            } => {
                bluestein(arena, launch, axis, *padded_length, radices, &mut data)?;
                completed += 1;
                if completed < total_passes {
                    stage(arena, launch, &mut data)?;
                }
            }
        }
    }
    scatter(arena, launch, &data)
}

/// One radix-`radix` Stockham autosort pass over a line.
///
/// `span` is the product of the radices already applied; after the last
/// pass the line holds the transform in natural order.
fn stockham_pass(src: &[Complex64], span: usize, radix: usize, sign: f64) -> Vec<Complex64> {
    let n = src.len();
    let stride = n / radix;
    let mut dst = vec![(0.0, 0.0); n];
    let mut v = vec![(0.0, 0.0); radix];
    for j in 0..stride {
        let k = j % span;
        for (r, slot) in v.iter_mut().enumerate() {
            *slot = complex_mul(src[j + r * stride], twiddle(sign, k * r, span * radix));
        }
        let base = (j / span) * span * radix + k;
        for q in 0..radix {
            let mut acc = (0.0, 0.0);
            for (r, &value) in v.iter().enumerate() {
                acc = complex_add(acc, complex_mul(value, twiddle(sign, (r * q) % radix, radix)));
            }
            dst[base + q * span] = acc;
        }
    }
    dst
}

fn stockham(line: &[Complex64], radices: &[usize], sign: f64) -> Vec<Complex64> {
    let mut span = 1;
    let mut data = line.to_vec();
    for &radix in radices {
        data = stockham_pass(&data, span, radix, sign);
        span *= radix;
    }
    data
}

/// Chirp-z transform of every line along `axis`.
///
/// The chirped, zero-padded lines and the filter spectrum live in the
/// Bluestein area of the scratch buffer.
fn bluestein(
    arena: &mut Arena,
    launch: &KernelLaunch<'_>,
    axis: &AxisPlan,
    padded: usize,
    radices: &[usize],
    data: &mut [Complex64],
) -> Result<(), DeviceError> {
    let n = axis.length;
    let sign = launch.direction.sign();
    let precision = launch.precision;
    // exp(sign·iπ·k²/N); k² is reduced mod 2N to keep the angle small
    let chirp: Vec<Complex64> = (0..n)
        .map(|k| {
            let phase = ((k as u64 * k as u64) % (2 * n as u64)) as f64;
            let angle = sign * PI * phase / n as f64;
            (angle.cos(), angle.sin())
        })
        .collect();

    let mut filter = vec![(0.0, 0.0); padded];
    filter[0] = complex_conj(chirp[0]);
    for m in 1..n {
        filter[m] = complex_conj(chirp[m]);
        filter[padded - m] = complex_conj(chirp[m]);
    }
    let filter = stockham(&filter, radices, -1.0);

    let line_bytes = padded * precision.complex_bytes();
    let region = scratch_window(
        launch,
        launch.scratch_layout.bluestein_offset(),
        launch.scratch_layout.bluestein_bytes,
    )?;
    let filter_at = axis.lines * line_bytes;
    write_complex(arena, &region, filter_at, &filter, precision)?;
    let filter = read_complex(arena, &region, filter_at, padded, precision)?;

    let scale = 1.0 / padded as f64;
    map_lines(data, launch, axis.axis, |line_index, line| {
        let mut chirped = vec![(0.0, 0.0); padded];
        for (slot, (&x, &w)) in chirped.iter_mut().zip(line.iter().zip(&chirp)) {
            *slot = complex_mul(x, w);
        }
        let at = line_index * line_bytes;
        write_complex(arena, &region, at, &chirped, precision)?;
        let staged = read_complex(arena, &region, at, padded, precision)?;

        let spectrum: Vec<Complex64> = stockham(&staged, radices, -1.0)
            .into_iter()
            .zip(&filter)
            .map(|(a, &b)| complex_mul(a, b))
            .collect();
        let convolved = stockham(&spectrum, radices, 1.0);
        Ok(chirp
            .iter()
            .zip(&convolved)
            .map(|(&w, &c)| complex_mul(complex_scale(c, scale), w))
            .collect())
    })
}

/// Apply `transform` to every 1D line along `axis` of the batch.
///
/// Lines are numbered in row-major order of the remaining axes, batch first.
fn map_lines(
    data: &mut [Complex64],
    launch: &KernelLaunch<'_>,
    axis: usize,
    mut transform: impl FnMut(usize, &[Complex64]) -> Result<Vec<Complex64>, DeviceError>,
) -> Result<(), DeviceError> {
    let dims = launch.dimensions;
    let axis_len = dims[axis];
    let stride = dims[axis + 1..].iter().product::<usize>().max(1);
    let repeats =
        launch.number_of_transforms * dims[..axis].iter().product::<usize>().max(1);
    let block = axis_len * stride;

    let mut line = vec![(0.0, 0.0); axis_len];
    let mut line_index = 0;
    for outer in 0..repeats {
        let outer_base = outer * block;
        for offset in 0..stride {
            for (index, slot) in line.iter_mut().enumerate() {
                *slot = data[outer_base + index * stride + offset];
            }
            let transformed = transform(line_index, &line)?;
            for (index, &value) in transformed.iter().enumerate() {
                data[outer_base + index * stride + offset] = value;
            }
            line_index += 1;
        }
    }
    Ok(())
}

/// Round-trip the whole batch through the staging area at plan precision.
fn stage(
    arena: &mut Arena,
    launch: &KernelLaunch<'_>,
    data: &mut [Complex64],
) -> Result<(), DeviceError> {
    let staging = scratch_window(launch, 0, launch.scratch_layout.staging_bytes)?;
    write_complex(arena, &staging, 0, data, launch.precision)?;
    let staged = read_complex(arena, &staging, 0, data.len(), launch.precision)?;
    data.copy_from_slice(&staged);
    Ok(())
}

fn scratch_window(
    launch: &KernelLaunch<'_>,
    offset: usize,
    len: usize,
) -> Result<DeviceBuffer, DeviceError> {
    let scratch = launch.scratch.ok_or_else(|| DeviceError::LaunchFailed {
        detail: format!("kernel chain needs {len} scratch bytes but none are bound"),
    })?;
    scratch
        .slice(offset, len)
        .ok_or(DeviceError::OutOfBounds {
            id: scratch.id(),
            offset: scratch.offset() + offset,
            len,
            capacity: scratch.len(),
        })
}

fn write_complex(
    arena: &mut Arena,
    buffer: &DeviceBuffer,
    at: usize,
    values: &[Complex64],
    precision: Precision,
) -> Result<(), DeviceError> {
    let component = precision.component_bytes();
    let mut bytes = vec![0u8; values.len() * 2 * component];
    for (chunk, &(re, im)) in bytes.chunks_exact_mut(2 * component).zip(values) {
        precision.encode(re, &mut chunk[..component]);
        precision.encode(im, &mut chunk[component..]);
    }
    arena.write(buffer, at, &bytes)
}

fn read_complex(
    arena: &Arena,
    buffer: &DeviceBuffer,
    at: usize,
    count: usize,
    precision: Precision,
) -> Result<Vec<Complex64>, DeviceError> {
    let component = precision.component_bytes();
    let mut bytes = vec![0u8; count * 2 * component];
    arena.read(buffer, at, &mut bytes)?;
    Ok(bytes
        .chunks_exact(2 * component)
        .map(|chunk| {
            (
                precision.decode(&chunk[..component]),
                precision.decode(&chunk[component..]),
            )
        })
        .collect())
}

/// Buffer index and byte offset of the real and imaginary parts of `element`.
fn component_slots(
    layout: &ResolvedLayout,
    element: usize,
    precision: Precision,
) -> [(usize, usize); 2] {
    let component = precision.component_bytes();
    match layout.array_type {
        ArrayType::ComplexInterleaved => {
            let at = element * 2 * component;
            [(0, at), (0, at + component)]
        }
        ArrayType::ComplexPlanar => {
            let at = element * component;
            [(0, at), (1, at)]
        }
    }
}

fn gather(arena: &Arena, launch: &KernelLaunch<'_>) -> Result<Vec<Complex64>, DeviceError> {
    let dims = launch.dimensions;
    let per_transform: usize = dims.iter().product();
    let precision = launch.precision;
    let layout = launch.input_layout;
    let mut raw = vec![0u8; precision.component_bytes()];
    let mut data = Vec::with_capacity(per_transform * launch.number_of_transforms);
    for batch in 0..launch.number_of_transforms {
        for linear in 0..per_transform {
            let element = layout.element_index(dims, batch, linear);
            let mut parts = [0.0f64; 2];
            for (part, (buffer, at)) in parts
                .iter_mut()
                .zip(component_slots(layout, element, precision))
            {
                arena.read(buffer_at(launch.input, buffer)?, at, &mut raw)?;
                *part = precision.decode(&raw);
            }
            data.push((parts[0], parts[1]));
        }
    }
    Ok(data)
}

fn scatter(
    arena: &mut Arena,
    launch: &KernelLaunch<'_>,
    data: &[Complex64],
) -> Result<(), DeviceError> {
    let dims = launch.dimensions;
    let per_transform: usize = dims.iter().product();
    let precision = launch.precision;
    let layout = launch.output_layout;
    let mut raw = vec![0u8; precision.component_bytes()];
    for (position, &(re, im)) in data.iter().enumerate() {
        let element = layout.element_index(dims, position / per_transform, position % per_transform);
        for (value, (buffer, at)) in [re, im]
            .into_iter()
            .zip(component_slots(layout, element, precision))
        {
            precision.encode(value, &mut raw);
            arena.write(buffer_at(launch.output, buffer)?, at, &raw)?;
        }
    }
    Ok(())
}

fn buffer_at(buffers: &[DeviceBuffer], index: usize) -> Result<&DeviceBuffer, DeviceError> {
    buffers.get(index).ok_or_else(|| DeviceError::LaunchFailed {
        detail: format!("launch carries {} buffer(s), layout needs buffer {index}", buffers.len()),
    })
}

fn twiddle(sign: f64, numerator: usize, denominator: usize) -> Complex64 {
    let angle = sign * 2.0 * PI * numerator as f64 / denominator as f64;
    (angle.cos(), angle.sin())
}

fn complex_add(lhs: Complex64, rhs: Complex64) -> Complex64 {
    (lhs.0 + rhs.0, lhs.1 + rhs.1)
}

fn complex_mul(lhs: Complex64, rhs: Complex64) -> Complex64 {
    (lhs.0 * rhs.0 - lhs.1 * rhs.1, lhs.0 * rhs.1 + lhs.1 * rhs.0)
}

fn complex_scale(value: Complex64, scale: f64) -> Complex64 {
    (value.0 * scale, value.1 * scale)
}

fn complex_conj(value: Complex64) -> Complex64 {
    (value.0, -value.1)
}

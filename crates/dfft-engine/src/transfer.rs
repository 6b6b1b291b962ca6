//! Typed host/device copies for complex samples.
//!
//! The engine never moves input or output data itself; these helpers are
//! caller conveniences layered on [`DeviceMemory`].

use crate::device::{DeviceBuffer, DeviceMemory};
use crate::error::{FftError, FftResult};
use crate::precision::DeviceScalar;

/// Write `values` as interleaved `(re, im)` pairs to the start of `buffer`.
pub fn upload<T: DeviceScalar>(
    memory: &dyn DeviceMemory,
    buffer: &DeviceBuffer,
    values: &[(T, T)],
) -> FftResult<()> {
    let component = T::PRECISION.component_bytes();
    let mut bytes = vec![0u8; values.len() * 2 * component];
    for (chunk, &(re, im)) in bytes.chunks_exact_mut(2 * component).zip(values) {
        T::PRECISION.encode(re.to_f64(), &mut chunk[..component]);
        T::PRECISION.encode(im.to_f64(), &mut chunk[component..]);
    }
    memory.copy_to_device(&leading(buffer, bytes.len())?, &bytes)?;
    Ok(())
}

/// Read `count` interleaved pairs from the start of `buffer`.
pub fn download<T: DeviceScalar>(
    memory: &dyn DeviceMemory,
    buffer: &DeviceBuffer,
    count: usize,
) -> FftResult<Vec<(T, T)>> {
    let component = T::PRECISION.component_bytes();
    let mut bytes = vec![0u8; count * 2 * component];
    let src = leading(buffer, bytes.len())?;
    memory.copy_to_host(&mut bytes, &src)?;
    Ok(bytes
        .chunks_exact(2 * component)
        .map(|chunk| {
            (
                T::from_f64(T::PRECISION.decode(&chunk[..component])),
                T::from_f64(T::PRECISION.decode(&chunk[component..])),
            )
        })
        .collect())
}

/// Split `values` into a real buffer and an imaginary buffer.
pub fn upload_planar<T: DeviceScalar>(
    memory: &dyn DeviceMemory,
    real: &DeviceBuffer,
    imag: &DeviceBuffer,
    values: &[(T, T)],
) -> FftResult<()> {
    let component = T::PRECISION.component_bytes();
    let mut re_bytes = vec![0u8; values.len() * component];
    let mut im_bytes = vec![0u8; values.len() * component];
    for ((re_chunk, im_chunk), &(re, im)) in re_bytes
        .chunks_exact_mut(component)
        .zip(im_bytes.chunks_exact_mut(component))
        .zip(values)
    {
        T::PRECISION.encode(re.to_f64(), re_chunk);
        T::PRECISION.encode(im.to_f64(), im_chunk);
    }
    memory.copy_to_device(&leading(real, re_bytes.len())?, &re_bytes)?;
    memory.copy_to_device(&leading(imag, im_bytes.len())?, &im_bytes)?;
    Ok(())
}

/// Read `count` samples back from a real buffer and an imaginary buffer.
pub fn download_planar<T: DeviceScalar>(
    memory: &dyn DeviceMemory,
    real: &DeviceBuffer,
    imag: &DeviceBuffer,
    count: usize,
) -> FftResult<Vec<(T, T)>> {
    let component = T::PRECISION.component_bytes();
    let mut re_bytes = vec![0u8; count * component];
    let mut im_bytes = vec![0u8; count * component];
    let re_src = leading(real, re_bytes.len())?;
    let im_src = leading(imag, im_bytes.len())?;
    memory.copy_to_host(&mut re_bytes, &re_src)?;
    memory.copy_to_host(&mut im_bytes, &im_src)?;
    Ok(re_bytes
        .chunks_exact(component)
        .zip(im_bytes.chunks_exact(component))
        .map(|(re, im)| {
            (
                T::from_f64(T::PRECISION.decode(re)),
                T::from_f64(T::PRECISION.decode(im)),
            )
        })
        .collect())
}

fn leading(buffer: &DeviceBuffer, bytes: usize) -> FftResult<DeviceBuffer> {
    buffer.slice(0, bytes).ok_or_else(|| {
        FftError::invalid_buffer(format!(
            "transfer of {bytes} bytes does not fit the {}-byte buffer",
            buffer.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::{download, download_planar, upload, upload_planar};
    use crate::device::DeviceMemory;
    use crate::error::FftErrorKind;
    use crate::host::HostDevice;

    #[test]
    fn interleaved_samples_round_trip() {
        let device = HostDevice::new();
        let buf = device.allocate(64).expect("alloc");
        let values = [(1.5f64, -2.0f64), (0.25, 8.0)];
        upload(&device, &buf, &values).expect("upload");
        let back: Vec<(f64, f64)> = download(&device, &buf, 2).expect("download");
        assert_eq!(back, values);
    }

    #[test]
    fn half_precision_samples_keep_exact_values() {
        let device = HostDevice::new();
        let buf = device.allocate(8).expect("alloc");
        let values = [
            (f16::from_f32(0.5), f16::from_f32(-1.0)),
            (f16::from_f32(3.0), f16::from_f32(0.0)),
        ];
        upload(&device, &buf, &values).expect("upload");
        let back: Vec<(f16, f16)> = download(&device, &buf, 2).expect("download");
        assert_eq!(back, values);
    }

    #[test]
    fn planar_halves_land_in_separate_buffers() {
        let device = HostDevice::new();
        let re = device.allocate(8).expect("re");
        let im = device.allocate(8).expect("im");
        upload_planar(&device, &re, &im, &[(1.0f32, 2.0f32), (3.0, 4.0)]).expect("upload");
        let reals: Vec<(f32, f32)> = download(&device, &re, 1).expect("re as pairs");
        assert_eq!(reals, vec![(1.0, 3.0)]);
        let back: Vec<(f32, f32)> = download_planar(&device, &re, &im, 2).expect("download");
        assert_eq!(back, vec![(1.0, 2.0), (3.0, 4.0)]);
    }

    #[test]
    fn downloads_read_the_leading_window_only() {
        let device = HostDevice::new();
        let buf = device.allocate(24).expect("alloc");
        upload(&device, &buf, &[(1.0f32, 2.0f32), (3.0, 4.0), (5.0, 6.0)]).expect("upload");
        let head: Vec<(f32, f32)> = download(&device, &buf, 2).expect("download");
        assert_eq!(head, vec![(1.0, 2.0), (3.0, 4.0)]);
        let err = download::<f32>(&device, &buf, 4).expect_err("past the end");
        assert_eq!(err.kind(), FftErrorKind::InvalidBuffer);

        let re = device.allocate(4).expect("re");
        let im = device.allocate(8).expect("im");
        let err = download_planar::<f32>(&device, &re, &im, 2).expect_err("short real half");
        assert_eq!(err.kind(), FftErrorKind::InvalidBuffer);
    }

    #[test]
    fn oversized_transfers_are_invalid_buffers() {
        let device = HostDevice::new();
        let buf = device.allocate(8).expect("alloc");
        let err = upload(&device, &buf, &[(0.0f32, 0.0f32); 2]).expect_err("too large");
        assert_eq!(err.kind(), FftErrorKind::InvalidBuffer);
    }
}

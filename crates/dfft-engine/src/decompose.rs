//! Kernel-decomposition selection and scratch sizing.
//!
//! Everything here is a pure function of the shape, precision and planner
//! limits, so identical descriptors always decompose identically.

use serde::{Deserialize, Serialize};

use crate::descriptor::checked_product;
use crate::error::{FftError, FftResult};
use crate::precision::Precision;

/// Radices with a dedicated butterfly kernel, tried largest first.
pub const SUPPORTED_RADICES: [usize; 9] = [16, 13, 11, 8, 7, 5, 4, 3, 2];

/// How one axis is transformed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AxisAlgorithm {
    /// Length-1 axis; the transform is the identity.
    Identity,
    /// Stockham autosort passes, one per radix.
    Stockham { radices: Vec<usize> },
    /// Chirp-z convolution over a power-of-two padded length.
    Bluestein {
        padded_length: usize,
        radices: Vec<usize>,
    },
}

/// Decomposition chosen for a single axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxisPlan {
    pub axis: usize,
    pub length: usize,
    /// Independent 1D lines along this axis across the whole batch.
    pub lines: usize,
    pub algorithm: AxisAlgorithm,
}

impl AxisPlan {
    /// Device passes this axis contributes to the kernel chain.
    #[must_use]
    pub fn passes(&self) -> usize {
        match &self.algorithm {
            AxisAlgorithm::Identity => 0,
            AxisAlgorithm::Stockham { radices } => radices.len(),
            AxisAlgorithm::Bluestein { .. } => 1,
        }
    }

    /// Radix path recorded in plan fingerprints.
    #[must_use]
    pub fn radix_path(&self) -> Vec<usize> {
        match &self.algorithm {
            AxisAlgorithm::Identity => vec![1],
            AxisAlgorithm::Stockham { radices } | AxisAlgorithm::Bluestein { radices, .. } => {
                radices.clone()
            }
        }
    }

    /// Rough complex multiply-add count, used for cache bookkeeping.
    #[must_use]
    pub fn estimated_flops(&self) -> u64 {
        let stockham = |len: usize, radices: &[usize]| -> u64 {
            let per_line: u64 = radices.iter().map(|&r| (len as u64) * (r as u64)).sum();
            per_line.saturating_mul(self.lines as u64)
        };
        match &self.algorithm {
            AxisAlgorithm::Identity => 0,
            AxisAlgorithm::Stockham { radices } => stockham(self.length, radices),
            AxisAlgorithm::Bluestein {
                padded_length,
                radices,
            } => stockham(*padded_length, radices)
                .saturating_mul(2)
                .saturating_add(
                    (*padded_length as u64)
                        .saturating_mul(self.lines as u64)
                        .saturating_mul(3),
                ),
        }
    }
}

/// Byte regions of the scratch buffer a plan uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ScratchLayout {
    /// Ping-pong staging area holding one full batch between passes.
    pub staging_bytes: usize,
    /// Bluestein work area, placed directly after the staging area.
    pub bluestein_bytes: usize,
}

impl ScratchLayout {
    #[must_use]
    pub const fn total_bytes(&self) -> usize {
        self.staging_bytes + self.bluestein_bytes
    }

    #[must_use]
    pub const fn bluestein_offset(&self) -> usize {
        self.staging_bytes
    }
}

/// Limits the decomposition must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecompositionLimits {
    pub allow_bluestein: bool,
    pub max_length: usize,
}

/// Factor `n` over [`SUPPORTED_RADICES`], largest radix first.
///
/// Returns an empty path for `n == 1` and `None` when a prime factor has no
/// dedicated kernel.
#[must_use]
pub fn factorize(mut n: usize) -> Option<Vec<usize>> {
    if n == 0 {
        return None;
    }
    let mut radices = Vec::new();
    while n > 1 {
        let radix = SUPPORTED_RADICES
            .iter()
            .copied()
            .find(|&r| n.is_multiple_of(r))?;
        radices.push(radix);
        n /= radix;
    }
    Some(radices)
}

/// Choose one [`AxisPlan`] per dimension.
pub fn decompose(
    dims: &[usize],
    batch: usize,
    precision: Precision,
    limits: DecompositionLimits,
) -> FftResult<Vec<AxisPlan>> {
    let total = checked_product(dims)?
        .checked_mul(batch)
        .ok_or_else(|| FftError::unsupported("batched element count overflows usize"))?;
    dims.iter()
        .enumerate()
        .map(|(axis, &length)| {
            let algorithm = choose_algorithm(length, precision, limits)?;
            Ok(AxisPlan {
                axis,
                length,
                lines: total / length,
                algorithm,
            })
        })
        .collect()
}

fn choose_algorithm(
    length: usize,
    precision: Precision,
    limits: DecompositionLimits,
) -> FftResult<AxisAlgorithm> {
    if length > limits.max_length {
        return Err(FftError::unsupported(format!(
            "length {length} exceeds the maximum supported length {}",
            limits.max_length
        )));
    }
    if length == 1 {
        return Ok(AxisAlgorithm::Identity);
    }
    if let Some(radices) = factorize(length) {
        return Ok(AxisAlgorithm::Stockham { radices });
    }
    if !limits.allow_bluestein {
        return Err(FftError::unsupported(format!(
            "length {length} has a prime factor above {} and Bluestein is disabled",
            SUPPORTED_RADICES[0]
        )));
    }
    if precision == Precision::Half {
        return Err(FftError::unsupported(format!(
            "length {length} needs Bluestein, which is not available in half precision"
        )));
    }
    let padded_length = length
        .checked_mul(2)
        .and_then(|v| (v - 1).checked_next_power_of_two())
        .filter(|&m| m <= limits.max_length)
        .ok_or_else(|| {
            FftError::unsupported(format!(
                "Bluestein padding for length {length} exceeds the maximum supported length {}",
                limits.max_length
            ))
        })?;
    let radices = factorize(padded_length)
        .ok_or_else(|| FftError::unsupported("power-of-two padding failed to factor"))?;
    Ok(AxisAlgorithm::Bluestein {
        padded_length,
        radices,
    })
}

/// Scratch regions needed by a decomposition.
///
/// A staging area for one full batch is needed as soon as the kernel chain
/// has more than one pass. Bluestein axes additionally need room for every
/// padded line plus the shared filter spectrum; axes run one after another,
/// so only the largest such area counts.
pub fn scratch_layout(
    axes: &[AxisPlan],
    total_elements: usize,
    precision: Precision,
) -> FftResult<ScratchLayout> {
    let overflow = || FftError::unsupported("scratch size overflows usize");
    let complex_bytes = precision.complex_bytes();
    let passes: usize = axes.iter().map(AxisPlan::passes).sum();
    let staging_bytes = if passes > 1 {
        total_elements
            .checked_mul(complex_bytes)
            .ok_or_else(overflow)?
    } else {
        0
    };
    let mut bluestein_bytes = 0usize;
    for axis in axes {
        if let AxisAlgorithm::Bluestein { padded_length, .. } = axis.algorithm {
            let bytes = (axis.lines + 1)
                .checked_mul(padded_length)
                .and_then(|v| v.checked_mul(complex_bytes))
                .ok_or_else(overflow)?;
            bluestein_bytes = bluestein_bytes.max(bytes);
        }
    }
    staging_bytes.checked_add(bluestein_bytes).ok_or_else(overflow)?;
    Ok(ScratchLayout {
        staging_bytes,
        bluestein_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::{
        AxisAlgorithm, DecompositionLimits, decompose, factorize, scratch_layout,
    };
    use crate::error::FftErrorKind;
    use crate::precision::Precision;

    const LIMITS: DecompositionLimits = DecompositionLimits {
        allow_bluestein: true,
        max_length: 1 << 24,
    };

    #[test]
    fn factorize_prefers_large_radices() {
        assert_eq!(factorize(1), Some(vec![]));
        assert_eq!(factorize(8), Some(vec![8]));
        assert_eq!(factorize(12), Some(vec![4, 3]));
        assert_eq!(factorize(4096), Some(vec![16, 16, 16]));
        assert_eq!(factorize(2 * 11 * 13), Some(vec![13, 11, 2]));
        assert_eq!(factorize(17), None);
        assert_eq!(factorize(0), None);
    }

    #[test]
    fn single_pass_lengths_need_no_scratch() {
        let axes = decompose(&[8], 1, Precision::Single, LIMITS).expect("length 8");
        assert_eq!(
            axes[0].algorithm,
            AxisAlgorithm::Stockham { radices: vec![8] }
        );
        let layout = scratch_layout(&axes, 8, Precision::Single).expect("layout");
        assert_eq!(layout.total_bytes(), 0);
    }

    #[test]
    fn multi_pass_plans_stage_the_whole_batch() {
        let axes = decompose(&[64, 3], 2, Precision::Double, LIMITS).expect("2d");
        assert_eq!(axes[0].lines, 6);
        assert_eq!(axes[1].lines, 128);
        let layout = scratch_layout(&axes, 64 * 3 * 2, Precision::Double).expect("layout");
        assert_eq!(layout.staging_bytes, 64 * 3 * 2 * 16);
        assert_eq!(layout.bluestein_bytes, 0);
    }

    #[test]
    fn prime_lengths_use_bluestein_scratch() {
        let axes = decompose(&[17], 3, Precision::Single, LIMITS).expect("bluestein");
        assert_eq!(
            axes[0].algorithm,
            AxisAlgorithm::Bluestein {
                padded_length: 64,
                radices: vec![16, 4]
            }
        );
        let layout = scratch_layout(&axes, 17 * 3, Precision::Single).expect("layout");
        assert_eq!(layout.staging_bytes, 0);
        assert_eq!(layout.bluestein_bytes, (3 + 1) * 64 * 8);
    }

    #[test]
    fn unsupported_shapes_are_terminal() {
        let no_bluestein = DecompositionLimits {
            allow_bluestein: false,
            ..LIMITS
        };
        let err = decompose(&[17], 1, Precision::Single, no_bluestein).expect_err("prime");
        assert_eq!(err.kind(), FftErrorKind::UnsupportedConfiguration);

        let err = decompose(&[19], 1, Precision::Half, LIMITS).expect_err("half bluestein");
        assert_eq!(err.kind(), FftErrorKind::UnsupportedConfiguration);

        let small = DecompositionLimits {
            allow_bluestein: true,
            max_length: 32,
        };
        let err = decompose(&[17], 1, Precision::Single, small).expect_err("padding too large");
        assert_eq!(err.kind(), FftErrorKind::UnsupportedConfiguration);
        let err = decompose(&[64], 1, Precision::Single, small).expect_err("too long");
        assert_eq!(err.kind(), FftErrorKind::UnsupportedConfiguration);
    }

    #[test]
    fn identity_axes_contribute_no_passes() {
        let axes = decompose(&[1], 1, Precision::Single, LIMITS).expect("identity");
        assert_eq!(axes[0].algorithm, AxisAlgorithm::Identity);
        assert_eq!(axes[0].passes(), 0);
        assert_eq!(axes[0].radix_path(), vec![1]);
    }
}

//! Immutable transform descriptors and buffer layouts.
//!
//! Dimensions are row-major: the last axis is the contiguous one. Strides,
//! distances and offsets are counted in complex elements, never bytes.

use serde::{Deserialize, Serialize};

use crate::error::{FftError, FftResult};
use crate::precision::Precision;

/// Maximum number of transform axes.
pub const MAX_DIMENSIONS: usize = 3;

/// Whether input and output occupy the same memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Placement {
    InPlace,
    OutOfPlace,
}

impl Placement {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InPlace => "in_place",
            Self::OutOfPlace => "out_of_place",
        }
    }
}

/// Sign of the transform exponent. Neither direction is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    /// `X[k] = Σ x[n] · exp(-2πi·k·n/N)`
    Forward,
    /// `x[n] = Σ X[k] · exp(+2πi·k·n/N)`, without the `1/N` factor.
    Inverse,
}

impl Direction {
    #[must_use]
    pub const fn sign(self) -> f64 {
        match self {
            Self::Forward => -1.0,
            Self::Inverse => 1.0,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Inverse => "inverse",
        }
    }
}

/// How complex samples are spread over device buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum ArrayType {
    /// One buffer of `(re, im)` pairs.
    #[default]
    ComplexInterleaved,
    /// Two buffers: all real components, then all imaginary components.
    ComplexPlanar,
}

impl ArrayType {
    #[must_use]
    pub const fn buffer_count(self) -> usize {
        match self {
            Self::ComplexInterleaved => 1,
            Self::ComplexPlanar => 2,
        }
    }

    /// Bytes one complex element occupies in each buffer.
    #[must_use]
    pub const fn element_bytes(self, precision: Precision) -> usize {
        match self {
            Self::ComplexInterleaved => precision.complex_bytes(),
            Self::ComplexPlanar => precision.component_bytes(),
        }
    }
}

/// Caller-facing layout request; unset fields mean "contiguous".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferLayout {
    pub array_type: ArrayType,
    pub strides: Option<Vec<usize>>,
    pub distance: Option<usize>,
    pub offset: usize,
}

impl BufferLayout {
    #[must_use]
    pub fn planar() -> Self {
        Self {
            array_type: ArrayType::ComplexPlanar,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_strides(mut self, strides: impl Into<Vec<usize>>) -> Self {
        self.strides = Some(strides.into());
        self
    }

    #[must_use]
    pub fn with_distance(mut self, distance: usize) -> Self {
        self.distance = Some(distance);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Fill in contiguous defaults for `dims` and validate the result.
    pub fn resolve(&self, dims: &[usize], batch: usize) -> FftResult<ResolvedLayout> {
        let strides = match &self.strides {
            Some(strides) => {
                if strides.len() != dims.len() {
                    return Err(FftError::invalid_descriptor(format!(
                        "{} strides given for {} dimensions",
                        strides.len(),
                        dims.len()
                    )));
                }
                if strides.contains(&0) {
                    return Err(FftError::invalid_descriptor("strides must be at least 1"));
                }
                strides.clone()
            }
            None => contiguous_strides(dims)?,
        };
        let distance = match self.distance {
            Some(0) => {
                return Err(FftError::invalid_descriptor("distance must be at least 1"));
            }
            Some(distance) => distance,
            None => checked_product(dims)?,
        };
        let layout = ResolvedLayout {
            array_type: self.array_type,
            strides,
            distance,
            offset: self.offset,
        };
        layout.ensure_injective(dims, batch)?;
        Ok(layout)
    }
}

/// A layout with every stride, distance and offset made explicit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedLayout {
    pub array_type: ArrayType,
    pub strides: Vec<usize>,
    pub distance: usize,
    pub offset: usize,
}

impl ResolvedLayout {
    /// Elements each buffer must hold: one past the highest addressed element.
    pub fn extent_elements(&self, dims: &[usize], batch: usize) -> FftResult<usize> {
        let span = self.span(dims)?;
        batch
            .saturating_sub(1)
            .checked_mul(self.distance)
            .and_then(|v| v.checked_add(span))
            .and_then(|v| v.checked_add(self.offset))
            .ok_or_else(|| FftError::unsupported("buffer extent overflows usize"))
    }

    /// Bytes each buffer must hold for `precision`.
    pub fn extent_bytes(
        &self,
        dims: &[usize],
        batch: usize,
        precision: Precision,
    ) -> FftResult<usize> {
        self.extent_elements(dims, batch)?
            .checked_mul(self.array_type.element_bytes(precision))
            .ok_or_else(|| FftError::unsupported("buffer byte footprint overflows usize"))
    }

    /// Element index of row-major position `linear` within transform `batch`.
    #[must_use]
    pub fn element_index(&self, dims: &[usize], batch: usize, linear: usize) -> usize {
        let mut rest = linear;
        let mut index = self.offset + batch * self.distance;
        for (axis, &len) in dims.iter().enumerate().rev() {
            index += (rest % len) * self.strides[axis];
            rest /= len;
        }
        index
    }

    /// Elements spanned by one transform (highest offset + 1).
    fn span(&self, dims: &[usize]) -> FftResult<usize> {
        dims.iter()
            .zip(&self.strides)
            .try_fold(1usize, |acc, (&len, &stride)| {
                len.saturating_sub(1)
                    .checked_mul(stride)
                    .and_then(|v| v.checked_add(acc))
            })
            .ok_or_else(|| FftError::unsupported("transform span overflows usize"))
    }

    /// Conservative check that no two elements share an address: axes
    /// sorted by stride must nest, and the batch distance must clear a
    /// whole transform.
    fn ensure_injective(&self, dims: &[usize], batch: usize) -> FftResult<()> {
        let mut axes: Vec<(usize, usize)> = dims
            .iter()
            .zip(&self.strides)
            .filter(|(len, _)| **len > 1)
            .map(|(&len, &stride)| (stride, len))
            .collect();
        axes.sort_unstable();
        let mut extent = 1usize;
        for (stride, len) in axes {
            if stride < extent {
                return Err(FftError::invalid_descriptor(format!(
                    "layout overlaps itself: stride {stride} is inside an extent of {extent}"
                )));
            }
            extent = (len - 1)
                .checked_mul(stride)
                .and_then(|v| v.checked_add(extent))
                .ok_or_else(|| FftError::unsupported("transform span overflows usize"))?;
        }
        if batch > 1 && self.distance < extent {
            return Err(FftError::invalid_descriptor(format!(
                "batch distance {} is smaller than one transform's extent {extent}",
                self.distance
            )));
        }
        Ok(())
    }
}

/// Immutable description of a transform's shape, precision, direction and
/// memory placement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransformDescriptor {
    placement: Placement,
    direction: Direction,
    precision: Precision,
    dimensions: Vec<usize>,
    number_of_transforms: usize,
    input_layout: BufferLayout,
    output_layout: BufferLayout,
}

impl TransformDescriptor {
    /// An out-of-place, forward, single-precision, unbatched descriptor.
    #[must_use]
    pub fn new(dimensions: impl Into<Vec<usize>>) -> Self {
        Self {
            placement: Placement::OutOfPlace,
            direction: Direction::Forward,
            precision: Precision::Single,
            dimensions: dimensions.into(),
            number_of_transforms: 1,
            input_layout: BufferLayout::default(),
            output_layout: BufferLayout::default(),
        }
    }

    #[must_use]
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    #[must_use]
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    #[must_use]
    pub fn with_number_of_transforms(mut self, number_of_transforms: usize) -> Self {
        self.number_of_transforms = number_of_transforms;
        self
    }

    #[must_use]
    pub fn with_input_layout(mut self, layout: BufferLayout) -> Self {
        self.input_layout = layout;
        self
    }

    #[must_use]
    pub fn with_output_layout(mut self, layout: BufferLayout) -> Self {
        self.output_layout = layout;
        self
    }

    #[must_use]
    pub const fn placement(&self) -> Placement {
        self.placement
    }

    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub const fn precision(&self) -> Precision {
        self.precision
    }

    #[must_use]
    pub fn dimensions(&self) -> &[usize] {
        &self.dimensions
    }

    #[must_use]
    pub const fn number_of_transforms(&self) -> usize {
        self.number_of_transforms
    }

    #[must_use]
    pub const fn input_layout(&self) -> &BufferLayout {
        &self.input_layout
    }

    #[must_use]
    pub const fn output_layout(&self) -> &BufferLayout {
        &self.output_layout
    }

    /// Validate shape and layouts, returning resolved input/output layouts.
    pub fn validate(&self) -> FftResult<(ResolvedLayout, ResolvedLayout)> {
        if self.dimensions.is_empty() {
            return Err(FftError::invalid_descriptor("dimensions cannot be empty"));
        }
        if self.dimensions.len() > MAX_DIMENSIONS {
            return Err(FftError::invalid_descriptor(format!(
                "{} dimensions requested, at most {MAX_DIMENSIONS} supported",
                self.dimensions.len()
            )));
        }
        if self.dimensions.contains(&0) {
            return Err(FftError::invalid_descriptor(
                "every dimension length must be at least 1",
            ));
        }
        if self.number_of_transforms == 0 {
            return Err(FftError::invalid_descriptor(
                "number of transforms must be at least 1",
            ));
        }
        checked_product(&self.dimensions)?
            .checked_mul(self.number_of_transforms)
            .ok_or_else(|| FftError::unsupported("batched element count overflows usize"))?;

        let input = self
            .input_layout
            .resolve(&self.dimensions, self.number_of_transforms)?;
        let output = match self.placement {
            Placement::InPlace => {
                let output = self
                    .output_layout
                    .resolve(&self.dimensions, self.number_of_transforms)?;
                if output != input {
                    return Err(FftError::invalid_descriptor(
                        "in-place transforms require identical input and output layouts",
                    ));
                }
                output
            }
            Placement::OutOfPlace => self
                .output_layout
                .resolve(&self.dimensions, self.number_of_transforms)?,
        };
        Ok((input, output))
    }

    /// Product of all dimension lengths, the `N` of the `1/N` round-trip factor.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.dimensions.iter().product()
    }
}

pub(crate) fn contiguous_strides(dims: &[usize]) -> FftResult<Vec<usize>> {
    let mut strides = vec![1usize; dims.len()];
    for axis in (0..dims.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1]
            .checked_mul(dims[axis + 1])
            .ok_or_else(|| FftError::unsupported("stride overflows usize"))?;
    }
    Ok(strides)
}

pub(crate) fn checked_product(dims: &[usize]) -> FftResult<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &next| acc.checked_mul(next))
        .ok_or_else(|| FftError::unsupported("dimension product overflows usize"))
}

//! Sample precisions and their little-endian device encoding.

use half::f16;
use serde::{Deserialize, Serialize};

/// Floating-point precision of every real and imaginary component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Precision {
    Half,
    Single,
    Double,
}

impl Precision {
    /// Bytes per real component.
    #[must_use]
    pub const fn component_bytes(self) -> usize {
        match self {
            Self::Half => 2,
            Self::Single => 4,
            Self::Double => 8,
        }
    }

    /// Bytes per interleaved complex sample.
    #[must_use]
    pub const fn complex_bytes(self) -> usize {
        2 * self.component_bytes()
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Half => "half",
            Self::Single => "single",
            Self::Double => "double",
        }
    }

    /// Decode one component from exactly `component_bytes()` bytes.
    pub(crate) fn decode(self, bytes: &[u8]) -> f64 {
        match self {
            Self::Half => f16::from_le_bytes([bytes[0], bytes[1]]).to_f64(),
            Self::Single => f64::from(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            Self::Double => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[..8]);
                f64::from_le_bytes(raw)
            }
        }
    }

    /// Encode one component into exactly `component_bytes()` bytes.
    pub(crate) fn encode(self, value: f64, out: &mut [u8]) {
        match self {
            Self::Half => out[..2].copy_from_slice(&f16::from_f64(value).to_le_bytes()),
            Self::Single => out[..4].copy_from_slice(&(value as f32).to_le_bytes()),
            Self::Double => out[..8].copy_from_slice(&value.to_le_bytes()),
        }
    }
}

/// Host scalar types that can be transferred to and from device buffers.
pub trait DeviceScalar: Copy + Send + Sync + 'static {
    const PRECISION: Precision;

    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

impl DeviceScalar for f16 {
    const PRECISION: Precision = Precision::Half;

    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }

    fn from_f64(value: f64) -> Self {
        f16::from_f64(value)
    }
}

impl DeviceScalar for f32 {
    const PRECISION: Precision = Precision::Single;

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl DeviceScalar for f64 {
    const PRECISION: Precision = Precision::Double;

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(value: f64) -> Self {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::Precision;

    #[test]
    fn sizes_match_interleaved_layout() {
        assert_eq!(Precision::Half.complex_bytes(), 4);
        assert_eq!(Precision::Single.complex_bytes(), 8);
        assert_eq!(Precision::Double.complex_bytes(), 16);
    }

    #[test]
    fn encoding_quantizes_to_precision() {
        let mut buf = [0u8; 8];
        Precision::Single.encode(0.1, &mut buf);
        let back = Precision::Single.decode(&buf);
        assert_eq!(back, f64::from(0.1f32));

        Precision::Half.encode(1.5, &mut buf);
        assert_eq!(Precision::Half.decode(&buf), 1.5);

        Precision::Double.encode(-2.25e-300, &mut buf);
        assert_eq!(Precision::Double.decode(&buf), -2.25e-300);
    }
}

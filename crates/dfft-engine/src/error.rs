use dfft_runtime::RuntimeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type FftResult<T> = Result<T, FftError>;

/// Failures raised at the device seam by memory or kernel-dispatch primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("unknown device buffer handle {id}")]
    UnknownBuffer { id: u64 },
    #[error("access of {len} bytes at offset {offset} overruns buffer {id} of {capacity} bytes")]
    OutOfBounds {
        id: u64,
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("host/device copy size mismatch: host {host} bytes, device {device} bytes")]
    CopySizeMismatch { host: usize, device: usize },
    #[error("free requires the full allocation handle, got a view of buffer {id}")]
    FreeOfView { id: u64 },
    #[error("non-finite sample at element {index}")]
    NonFinite { index: usize },
    #[error("kernel launch failed: {detail}")]
    LaunchFailed { detail: String },
}

/// Status kinds mirrored one-to-one by [`FftError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FftErrorKind {
    InvalidDescriptor,
    UnsupportedConfiguration,
    InsufficientScratch,
    InvalidBufferAlias,
    InvalidBuffer,
    NotInitialized,
    RuntimeMismatch,
    AlreadyInitialized,
    LeakedResources,
    NonFiniteInput,
    DeviceExecutionFailure,
}

impl FftErrorKind {
    /// Whether the caller can fix the triggering condition and retry.
    ///
    /// `UnsupportedConfiguration` is terminal for the shape that raised it.
    /// `DeviceExecutionFailure` permits a call-level retry only.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        !matches!(self, Self::UnsupportedConfiguration)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FftError {
    #[error("invalid descriptor: {detail}")]
    InvalidDescriptor { detail: String },
    #[error("unsupported configuration: {detail}")]
    UnsupportedConfiguration { detail: String },
    #[error("insufficient scratch: plan requires {required} bytes, {bound} bytes bound")]
    InsufficientScratch { required: usize, bound: usize },
    #[error("invalid buffer alias: {detail}")]
    InvalidBufferAlias { detail: String },
    #[error("invalid buffer: {detail}")]
    InvalidBuffer { detail: String },
    #[error("runtime is not initialized; call setup() first")]
    NotInitialized,
    #[error("{resource} was created on a different runtime")]
    RuntimeMismatch { resource: &'static str },
    #[error("runtime is already initialized")]
    AlreadyInitialized,
    #[error("cleanup refused: {plans} plan(s) and {contexts} execution context(s) still alive")]
    LeakedResources { plans: usize, contexts: usize },
    #[error("non-finite input sample at element {index}")]
    NonFiniteInput { index: usize },
    #[error("device execution failed: {source}")]
    DeviceExecutionFailure { source: DeviceError },
}

impl FftError {
    #[must_use]
    pub const fn kind(&self) -> FftErrorKind {
        match self {
            Self::InvalidDescriptor { .. } => FftErrorKind::InvalidDescriptor,
            Self::UnsupportedConfiguration { .. } => FftErrorKind::UnsupportedConfiguration,
            Self::InsufficientScratch { .. } => FftErrorKind::InsufficientScratch,
            Self::InvalidBufferAlias { .. } => FftErrorKind::InvalidBufferAlias,
            Self::InvalidBuffer { .. } => FftErrorKind::InvalidBuffer,
            Self::NotInitialized => FftErrorKind::NotInitialized,
            Self::RuntimeMismatch { .. } => FftErrorKind::RuntimeMismatch,
            Self::AlreadyInitialized => FftErrorKind::AlreadyInitialized,
            Self::LeakedResources { .. } => FftErrorKind::LeakedResources,
            Self::NonFiniteInput { .. } => FftErrorKind::NonFiniteInput,
            Self::DeviceExecutionFailure { .. } => FftErrorKind::DeviceExecutionFailure,
        }
    }

    pub(crate) fn invalid_descriptor(detail: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            detail: detail.into(),
        }
    }

    pub(crate) fn unsupported(detail: impl Into<String>) -> Self {
        Self::UnsupportedConfiguration {
            detail: detail.into(),
        }
    }

    pub(crate) fn invalid_buffer(detail: impl Into<String>) -> Self {
        Self::InvalidBuffer {
            detail: detail.into(),
        }
    }

    pub(crate) fn alias(detail: impl Into<String>) -> Self {
        Self::InvalidBufferAlias {
            detail: detail.into(),
        }
    }
}

impl From<RuntimeError> for FftError {
    fn from(value: RuntimeError) -> Self {
        match value {
            RuntimeError::NotInitialized => Self::NotInitialized,
            RuntimeError::AlreadyInitialized => Self::AlreadyInitialized,
            RuntimeError::LeakedResources { plans, contexts } => {
                Self::LeakedResources { plans, contexts }
            }
        }
    }
}

impl From<DeviceError> for FftError {
    fn from(value: DeviceError) -> Self {
        match value {
            DeviceError::NonFinite { index } => Self::NonFiniteInput { index },
            source => Self::DeviceExecutionFailure { source },
        }
    }
}

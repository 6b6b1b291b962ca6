#![forbid(unsafe_code)]

//! Plan/execute engine for device-resident discrete Fourier transforms.
//!
//! Callers describe a transform once ([`TransformDescriptor`]), compile it
//! into an immutable [`Plan`], bind scratch to an [`ExecutionContext`] and
//! then [`execute`] the plan any number of times over device buffers. The
//! engine owns no data buffers; memory and kernels come from a [`Device`].
//!
//! | Module       | Contents                                                  |
//! |--------------|-----------------------------------------------------------|
//! | `descriptor` | [`TransformDescriptor`], [`BufferLayout`], enums           |
//! | `decompose`  | radix factorization, Bluestein fallback, scratch sizing   |
//! | `plan`       | [`Planner`], [`Plan`], plan cache and fingerprints        |
//! | `context`    | [`ExecutionContext`], scratch binding and queue affinity  |
//! | `executor`   | [`execute`], [`synchronize`]                              |
//! | `device`     | [`DeviceMemory`], [`KernelDispatch`], [`DeviceBuffer`]    |
//! | `host`       | [`HostDevice`], the in-process reference device           |
//! | `transfer`   | typed upload/download helpers                             |
//! | `trace`      | [`TransformTrace`] JSON-line records                      |

pub mod context;
pub mod decompose;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod executor;
pub mod host;
pub mod plan;
pub mod precision;
pub mod trace;
pub mod transfer;

pub use context::ExecutionContext;
pub use decompose::{AxisAlgorithm, AxisPlan, SUPPORTED_RADICES, ScratchLayout, factorize};
pub use descriptor::{
    ArrayType, BufferLayout, Direction, MAX_DIMENSIONS, Placement, ResolvedLayout,
    TransformDescriptor,
};
pub use device::{Device, DeviceBuffer, DeviceMemory, KernelDispatch, KernelLaunch, QueueId};
pub use error::{DeviceError, FftError, FftErrorKind, FftResult};
pub use executor::{execute, synchronize};
pub use half::f16;
pub use host::HostDevice;
pub use plan::{
    CacheAdmissionPolicy, Plan, PlanCacheConfig, PlanCacheStats, PlanFingerprint, PlanKey,
    PlanMetadata, Planner, PlannerOptions, compile, get_scratch_requirement,
};
pub use precision::{DeviceScalar, Precision};
pub use trace::TransformTrace;
pub use transfer::{download, download_planar, upload, upload_planar};

/// Complex sample as `(re, im)`; the host kernels compute in this type.
pub type Complex64 = (f64, f64);

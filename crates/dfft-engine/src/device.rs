//! The device seam: memory primitives, kernel dispatch and buffer handles.
//!
//! The engine never touches device memory directly. It validates, sizes and
//! schedules, then hands a [`KernelLaunch`] to whatever implements
//! [`KernelDispatch`].

use serde::{Deserialize, Serialize};

use crate::decompose::{AxisPlan, ScratchLayout};
use crate::descriptor::{Direction, ResolvedLayout};
use crate::error::DeviceError;
use crate::precision::Precision;

/// Opaque reference to a contiguous device memory region.
///
/// A handle is an allocation id plus a byte window, so sub-regions of one
/// allocation (e.g. per-context scratch slices) are handles too. Ownership
/// of the memory stays with whoever allocated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceBuffer {
    id: u64,
    offset: usize,
    len: usize,
}

impl DeviceBuffer {
    /// Handle to a whole allocation; used by [`DeviceMemory`] implementors.
    #[must_use]
    pub const fn from_raw(id: u64, len: usize) -> Self {
        Self { id, offset: 0, len }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A window of `len` bytes starting `offset` bytes into this handle.
    #[must_use]
    pub fn slice(&self, offset: usize, len: usize) -> Option<Self> {
        let end = offset.checked_add(len)?;
        (end <= self.len).then_some(Self {
            id: self.id,
            offset: self.offset + offset,
            len,
        })
    }

    /// Whether both handles name exactly the same region.
    #[must_use]
    pub fn same_region(&self, other: &Self) -> bool {
        self == other
    }

    /// Whether the two byte windows share at least one byte.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.id == other.id
            && self.offset < other.offset + other.len
            && other.offset < self.offset + self.len
    }

    /// Whether this handle covers the whole allocation it was cut from.
    #[must_use]
    pub const fn is_whole_allocation(&self, allocation_len: usize) -> bool {
        self.offset == 0 && self.len == allocation_len
    }
}

/// Device queue (stream) a launch is ordered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct QueueId(pub u32);

impl QueueId {
    pub const DEFAULT: Self = Self(0);
}

/// Device memory primitive: allocation and host/device copies.
pub trait DeviceMemory: Send + Sync {
    fn allocate(&self, bytes: usize) -> Result<DeviceBuffer, DeviceError>;

    fn free(&self, buffer: DeviceBuffer) -> Result<(), DeviceError>;

    /// Copy `src.len()` bytes from the host into `dst`.
    fn copy_to_device(&self, dst: &DeviceBuffer, src: &[u8]) -> Result<(), DeviceError>;

    /// Copy `dst.len()` bytes from `src` back to the host.
    fn copy_to_host(&self, dst: &mut [u8], src: &DeviceBuffer) -> Result<(), DeviceError>;
}

/// Everything a kernel chain needs to run one execution.
#[derive(Debug, Clone)]
pub struct KernelLaunch<'a> {
    pub queue: QueueId,
    pub precision: Precision,
    pub direction: Direction,
    pub dimensions: &'a [usize],
    pub number_of_transforms: usize,
    pub axes: &'a [AxisPlan],
    pub input_layout: &'a ResolvedLayout,
    pub output_layout: &'a ResolvedLayout,
    pub input: &'a [DeviceBuffer],
    pub output: &'a [DeviceBuffer],
    pub scratch: Option<DeviceBuffer>,
    pub scratch_layout: ScratchLayout,
    /// Reject non-finite input samples before writing any output.
    pub check_finite: bool,
}

/// Kernel dispatch primitive.
pub trait KernelDispatch: Send + Sync {
    /// Enqueue the kernel chain described by `launch` on `launch.queue`.
    fn launch(&self, launch: &KernelLaunch<'_>) -> Result<(), DeviceError>;

    /// Block until every launch enqueued on `queue` has completed.
    fn synchronize(&self, queue: QueueId) -> Result<(), DeviceError>;
}

/// A device offering both memory and kernel dispatch.
pub trait Device: DeviceMemory + KernelDispatch {}

impl<T: DeviceMemory + KernelDispatch> Device for T {}

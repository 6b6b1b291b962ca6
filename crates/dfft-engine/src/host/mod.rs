//! In-process reference device.
//!
//! `HostDevice` keeps every allocation in host memory and runs the plan's
//! kernel chain eagerly inside [`KernelDispatch::launch`], so it doubles as
//! the oracle backend for tests and benches.

mod kernels;

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::device::{DeviceBuffer, DeviceMemory, KernelDispatch, KernelLaunch, QueueId};
use crate::error::DeviceError;

/// Byte storage for every live allocation, keyed by allocation id.
#[derive(Debug, Default)]
pub(crate) struct Arena {
    allocations: HashMap<u64, Vec<u8>>,
}

impl Arena {
    fn window(&self, buffer: &DeviceBuffer, at: usize, len: usize) -> Result<&[u8], DeviceError> {
        let storage = self
            .allocations
            .get(&buffer.id())
            .ok_or(DeviceError::UnknownBuffer { id: buffer.id() })?;
        let range = checked_range(buffer, storage.len(), at, len)?;
        Ok(&storage[range])
    }

    fn window_mut(
        &mut self,
        buffer: &DeviceBuffer,
        at: usize,
        len: usize,
    ) -> Result<&mut [u8], DeviceError> {
        let storage = self
            .allocations
            .get_mut(&buffer.id())
            .ok_or(DeviceError::UnknownBuffer { id: buffer.id() })?;
        let range = checked_range(buffer, storage.len(), at, len)?;
        Ok(&mut storage[range])
    }

    /// Fill `out` from `buffer` starting `at` bytes into the handle.
    pub(crate) fn read(
        &self,
        buffer: &DeviceBuffer,
        at: usize,
        out: &mut [u8],
    ) -> Result<(), DeviceError> {
        let len = out.len();
        out.copy_from_slice(self.window(buffer, at, len)?);
        Ok(())
    }

    /// Copy `src` into `buffer` starting `at` bytes into the handle.
    pub(crate) fn write(
        &mut self,
        buffer: &DeviceBuffer,
        at: usize,
        src: &[u8],
    ) -> Result<(), DeviceError> {
        self.window_mut(buffer, at, src.len())?.copy_from_slice(src);
        Ok(())
    }
}

/// Byte range of `len` bytes at `at` within `buffer`, checked against both
/// the handle's window and the backing allocation.
fn checked_range(
    buffer: &DeviceBuffer,
    capacity: usize,
    at: usize,
    len: usize,
) -> Result<std::ops::Range<usize>, DeviceError> {
    let out_of_bounds = || DeviceError::OutOfBounds {
        id: buffer.id(),
        offset: buffer.offset().saturating_add(at),
        len,
        capacity,
    };
    let end = at.checked_add(len).ok_or_else(out_of_bounds)?;
    if end > buffer.len() {
        return Err(out_of_bounds());
    }
    let start = buffer.offset() + at;
    let stop = buffer.offset() + end;
    if stop > capacity {
        return Err(out_of_bounds());
    }
    Ok(start..stop)
}

/// Host-memory device with eager kernel execution.
#[derive(Debug)]
pub struct HostDevice {
    arena: Mutex<Arena>,
    next_id: AtomicU64,
    launches: Mutex<HashMap<QueueId, u64>>,
    injected_fault: Mutex<Option<String>>,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDevice {
    #[must_use]
    pub fn new() -> Self {
        Self {
            arena: Mutex::new(Arena::default()),
            next_id: AtomicU64::new(1),
            launches: Mutex::new(HashMap::new()),
            injected_fault: Mutex::new(None),
        }
    }

    /// Number of allocations not yet freed.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.arena
            .lock()
            .map_or(0, |arena| arena.allocations.len())
    }

    /// Launches received across all queues, failed ones included.
    #[must_use]
    pub fn launches(&self) -> u64 {
        self.launches
            .lock()
            .map_or(0, |launches| launches.values().sum())
    }

    /// Launches received on one queue.
    #[must_use]
    pub fn launches_on(&self, queue: QueueId) -> u64 {
        self.launches
            .lock()
            .map_or(0, |launches| launches.get(&queue).copied().unwrap_or(0))
    }

    /// Make the next launch fail with [`DeviceError::LaunchFailed`].
    pub fn fail_next_launch(&self, detail: impl Into<String>) {
        if let Ok(mut fault) = self.injected_fault.lock() {
            *fault = Some(detail.into());
        }
    }

    fn lock_arena(&self) -> Result<std::sync::MutexGuard<'_, Arena>, DeviceError> {
        self.arena.lock().map_err(|_| DeviceError::LaunchFailed {
            detail: String::from("host arena lock poisoned"),
        })
    }
}

impl DeviceMemory for HostDevice {
    fn allocate(&self, bytes: usize) -> Result<DeviceBuffer, DeviceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock_arena()?.allocations.insert(id, vec![0; bytes]);
        Ok(DeviceBuffer::from_raw(id, bytes))
    }

    fn free(&self, buffer: DeviceBuffer) -> Result<(), DeviceError> {
        let mut arena = self.lock_arena()?;
        let capacity = arena
            .allocations
            .get(&buffer.id())
            .map(Vec::len)
            .ok_or(DeviceError::UnknownBuffer { id: buffer.id() })?;
        if !buffer.is_whole_allocation(capacity) {
            return Err(DeviceError::FreeOfView { id: buffer.id() });
        }
        arena.allocations.remove(&buffer.id());
        Ok(())
    }

    fn copy_to_device(&self, dst: &DeviceBuffer, src: &[u8]) -> Result<(), DeviceError> {
        if src.len() != dst.len() {
            return Err(DeviceError::CopySizeMismatch {
                host: src.len(),
                device: dst.len(),
            });
        }
        self.lock_arena()?.write(dst, 0, src)
    }

    fn copy_to_host(&self, dst: &mut [u8], src: &DeviceBuffer) -> Result<(), DeviceError> {
        if dst.len() != src.len() {
            return Err(DeviceError::CopySizeMismatch {
                host: dst.len(),
                device: src.len(),
            });
        }
        self.lock_arena()?.read(src, 0, dst)
    }
}

impl KernelDispatch for HostDevice {
    fn launch(&self, launch: &KernelLaunch<'_>) -> Result<(), DeviceError> {
        if let Ok(mut launches) = self.launches.lock() {
            *launches.entry(launch.queue).or_insert(0) += 1;
        }
        if let Some(detail) = self.injected_fault.lock().ok().and_then(|mut f| f.take()) {
            return Err(DeviceError::LaunchFailed { detail });
        }
        let mut arena = self.lock_arena()?;
        kernels::run(&mut arena, launch)?;
        debug!(
            queue = launch.queue.0,
            axes = launch.axes.len(),
            "host kernel chain complete"
        );
        Ok(())
    }

    fn synchronize(&self, queue: QueueId) -> Result<(), DeviceError> {
        // launches complete before `launch` returns
        debug!(queue = queue.0, "host queue synchronized");
        Ok(())
    }
}

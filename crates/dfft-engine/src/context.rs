//! Execution contexts: per-invocation scratch binding and queue affinity.

use std::sync::Arc;

use dfft_runtime::{ResourceKind, ResourceToken, Runtime, TraceLedger};
use tracing::{debug, warn};

use crate::device::{DeviceBuffer, DeviceMemory, QueueId};
use crate::error::{FftError, FftResult};
use crate::plan::Plan;
use crate::trace::TransformTrace;

/// Scratch memory the engine allocated on the caller's behalf.
///
/// Freed through the allocating memory when dropped.
struct OwnedScratch {
    buffer: DeviceBuffer,
    memory: Arc<dyn DeviceMemory>,
}

impl std::fmt::Debug for OwnedScratch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedScratch")
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

impl Drop for OwnedScratch {
    fn drop(&mut self) {
        if let Err(err) = self.memory.free(self.buffer) {
            warn!(%err, id = self.buffer.id(), "engine-owned scratch free failed");
        }
    }
}

#[derive(Debug)]
enum ScratchBinding {
    /// Caller-owned memory; the context only records the binding.
    Borrowed { buffer: DeviceBuffer, bytes: usize },
    Owned(OwnedScratch),
}

impl ScratchBinding {
    fn buffer(&self) -> DeviceBuffer {
        match self {
            Self::Borrowed { buffer, bytes } => buffer.slice(0, *bytes).unwrap_or(*buffer),
            Self::Owned(owned) => owned.buffer,
        }
    }

    fn bytes(&self) -> usize {
        match self {
            Self::Borrowed { bytes, .. } => *bytes,
            Self::Owned(owned) => owned.buffer.len(),
        }
    }
}

/// Mutable per-invocation state, kept apart from the immutable [`Plan`].
///
/// One plan may be executed concurrently through several contexts, each
/// with its own non-overlapping scratch region.
#[derive(Debug)]
pub struct ExecutionContext {
    scratch: Option<ScratchBinding>,
    queue: QueueId,
    traces: TraceLedger<TransformTrace>,
    token: ResourceToken,
}

impl ExecutionContext {
    pub fn new(runtime: &Runtime) -> FftResult<Self> {
        let token = runtime.acquire(ResourceKind::ExecutionContext)?;
        Ok(Self {
            scratch: None,
            queue: QueueId::DEFAULT,
            traces: TraceLedger::new(runtime.config().trace_capacity),
            token,
        })
    }

    #[must_use]
    pub fn with_queue(mut self, queue: QueueId) -> Self {
        self.queue = queue;
        self
    }

    pub fn set_queue(&mut self, queue: QueueId) {
        self.queue = queue;
    }

    #[must_use]
    pub const fn queue(&self) -> QueueId {
        self.queue
    }

    /// Bind `bytes` of caller-owned `buffer` as scratch for `plans`.
    ///
    /// Replaces any previous binding.
    pub fn bind_scratch(
        &mut self,
        buffer: DeviceBuffer,
        bytes: usize,
        plans: &[&Plan],
    ) -> FftResult<()> {
        if bytes > buffer.len() {
            return Err(FftError::invalid_buffer(format!(
                "scratch binding of {bytes} bytes exceeds the {}-byte buffer",
                buffer.len()
            )));
        }
        ensure_sufficient(bytes, plans)?;
        debug!(id = buffer.id(), bytes, "scratch bound");
        self.scratch = Some(ScratchBinding::Borrowed { buffer, bytes });
        Ok(())
    }

    /// Allocate scratch large enough for `plans` and take ownership of it.
    ///
    /// The allocation is freed when the binding is replaced, cleared, or the
    /// context is destroyed.
    pub fn allocate_scratch(
        &mut self,
        memory: Arc<dyn DeviceMemory>,
        plans: &[&Plan],
    ) -> FftResult<()> {
        let bytes = plans
            .iter()
            .map(|plan| plan.scratch_requirement())
            .max()
            .unwrap_or(0);
        if bytes == 0 {
            self.scratch = None;
            return Ok(());
        }
        let buffer = memory.allocate(bytes)?;
        debug!(id = buffer.id(), bytes, "engine-owned scratch allocated");
        self.scratch = Some(ScratchBinding::Owned(OwnedScratch { buffer, memory }));
        Ok(())
    }

    /// Drop the current binding; engine-owned scratch is freed.
    pub fn clear_scratch(&mut self) {
        self.scratch = None;
    }

    /// Bytes currently bound, zero when unbound.
    #[must_use]
    pub fn scratch_bytes(&self) -> usize {
        self.scratch.as_ref().map_or(0, ScratchBinding::bytes)
    }

    /// The bound scratch window, trimmed to the bound byte count.
    #[must_use]
    pub fn scratch_buffer(&self) -> Option<DeviceBuffer> {
        self.scratch.as_ref().map(ScratchBinding::buffer)
    }

    #[must_use]
    pub fn owns_scratch(&self) -> bool {
        matches!(self.scratch, Some(ScratchBinding::Owned(_)))
    }

    /// Whether this context was created on `runtime`.
    #[must_use]
    pub fn belongs_to(&self, runtime: &Runtime) -> bool {
        self.token.belongs_to(runtime)
    }

    #[must_use]
    pub const fn traces(&self) -> &TraceLedger<TransformTrace> {
        &self.traces
    }

    /// Remove and return every recorded trace, oldest first.
    pub fn take_traces(&mut self) -> Vec<TransformTrace> {
        self.traces.drain()
    }

    pub(crate) fn record(&mut self, trace: TransformTrace) {
        self.traces.record(trace);
    }

    /// Release the binding record. Caller-owned scratch is left untouched.
    pub fn destroy(self) {
        debug!(queue = self.queue.0, "execution context destroyed");
    }
}

pub(crate) fn ensure_sufficient(bytes: usize, plans: &[&Plan]) -> FftResult<()> {
    let required = plans
        .iter()
        .map(|plan| plan.scratch_requirement())
        .max()
        .unwrap_or(0);
    if bytes < required {
        return Err(FftError::InsufficientScratch {
            required,
            bound: bytes,
        });
    }
    Ok(())
}

#![forbid(unsafe_code)]

//! Process-wide runtime state with an explicit setup/cleanup lifecycle.
//!
//! [`Runtime`] is a cheap, cloneable handle: clones share one state record.
//! Plans and execution contexts hold a [`ResourceToken`] for as long as they
//! live, which is what lets [`Runtime::cleanup`] refuse to tear down while
//! anything is still outstanding.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::mode::RuntimeMode;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("runtime is not initialized; call setup() first")]
    NotInitialized,
    #[error("runtime is already initialized; call cleanup() before setting up again")]
    AlreadyInitialized,
    #[error("cleanup refused: {plans} plan(s) and {contexts} execution context(s) still alive")]
    LeakedResources { plans: usize, contexts: usize },
}

/// Kinds of engine objects whose lifetime is accounted against a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Plan,
    ExecutionContext,
}

/// Control-plane configuration for a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub mode: RuntimeMode,
    /// Capacity of each execution context's trace ledger.
    pub trace_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: RuntimeMode::Strict,
            trace_capacity: 256,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn with_mode(mut self, mode: RuntimeMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_trace_capacity(mut self, trace_capacity: usize) -> Self {
        self.trace_capacity = trace_capacity;
        self
    }
}

#[derive(Debug)]
struct RuntimeShared {
    config: RuntimeConfig,
    initialized: AtomicBool,
    live_plans: AtomicUsize,
    live_contexts: AtomicUsize,
}

impl RuntimeShared {
    fn counter(&self, kind: ResourceKind) -> &AtomicUsize {
        match kind {
            ResourceKind::Plan => &self.live_plans,
            ResourceKind::ExecutionContext => &self.live_contexts,
        }
    }
}

/// Explicit runtime context passed to every engine entry point.
///
/// Setup and cleanup transitions must be serialized by the caller; the
/// atomics only make concurrent misuse observable, not meaningful.
#[derive(Debug, Clone)]
pub struct Runtime {
    shared: Arc<RuntimeShared>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Runtime {
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            shared: Arc::new(RuntimeShared {
                config,
                initialized: AtomicBool::new(false),
                live_plans: AtomicUsize::new(0),
                live_contexts: AtomicUsize::new(0),
            }),
        }
    }

    /// Create a runtime and set it up in one step.
    pub fn initialized(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let runtime = Self::new(config);
        runtime.setup()?;
        Ok(runtime)
    }

    /// Transition `initialized` from false to true.
    pub fn setup(&self) -> Result<(), RuntimeError> {
        self.shared
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RuntimeError::AlreadyInitialized)?;
        debug!(mode = self.shared.config.mode.name(), "runtime setup");
        Ok(())
    }

    /// Transition `initialized` from true to false.
    ///
    /// Fails while any plan or execution context acquired from this runtime
    /// is still alive.
    pub fn cleanup(&self) -> Result<(), RuntimeError> {
        if !self.is_initialized() {
            return Err(RuntimeError::NotInitialized);
        }
        let plans = self.live_plans();
        let contexts = self.live_contexts();
        if plans > 0 || contexts > 0 {
            warn!(plans, contexts, "runtime cleanup refused");
            return Err(RuntimeError::LeakedResources { plans, contexts });
        }
        self.shared
            .initialized
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RuntimeError::NotInitialized)?;
        debug!("runtime cleanup");
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::Acquire)
    }

    pub fn ensure_initialized(&self) -> Result<(), RuntimeError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(RuntimeError::NotInitialized)
        }
    }

    #[must_use]
    pub fn config(&self) -> RuntimeConfig {
        self.shared.config
    }

    #[must_use]
    pub fn mode(&self) -> RuntimeMode {
        self.shared.config.mode
    }

    #[must_use]
    pub fn live_plans(&self) -> usize {
        self.shared.live_plans.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn live_contexts(&self) -> usize {
        self.shared.live_contexts.load(Ordering::Acquire)
    }

    /// Account a new live resource against this runtime.
    pub fn acquire(&self, kind: ResourceKind) -> Result<ResourceToken, RuntimeError> {
        self.ensure_initialized()?;
        self.shared.counter(kind).fetch_add(1, Ordering::AcqRel);
        Ok(ResourceToken {
            shared: Arc::clone(&self.shared),
            kind,
        })
    }

    /// Whether two handles refer to the same runtime state.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

/// Proof that one plan or execution context is alive.
///
/// Dropping the token releases the accounting slot.
#[derive(Debug)]
pub struct ResourceToken {
    shared: Arc<RuntimeShared>,
    kind: ResourceKind,
}

impl ResourceToken {
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Whether this token was issued by `runtime`.
    #[must_use]
    pub fn belongs_to(&self, runtime: &Runtime) -> bool {
        Arc::ptr_eq(&self.shared, &runtime.shared)
    }
}

impl Drop for ResourceToken {
    fn drop(&mut self) {
        self.shared.counter(self.kind).fetch_sub(1, Ordering::AcqRel);
    }
}

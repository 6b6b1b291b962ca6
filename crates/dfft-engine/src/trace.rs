//! Structured execution traces.

use std::sync::atomic::{AtomicU64, Ordering};

use dfft_runtime::RuntimeMode;
use serde::{Deserialize, Serialize};

use crate::descriptor::{Direction, Placement};
use crate::device::QueueId;
use crate::precision::Precision;

/// One successful execution, as recorded in a context's trace ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformTrace {
    pub operation_id: String,
    pub plan_digest: String,
    pub direction: Direction,
    pub precision: Precision,
    pub placement: Placement,
    pub dimensions: Vec<usize>,
    pub number_of_transforms: usize,
    pub queue: QueueId,
    pub scratch_bytes: usize,
    pub plan_cache_hit: bool,
    pub mode: RuntimeMode,
    pub timing_ns: u128,
}

impl TransformTrace {
    #[must_use]
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

static OPERATION_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_operation_id() -> String {
    let next = OPERATION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("dfft-op-{next:016x}")
}

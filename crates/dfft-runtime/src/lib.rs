#![forbid(unsafe_code)]

//! dfft runtime: process-wide state, resource accounting and trace ledgers
//! shared by every engine entry point.
//!
//! ## Module layout
//!
//! | Module   | Contents                                                     |
//! |----------|--------------------------------------------------------------|
//! | `mode`   | [`RuntimeMode`] enum (Strict / Hardened)                     |
//! | `state`  | [`Runtime`], [`RuntimeConfig`], [`ResourceToken`], errors    |
//! | `ledger` | [`TraceLedger`], bounded FIFO of structured trace records    |

pub mod ledger;
pub mod mode;
pub mod state;

// ── Re-exports: preserve the flat public API ────────────────────────
pub use ledger::TraceLedger;
pub use mode::RuntimeMode;
pub use state::{ResourceKind, ResourceToken, Runtime, RuntimeConfig, RuntimeError};

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch, saturating to zero on clock skew.
#[must_use]
pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

// ═══════════════════════════════════════════════════════════════════
// Test Helpers: shared assertion and logging utilities
// ═══════════════════════════════════════════════════════════════════

/// Structured test log entry for forensic comparison across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestLogEntry {
    pub test_id: String,
    pub timestamp_ms: u64,
    pub level: TestLogLevel,
    pub module: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<RuntimeMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_error: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TestResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestLogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    Pass,
    Fail,
    Skip,
}

impl TestLogEntry {
    #[must_use]
    pub fn new(
        test_id: impl Into<String>,
        module: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            timestamp_ms: now_unix_ms(),
            level: TestLogLevel::Info,
            module: module.into(),
            message: message.into(),
            seed: None,
            mode: None,
            max_error: None,
            result: None,
        }
    }

    #[must_use]
    pub fn with_result(mut self, result: TestResult) -> Self {
        self.result = Some(result);
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: RuntimeMode) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub fn with_max_error(mut self, max_error: f64) -> Self {
        self.max_error = Some(max_error);
        self
    }

    /// Serialize to JSON line for structured logging.
    #[must_use]
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Assert two f64 values are close within combined absolute and relative tolerance.
///
/// Uses the formula: |actual - expected| <= atol + rtol * |expected|
pub fn assert_close(actual: f64, expected: f64, atol: f64, rtol: f64) {
    let tol = atol + rtol * expected.abs();
    assert!(
        (actual - expected).abs() <= tol,
        "assert_close failed: actual={actual} expected={expected} diff={} tol={tol} (atol={atol}, rtol={rtol})",
        (actual - expected).abs()
    );
}

/// Assert two complex slices (as `(re, im)` pairs) are element-wise close.
pub fn assert_close_complex_slice(
    actual: &[(f64, f64)],
    expected: &[(f64, f64)],
    atol: f64,
    rtol: f64,
) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "assert_close_complex_slice: length mismatch: actual={} expected={}",
        actual.len(),
        expected.len()
    );
    for (idx, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        let tol_re = atol + rtol * e.0.abs();
        let tol_im = atol + rtol * e.1.abs();
        assert!(
            (a.0 - e.0).abs() <= tol_re && (a.1 - e.1).abs() <= tol_im,
            "assert_close_complex_slice[{idx}]: actual={a:?} expected={e:?} (atol={atol}, rtol={rtol})"
        );
    }
}

/// Largest component-wise absolute difference between two complex slices.
///
/// Returns `f64::INFINITY` on length mismatch.
#[must_use]
pub fn max_abs_error(actual: &[(f64, f64)], expected: &[(f64, f64)]) -> f64 {
    if actual.len() != expected.len() {
        return f64::INFINITY;
    }
    actual
        .iter()
        .zip(expected)
        .map(|(a, e)| (a.0 - e.0).abs().max((a.1 - e.1).abs()))
        .fold(0.0, f64::max)
}

/// Check if a value is within tolerance of expected.
#[must_use]
pub fn within_tolerance(actual: f64, expected: f64, atol: f64, rtol: f64) -> bool {
    let tol = atol + rtol * expected.abs();
    (actual - expected).abs() <= tol
}

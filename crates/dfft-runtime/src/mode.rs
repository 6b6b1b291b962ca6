#![forbid(unsafe_code)]

//! Runtime mode definitions for Strict and Hardened operation.

use serde::{Deserialize, Serialize};

/// Operational mode governing how much validation the engine performs.
///
/// - **Strict**: validate descriptors, scratch bindings and buffer aliasing;
///   sample values are passed to the device untouched.
/// - **Hardened**: everything Strict does, plus execute-time rejection of
///   non-finite input samples before any output is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RuntimeMode {
    #[default]
    Strict,
    Hardened,
}

impl RuntimeMode {
    #[must_use]
    pub const fn checks_finite(self) -> bool {
        matches!(self, Self::Hardened)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Hardened => "Hardened",
        }
    }
}

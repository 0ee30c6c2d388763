//! Shared error kind for the error taxonomy in §7.
//!
//! No `thiserror`/`anyhow` dependency anywhere in this workspace; this
//! is a hand-written enum implementing
//! `core::fmt::Display` and, under `std`, `std::error::Error`.

#[cfg(not(feature = "std"))]
use alloc::string::String;
#[cfg(feature = "std")]
use std::string::String;

use core::fmt;

/// One of the error kinds enumerated in §7. Every variant is reported
/// through a [`crate::log::LogSink`] and, where applicable, folded into a
/// pass-level invalidity flag; only [`CoreError::DoubleVisit`] (an
/// unrecoverable programming bug per §7) is meant to propagate as a hard
/// error to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// A parameter's source points to a port that is not registered.
    UnresolvedReference { detail: String },
    /// No rule matched a node's bound sources.
    TypeMismatch { detail: String },
    /// The function's dataflow graph contains a cycle.
    CycleDetected { detail: String },
    /// A `FunctionGradient`/`NormalizeDistanceField` could not be lowered
    /// (e.g. selected scalar output or vector input missing).
    LoweringInfeasible { detail: String },
    /// A backend does not support emitting this construct.
    UnsupportedInBackend { detail: String },
    /// A node was visited twice within one traversal. Always a
    /// programming bug, never recoverable.
    DoubleVisit { detail: String },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::UnresolvedReference { detail } => {
                write!(f, "unresolved reference: {detail}")
            }
            CoreError::TypeMismatch { detail } => write!(f, "type mismatch: {detail}"),
            CoreError::CycleDetected { detail } => write!(f, "cycle detected: {detail}"),
            CoreError::LoweringInfeasible { detail } => {
                write!(f, "lowering infeasible: {detail}")
            }
            CoreError::UnsupportedInBackend { detail } => {
                write!(f, "unsupported in backend: {detail}")
            }
            CoreError::DoubleVisit { detail } => write!(f, "node visited twice: {detail}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = CoreError::TypeMismatch { detail: "Add#3".into() };
        assert!(format!("{err}").contains("Add#3"));
    }
}

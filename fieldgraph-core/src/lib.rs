//! # Field Graph Core
//!
//! Foundational value/type system shared by every other crate in the field
//! graph compiler: the closed set of semantic value types (§3), the rule
//! types used for polymorphic-operator selection (§4.1), the severity-tagged
//! logging sink (§6.3), and the cooperative tokens that serialize access to
//! an assembly and to the GPU runtime (§5).
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       FIELD GRAPH CORE                        │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                                │
//! │   value.rs   Scalar / Vec3 / Mat4 / ResourceId, arithmetic     │
//! │   types.rs   ValueType, Rule, component counts                │
//! │   ops.rs     Op table: per-op accepted rules                  │
//! │   log.rs     Severity, LogEvent, LogSink (Console / Silent)   │
//! │   token.rs   AssemblyToken, ComputeToken                      │
//! │   error.rs   CoreError                                        │
//! │                                                                │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`value`] - concrete value representation and arithmetic
//! - [`types`] - the type/rule system
//! - [`ops`] - polymorphic operator table
//! - [`log`] - logging sink
//! - [`token`] - cooperative assembly/compute tokens
//! - [`error`] - shared error kind

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod error;
pub mod log;
pub mod ops;
#[cfg(feature = "std")]
pub mod token;
pub mod types;
pub mod value;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::CoreError;
    pub use crate::log::{LogEvent, LogSink, OutputMode, Severity};
    pub use crate::ops::Op;
    #[cfg(feature = "std")]
    pub use crate::token::{AssemblyToken, ComputeToken};
    pub use crate::types::{Rule, ValueType};
    pub use crate::value::{Mat4, ResourceId, Scalar, Value, Vec3};
}

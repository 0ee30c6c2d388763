//! # Field Graph — Compiler Passes
//!
//! Component C4: type inference and rule selection, topological ordering,
//! output-use propagation, dead-code elimination, and the lowering of the
//! two higher-level node references (`FunctionGradient`,
//! `NormalizeDistanceField`) into pure arithmetic (§4.4).
//!
//! ## Modules
//!
//! - [`inference`] - rule selection and type stamping (§4.4.1)
//! - [`ordering`] - topological order driver (§4.4.2)
//! - [`use_marking`] - output-use propagation across call boundaries (§4.4.3)
//! - [`dce`] - dead-code elimination driver (§4.4.4)
//! - [`lowering`] - `FunctionGradient`/`NormalizeDistanceField` lowering
//!   (§4.4.5, §4.4.6)
//! - [`pipeline`] - the end-to-end driver tying every pass together

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod dce;
pub mod inference;
pub mod lowering;
pub mod ordering;
pub mod pipeline;
pub mod use_marking;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::dce::run_dce;
    pub use crate::inference::infer_assembly;
    pub use crate::lowering::{lower_gradients, lower_normalizes, LoweringCache};
    pub use crate::ordering::order_assembly;
    pub use crate::pipeline::{run_pipeline, PipelineConfig, PipelineReport};
    pub use crate::use_marking::propagate_use;
}

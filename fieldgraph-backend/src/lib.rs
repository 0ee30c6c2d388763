//! # Field Graph — Codegen Backends
//!
//! Component C5 of the compiler: the two executable forms emitted from one
//! semantic graph (§4.5).
//!
//! ## Modules
//!
//! - [`traversal`] - the shared per-function walk both backends drive
//!   codegen from, plus cross-function reachability and emission
//!   memoization
//! - [`rules`] - the op/rule → output-type and op/rule → opcode-name
//!   tables both backends read from, so they can't drift apart (§9)
//! - [`kernel`] - kernel-source backend: one function body per reachable
//!   assembly function, in a small C-like expression language (§4.5.1)
//! - [`command`] - command-stream backend: a single linear opcode buffer
//!   with every `FunctionCall` inlined (§4.5.2)
//!
//! `interpreter` is a private, diagnostic-only textual executor for the
//! command stream; it isn't part of this crate's public surface.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod command;
mod interpreter;
pub mod kernel;
mod rules;
pub mod traversal;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::command::{emit_command_stream, Command, CommandError, CommandStream};
    pub use crate::kernel::{emit_kernel_module, BackendError, KernelModule};
    pub use crate::traversal::{drive, reachable_functions, EmissionMemo, NodeVisitor, TraversalError};
}

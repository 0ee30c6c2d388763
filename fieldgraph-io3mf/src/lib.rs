//! # Field Graph — 3MF Structural I/O
//!
//! The boundary named in §6: a [`document::SceneDocument`] is the
//! structural contract between this crate and a real 3MF archive
//! reader/writer (OPC parts, relationships, XML) that this workspace
//! doesn't implement. [`import::import_scene`] turns one into an
//! [`fieldgraph_assembly::assembly::Assembly`]; [`export::export_scene`]
//! turns an assembly back into one.
//!
//! Unlike the rest of the workspace, this crate is `std`-only — archive
//! I/O has no useful `no_std` story, and none of its callers need one.
//!
//! ## Modules
//!
//! - [`document`] - the structural value type this crate trades
//! - [`import`] - archive-order mapping into an assembly (§6.1)
//! - [`export`] - assembly back to archive-order resources (§6.1)
//! - [`mesh`] - vertex welding and mesh-resource lookup (§6.2)

#![warn(missing_docs)]

pub mod document;
pub mod export;
pub mod import;
pub mod mesh;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::document::{
        BuildItemDoc, FunctionFromImage3DDoc, ImplicitFunctionDoc, ImplicitInputDoc,
        ImplicitNodeDoc, InputValueDoc, LevelSetDoc, MeshDoc, MetadataDoc, NodeTypeDoc,
        SceneDocument, Transform12, Unit,
    };
    pub use crate::export::export_scene;
    pub use crate::import::import_scene;
    pub use crate::mesh::{resolve_mesh, weld_triangle_soup, MeshError, WELD_TOLERANCE};
}

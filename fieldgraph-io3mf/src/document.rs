//! The structural value type this crate imports from and exports to.
//!
//! [`SceneDocument`] models the already-parsed contents of a 3MF package's
//! implicit-geometry extension: it doesn't touch OPC parts, relationships,
//! or XML — a real reader/writer sits on either side of this boundary and
//! trades `SceneDocument`s with [`crate::import::import_scene`] and
//! [`crate::export::export_scene`].

use fieldgraph_core::types::ValueType;

/// The 3MF `unit` attribute on a model's base coordinate system. Every
/// length in a document is expressed in this unit; [`Unit::units_per_mm`]
/// is the conversion factor the importer multiplies transforms by to
/// reach the millimeter space the rest of the graph assumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Micrometer,
    Millimeter,
    Centimeter,
    Meter,
    Inch,
    Foot,
}

impl Unit {
    /// Millimeters per unit of `self`.
    pub const fn units_per_mm(&self) -> f32 {
        match self {
            Unit::Micrometer => 0.001,
            Unit::Millimeter => 1.0,
            Unit::Centimeter => 10.0,
            Unit::Meter => 1000.0,
            Unit::Inch => 25.4,
            Unit::Foot => 304.8,
        }
    }
}

impl Default for Unit {
    fn default() -> Self {
        Unit::Millimeter
    }
}

/// A 3MF `transform` attribute: three row vectors of a 4x3 affine
/// transform (rotation/scale in the first three components of each row,
/// translation in the fourth row), exactly as it appears in the markup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform12(pub [f32; 12]);

impl Transform12 {
    pub const IDENTITY: Self =
        Self([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
}

impl Default for Transform12 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// The closed set of 3MF implicit node types this crate maps 1:1 onto
/// [`fieldgraph_graph::node::NodeKind`]/[`fieldgraph_core::ops::Op`].
/// `Pow` is the one type the archive format defines that the core type
/// system has no operator for; it's kept in this enum so the importer
/// can recognize and report it rather than silently dropping the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTypeDoc {
    Addition,
    Subtraction,
    Multiplication,
    Division,
    Constant,
    ConstVec,
    ConstMat,
    ConstResourceId,
    ComposeVector,
    DecomposeVector,
    ComposeMatrix,
    MatrixFromColumns,
    MatrixFromRows,
    Dot,
    Cross,
    MatVecMultiplication,
    Transpose,
    Inverse,
    Sinus,
    Cosinus,
    Tan,
    ArcSin,
    ArcCos,
    ArcTan,
    ArcTan2,
    Min,
    Max,
    Abs,
    Fmod,
    Mod,
    Sqrt,
    Exp,
    Log,
    Log2,
    Log10,
    Select,
    Clamp,
    Sinh,
    Cosh,
    Tanh,
    Round,
    Ceil,
    Floor,
    Sign,
    Fract,
    Length,
    VectorFromScalar,
    Mesh,
    UnsignedMesh,
    FunctionCall,
    Pow,
}

/// One input slot on an implicit node: either a literal float (the form
/// a `Constant`/`ConstVec`/`ConstMat`/`ConstResourceId` node's own
/// components take) or a `"NodeName.Port"` reference to another node's
/// output, where the node name `"inputs"` denotes the function's own
/// argument list.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValueDoc {
    Reference(String),
    Literal(f32),
}

/// One named input on an implicit node.
#[derive(Debug, Clone, PartialEq)]
pub struct ImplicitInputDoc {
    pub name: String,
    pub value: InputValueDoc,
}

/// One node inside an implicit function's body.
#[derive(Debug, Clone, PartialEq)]
pub struct ImplicitNodeDoc {
    /// Unique within the owning function; how other nodes' references
    /// name this one.
    pub name: String,
    pub node_type: NodeTypeDoc,
    /// `FunctionCall` nodes carry the model resource id of their callee
    /// here; every other node type leaves this `None`.
    pub function_reference: Option<u32>,
    pub inputs: Vec<ImplicitInputDoc>,
}

/// One implicit function resource: a named graph of [`ImplicitNodeDoc`]s
/// with a declared argument list and result list.
#[derive(Debug, Clone, PartialEq)]
pub struct ImplicitFunctionDoc {
    pub model_resource_id: u32,
    pub display_name: String,
    pub inputs: Vec<(String, ValueType)>,
    pub outputs: Vec<(String, ValueType)>,
    pub nodes: Vec<ImplicitNodeDoc>,
}

/// A `functionfromimage3d` resource: a function synthesized from
/// sampling a 3D image stack.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionFromImage3DDoc {
    pub model_resource_id: u32,
    pub display_name: String,
    pub image_resource_id: u32,
    pub scale: f32,
    pub offset: f32,
}

/// A reference to a triangle mesh, either an import source or an export
/// target for [`crate::mesh`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshDoc {
    pub model_resource_id: u32,
    pub vertices: Vec<[f32; 3]>,
    pub triangles: Vec<[u32; 3]>,
}

/// A `levelset` resource: an implicit function evaluated over a domain
/// (the domain is either the function's own declared bounding box, or a
/// reference mesh's bounding box/distance field), with its own transform
/// relative to the function and an optional fallback value outside the
/// domain.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSetDoc {
    pub model_resource_id: u32,
    pub function_model_resource_id: u32,
    pub transform: Transform12,
    pub mesh_bbox_min: [f32; 3],
    pub mesh_bbox_max: [f32; 3],
    /// `Some` selects the mesh's own signed distance field as the domain
    /// boundary instead of the plain bounding box.
    pub mesh_model_resource_id: Option<u32>,
    pub fallback_value: Option<f32>,
}

/// One `item` in the model's `build` list: places an object resource
/// (mesh or level set) into the scene at `transform`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildItemDoc {
    pub object_model_resource_id: u32,
    pub transform: Transform12,
}

/// Archive-level metadata the writer fills in if the caller hasn't
/// already set it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataDoc {
    pub application_name: Option<String>,
    pub creation_date_utc: Option<String>,
}

/// The complete structural contents of one 3MF package's implicit
/// geometry, as handed to/from a real archive reader/writer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneDocument {
    pub unit: Unit,
    pub functions: Vec<ImplicitFunctionDoc>,
    pub image_functions: Vec<FunctionFromImage3DDoc>,
    pub level_sets: Vec<LevelSetDoc>,
    pub meshes: Vec<MeshDoc>,
    pub build_items: Vec<BuildItemDoc>,
    pub metadata: MetadataDoc,
}

//! Node subtypes and categories (§3 "Node").
//!
//! A closed set of subtypes, each owning its default port/parameter layout,
//! dispatched on in both the inference pass and the two backends by
//! pattern match rather than a vtable (§9 "Deep inheritance → tagged
//! variants + a single base contract").

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec, vec::Vec};
#[cfg(feature = "std")]
use std::vec::Vec;

use fieldgraph_core::ops::Op;
use fieldgraph_core::types::{Rule, ValueType};

use crate::id::{NodeId, ParameterId, PortId};

/// Node category, per the closed set in §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeCategory {
    Internal,
    Math,
    Primitive,
    Transformation,
    BoolOp,
    Lattice,
    Misc,
    Export,
    ThreeMf,
}

/// Name given to the single parameter that carries a resolvable
/// [`fieldgraph_core::value::ResourceId`] on `FunctionCall`,
/// `FunctionGradient` and `NormalizeDistanceField` nodes. The linker
/// looks this parameter up by name when re-mirroring call I/O (§4.3, open
/// question: "a single re-mirror pass owned by the linker").
pub const FUNCTION_ID_PARAMETER: &str = "Function";

/// A node subtype. The closed set named in §3: `Begin`/`End` (exactly one
/// of each per function), literal `Constant`s, the polymorphic `Math`
/// family (§4.1), `FunctionCall`, and the two higher-level references
/// that the lowering pass (§4.4.5, §4.4.6) rewrites away.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// The function's single entry point; its output ports mirror the
    /// function's argument list.
    Begin,
    /// The function's single exit point; its parameters are the
    /// function's outputs.
    End,
    /// A literal value node. Its parameters are the value's own
    /// components (`Value` for a scalar; `X`,`Y`,`Z` for a `Vec3`;
    /// `M00..M33` for a `Mat4`; `Id` for a `ResourceId`) — each of which
    /// may, like any other parameter, be bound to a source instead of
    /// left as a literal (§6.1: "Constants set the node's literal
    /// parameter values"). Its single output is the composed value.
    Constant(ValueType),
    /// A polymorphic math operator (§4.1); the rule is fixed by type
    /// inference, not by construction.
    Math(Op),
    /// Calls another function in the assembly; inputs/outputs are
    /// mirrored by the linker from the callee's `Begin`/`End` (§4.3).
    FunctionCall,
    /// `∇f` of a scalar output w.r.t. a `Vec3` input, by central
    /// differences (§4.4.5). Lowered into a `FunctionCall` plus pure
    /// arithmetic before any backend sees it.
    FunctionGradient { step_size: f32, scalar_output: String, vector_input: String },
    /// `f(x) / max(|∇f|(x), ε)` for a chosen scalar output (§4.4.6).
    /// Lowered the same way.
    NormalizeDistanceField { scalar_output: String, vector_input: String },
}

impl NodeKind {
    /// The node's category (§3).
    pub fn category(&self) -> NodeCategory {
        match self {
            NodeKind::Begin | NodeKind::End => NodeCategory::Internal,
            NodeKind::Constant(ValueType::ResourceId) => NodeCategory::ThreeMf,
            NodeKind::Constant(_) => NodeCategory::Misc,
            NodeKind::Math(op) => match op {
                Op::SignedDistanceToMesh
                | Op::UnsignedDistanceToMesh
                | Op::ImageSampler
                | Op::BoxMinMax => NodeCategory::Primitive,
                Op::Min | Op::Max => NodeCategory::BoolOp,
                Op::MatrixVectorMul
                | Op::Transpose
                | Op::Inverse
                | Op::ComposeMatrix
                | Op::ComposeMatrixFromColumns
                | Op::ComposeMatrixFromRows => NodeCategory::Transformation,
                _ => NodeCategory::Math,
            },
            NodeKind::FunctionCall
            | NodeKind::FunctionGradient { .. }
            | NodeKind::NormalizeDistanceField { .. } => NodeCategory::Misc,
        }
    }

    /// Display name derived from the subtype, before any user rename
    /// (mirrors `ShaderNode::new`'s `format!("{:?}", node_type)` default).
    pub fn default_display_name(&self) -> String {
        match self {
            NodeKind::Begin => "Begin".into(),
            NodeKind::End => "End".into(),
            NodeKind::Constant(ty) => match ty {
                ValueType::Scalar => "ConstantScalar".into(),
                ValueType::Vec3 => "ConstantVec3".into(),
                ValueType::Mat4 => "ConstantMat4".into(),
                ValueType::ResourceId => "ResourceRef".into(),
            },
            NodeKind::Math(op) => String::from(op.name()),
            NodeKind::FunctionCall => "FunctionCall".into(),
            NodeKind::FunctionGradient { .. } => "FunctionGradient".into(),
            NodeKind::NormalizeDistanceField { .. } => "NormalizeDistanceField".into(),
        }
    }

    /// Parameter `(name, type)` pairs a freshly created node of this kind
    /// starts with. `Begin`/`FunctionCall`/the lowering references grow
    /// their parameter list dynamically (argument mirroring), so they
    /// start from a minimal fixed set.
    pub fn default_parameters(&self) -> Vec<(String, ValueType)> {
        match self {
            NodeKind::Begin => Vec::new(),
            NodeKind::End => vec![
                ("Shape".into(), ValueType::Scalar),
                ("Color".into(), ValueType::Vec3),
            ],
            NodeKind::Constant(ty) => match ty {
                ValueType::Scalar => vec![("Value".into(), ValueType::Scalar)],
                ValueType::Vec3 => vec![
                    ("X".into(), ValueType::Scalar),
                    ("Y".into(), ValueType::Scalar),
                    ("Z".into(), ValueType::Scalar),
                ],
                ValueType::Mat4 => (0..4)
                    .flat_map(|r| (0..4).map(move |c| (r, c)))
                    .map(|(r, c)| (mat4_component_name(r, c), ValueType::Scalar))
                    .collect(),
                ValueType::ResourceId => vec![("Id".into(), ValueType::ResourceId)],
            },
            NodeKind::Math(op) => {
                if op.is_elementwise() {
                    // Before inference runs, every elementwise operand starts
                    // out declared `Scalar`; the rule (and with it every
                    // operand's real type) is picked from bound sources,
                    // not fixed at construction (§4.4.1).
                    let names: &[&str] = match op.operand_count() {
                        1 => &["a"],
                        2 => &["a", "b"],
                        3 => &["a", "b", "c"],
                        4 => &["a", "b", "c", "d"],
                        _ => &[],
                    };
                    if names.is_empty() {
                        (0..op.operand_count())
                            .map(|i| (alloc_index_name(i), ValueType::Scalar))
                            .collect()
                    } else {
                        names.iter().map(|n| (String::from(*n), ValueType::Scalar)).collect()
                    }
                } else {
                    fixed_operand_types(*op)
                }
            }
            NodeKind::FunctionCall => vec![(FUNCTION_ID_PARAMETER.into(), ValueType::ResourceId)],
            NodeKind::FunctionGradient { .. } => {
                vec![(FUNCTION_ID_PARAMETER.into(), ValueType::ResourceId)]
            }
            NodeKind::NormalizeDistanceField { .. } => {
                vec![(FUNCTION_ID_PARAMETER.into(), ValueType::ResourceId)]
            }
        }
    }

    /// Output `(name, type)` pairs a freshly created node of this kind
    /// starts with.
    pub fn default_outputs(&self) -> Vec<(String, ValueType)> {
        match self {
            NodeKind::Begin => Vec::new(),
            NodeKind::End => Vec::new(),
            NodeKind::Constant(ty) => vec![("value".into(), *ty)],
            NodeKind::Math(op) => {
                let rule = op.accepted_rules().first().copied().unwrap_or(Rule::Scalar);
                match op {
                    Op::Dot | Op::Length => vec![("value".into(), ValueType::Scalar)],
                    Op::Cross | Op::MatrixVectorMul | Op::ComposeVector | Op::VectorFromScalar
                    | Op::ImageSampler => vec![("value".into(), ValueType::Vec3)],
                    Op::SignedDistanceToMesh | Op::UnsignedDistanceToMesh | Op::BoxMinMax => {
                        vec![("value".into(), ValueType::Scalar)]
                    }
                    Op::Transpose | Op::Inverse | Op::ComposeMatrix
                    | Op::ComposeMatrixFromColumns | Op::ComposeMatrixFromRows => {
                        vec![("value".into(), ValueType::Mat4)]
                    }
                    Op::DecomposeVector => vec![
                        ("x".into(), ValueType::Scalar),
                        ("y".into(), ValueType::Scalar),
                        ("z".into(), ValueType::Scalar),
                    ],
                    _ => vec![("value".into(), rule.value_type().unwrap_or(ValueType::Scalar))],
                }
            }
            NodeKind::FunctionCall => Vec::new(),
            NodeKind::FunctionGradient { .. } => vec![
                ("Vector".into(), ValueType::Vec3),
                ("Magnitude".into(), ValueType::Scalar),
            ],
            NodeKind::NormalizeDistanceField { .. } => {
                vec![("Distance".into(), ValueType::Scalar)]
            }
        }
    }
}

fn mat4_component_name(row: usize, col: usize) -> String {
    match (row, col) {
        (0, 0) => "M00".into(), (0, 1) => "M01".into(), (0, 2) => "M02".into(), (0, 3) => "M03".into(),
        (1, 0) => "M10".into(), (1, 1) => "M11".into(), (1, 2) => "M12".into(), (1, 3) => "M13".into(),
        (2, 0) => "M20".into(), (2, 1) => "M21".into(), (2, 2) => "M22".into(), (2, 3) => "M23".into(),
        (3, 0) => "M30".into(), (3, 1) => "M31".into(), (3, 2) => "M32".into(), (3, 3) => "M33".into(),
        _ => unreachable!("mat4 component indices are in 0..4"),
    }
}

/// Operand `(name, type)` pairs for a fixed-shape [`Op`] (§4.1: these
/// never take part in rule selection, their operand widths are part of
/// the operator's own identity).
fn fixed_operand_types(op: Op) -> Vec<(String, ValueType)> {
    use ValueType::*;
    match op {
        Op::Dot | Op::Cross => {
            vec![("a".into(), Vec3), ("b".into(), Vec3)]
        }
        Op::Length | Op::DecomposeVector | Op::VectorFromScalar | Op::Transpose | Op::Inverse => {
            let ty = if matches!(op, Op::Transpose | Op::Inverse) { Mat4 } else if matches!(op, Op::Length | Op::DecomposeVector) { Vec3 } else { Scalar };
            vec![("a".into(), ty)]
        }
        Op::MatrixVectorMul => vec![("a".into(), Mat4), ("b".into(), Vec3)],
        Op::ComposeVector => {
            vec![("x".into(), Scalar), ("y".into(), Scalar), ("z".into(), Scalar)]
        }
        Op::ComposeMatrix => (0..4)
            .flat_map(|r| (0..4).map(move |c| (r, c)))
            .map(|(r, c)| (mat4_component_name(r, c), Scalar))
            .collect(),
        Op::ComposeMatrixFromColumns => {
            vec![("c0".into(), Vec3), ("c1".into(), Vec3), ("c2".into(), Vec3), ("c3".into(), Vec3)]
        }
        Op::ComposeMatrixFromRows => {
            vec![("r0".into(), Vec3), ("r1".into(), Vec3), ("r2".into(), Vec3), ("r3".into(), Vec3)]
        }
        Op::SignedDistanceToMesh | Op::UnsignedDistanceToMesh => {
            vec![("pos".into(), Vec3), ("mesh".into(), ResourceId), ("aux".into(), ResourceId)]
        }
        Op::ImageSampler => vec![("pos".into(), Vec3), ("image".into(), ResourceId)],
        Op::BoxMinMax => vec![("pos".into(), Vec3), ("min".into(), Vec3), ("max".into(), Vec3)],
        _ => unreachable!("fixed_operand_types called for an elementwise op"),
    }
}

fn alloc_index_name(i: usize) -> String {
    match i {
        0 => "a".into(),
        1 => "b".into(),
        2 => "c".into(),
        3 => "d".into(),
        _ => alloc_format(i),
    }
}

#[cfg(feature = "std")]
fn alloc_format(i: usize) -> String {
    format!("arg{i}")
}

#[cfg(not(feature = "std"))]
fn alloc_format(i: usize) -> String {
    alloc::format!("arg{i}")
}

/// A node instance: subtype, identity, and the concrete parameters/ports
/// allocated for it within its owning function.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    unique_name: String,
    display_name: String,
    parameters: Vec<ParameterId>,
    outputs: Vec<PortId>,
    /// The width-variant selected by type inference (§4.4.1). `None`
    /// until inference has run, and always `None` for node kinds that
    /// are not polymorphic.
    rule: Option<Rule>,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind, unique_name: String) -> Self {
        let display_name = kind.default_display_name();
        Self {
            id,
            kind,
            unique_name,
            display_name,
            parameters: Vec::new(),
            outputs: Vec::new(),
            rule: None,
        }
    }

    pub fn rule(&self) -> Option<Rule> {
        self.rule
    }

    /// Set by the inference pass once it selects a rule for this node
    /// (§4.4.1).
    pub fn set_rule(&mut self, rule: Option<Rule>) {
        self.rule = rule;
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn category(&self) -> NodeCategory {
        self.kind.category()
    }

    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) {
        self.display_name = name.into();
    }

    pub fn parameters(&self) -> &[ParameterId] {
        &self.parameters
    }

    pub fn outputs(&self) -> &[PortId] {
        &self.outputs
    }

    pub(crate) fn push_parameter(&mut self, id: ParameterId) {
        self.parameters.push(id);
    }

    pub(crate) fn push_output(&mut self, id: PortId) {
        self.outputs.push(id);
    }

    pub(crate) fn retain_parameters(&mut self, keep: impl Fn(ParameterId) -> bool) {
        self.parameters.retain(|id| keep(*id));
    }

    pub(crate) fn retain_outputs(&mut self, keep: impl Fn(PortId) -> bool) {
        self.outputs.retain(|id| keep(*id));
    }

    pub fn is_begin(&self) -> bool {
        matches!(self.kind, NodeKind::Begin)
    }

    pub fn is_end(&self) -> bool {
        matches!(self.kind, NodeKind::End)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_node_category_depends_on_value_type() {
        let scalar = NodeKind::Constant(ValueType::Scalar);
        assert_eq!(scalar.category(), NodeCategory::Misc);

        let resource = NodeKind::Constant(ValueType::ResourceId);
        assert_eq!(resource.category(), NodeCategory::ThreeMf);
    }

    #[test]
    fn constant_vec3_has_xyz_parameters() {
        let names: Vec<_> = NodeKind::Constant(ValueType::Vec3)
            .default_parameters()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["X".to_string(), "Y".to_string(), "Z".to_string()]);
    }

    #[test]
    fn constant_mat4_has_sixteen_named_parameters() {
        let params = NodeKind::Constant(ValueType::Mat4).default_parameters();
        assert_eq!(params.len(), 16);
        assert!(params.iter().all(|(_, ty)| *ty == ValueType::Scalar));
        assert_eq!(params[0].0, "M00");
        assert_eq!(params[15].0, "M33");
    }

    #[test]
    fn min_max_are_bool_ops_per_sdf_convention() {
        assert_eq!(NodeKind::Math(Op::Min).category(), NodeCategory::BoolOp);
        assert_eq!(NodeKind::Math(Op::Max).category(), NodeCategory::BoolOp);
    }

    #[test]
    fn add_default_parameters_are_a_and_b() {
        let names: Vec<_> = NodeKind::Math(Op::Add)
            .default_parameters()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn fixed_shape_ops_declare_their_real_operand_types() {
        let params = NodeKind::Math(Op::Dot).default_parameters();
        assert_eq!(params, vec![("a".to_string(), ValueType::Vec3), ("b".to_string(), ValueType::Vec3)]);

        let params = NodeKind::Math(Op::MatrixVectorMul).default_parameters();
        assert_eq!(params, vec![("a".to_string(), ValueType::Mat4), ("b".to_string(), ValueType::Vec3)]);

        let params = NodeKind::Math(Op::ImageSampler).default_parameters();
        assert_eq!(params, vec![("pos".to_string(), ValueType::Vec3), ("image".to_string(), ValueType::ResourceId)]);
    }
}

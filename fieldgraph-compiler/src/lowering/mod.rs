//! Lowering: rewrites `FunctionGradient` and `NormalizeDistanceField`
//! nodes into `FunctionCall`s plus pure arithmetic before either backend
//! sees them (§4.4.5, §4.4.6).
//!
//! Each lowering is a function over an [`Assembly`] that mutates it in
//! place and returns a count of nodes rewritten, the same shape as the
//! other passes in this crate — run as two stages of the compiler
//! pipeline's pass list.

#[cfg(not(feature = "std"))]
use alloc::{collections::BTreeMap, string::String, vec::Vec};
#[cfg(feature = "std")]
use std::collections::BTreeMap;

use fieldgraph_core::ops::Op;
use fieldgraph_core::types::ValueType;
use fieldgraph_core::value::{ResourceId, Value};
use fieldgraph_graph::function::Function;
use fieldgraph_graph::id::{NodeId, ParameterId, PortId};
use fieldgraph_graph::node::{NodeKind, FUNCTION_ID_PARAMETER};

mod gradient;
mod normalize;

pub use gradient::lower_gradients;
pub use normalize::lower_normalizes;

/// Memoizes the helper functions lowering synthesizes, keyed by
/// `(callee-id, scalar-output-name, vector-input-name)` so repeated
/// `FunctionGradient`/`NormalizeDistanceField` nodes over the same
/// signature share one helper. Gradient helpers and normalize wrapper
/// helpers are distinct functions built for different purposes, so they
/// live in separate maps even though both are keyed the same way.
#[derive(Debug, Default, Clone)]
pub struct LoweringCache {
    gradients: BTreeMap<(ResourceId, String, String), ResourceId>,
    normalize_wrappers: BTreeMap<(ResourceId, String, String), ResourceId>,
}

impl LoweringCache {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Resolves a `FunctionCall`/`FunctionGradient`/`NormalizeDistanceField`
/// node's `Function` parameter to a callee id. `None` if it is unbound
/// to a valid literal (that parameter is never meant to carry a source).
pub(crate) fn resolve_function_id(function: &Function, node_id: NodeId) -> Option<ResourceId> {
    let node = function.node(node_id)?;
    node.parameters()
        .iter()
        .filter_map(|pid| function.parameter(*pid))
        .find(|p| p.name() == FUNCTION_ID_PARAMETER)
        .and_then(|p| match p.value() {
            Value::ResourceId(id) if p.source().is_none() => Some(id),
            _ => None,
        })
}

/// `(name, type)` for every output on a function's `Begin` node — its
/// mirrored argument list.
pub(crate) fn begin_signature(function: &Function) -> Vec<(String, ValueType)> {
    let begin = function.begin();
    let output_ids = function.node(begin).map(|n| n.outputs().to_vec()).unwrap_or_default();
    output_ids
        .iter()
        .filter_map(|pid| function.port(*pid))
        .map(|p| (String::from(p.name()), p.value_type()))
        .collect()
}

/// `(name, type)` for every parameter on a function's `End` node — its
/// output list (§3: "`End`'s parameters are the function's outputs").
pub(crate) fn end_signature(function: &Function) -> Vec<(String, ValueType)> {
    let end = function.end();
    let param_ids = function.node(end).map(|n| n.parameters().to_vec()).unwrap_or_default();
    param_ids
        .iter()
        .filter_map(|pid| function.parameter(*pid))
        .map(|p| (String::from(p.name()), p.value_type()))
        .collect()
}

/// The id and declared type of a named parameter on `node_id`, if any.
pub(crate) fn find_parameter(
    function: &Function,
    node_id: NodeId,
    name: &str,
) -> Option<(ParameterId, ValueType)> {
    let node = function.node(node_id)?;
    node.parameters()
        .iter()
        .filter_map(|pid| function.parameter(*pid).map(|p| (*pid, p)))
        .find(|(_, p)| p.name() == name)
        .map(|(pid, p)| (pid, p.value_type()))
}

/// The id of a named output port on `node_id`, if any.
pub(crate) fn find_output(function: &Function, node_id: NodeId, name: &str) -> Option<PortId> {
    let node = function.node(node_id)?;
    node.outputs().iter().copied().find(|pid| function.port(*pid).map(|p| p.name() == name).unwrap_or(false))
}

/// Creates a `Constant(Scalar)` node with a fixed literal value and
/// returns its output port.
pub(crate) fn const_scalar(function: &mut Function, value: f32) -> PortId {
    let node_id = function.create_node(NodeKind::Constant(ValueType::Scalar));
    let (param_id, _) =
        find_parameter(function, node_id, "Value").expect("Constant(Scalar) has a Value parameter");
    function.parameter_mut(param_id).expect("just looked up").set_value(Value::Scalar(value));
    find_output(function, node_id, "value").expect("Constant(Scalar) has one output")
}

/// Creates a `Math` node and links `inputs` onto its parameters
/// positionally, bypassing the type check — widths are not yet known
/// before inference re-runs over the lowered graph. Returns the node's
/// first output port.
pub(crate) fn math(function: &mut Function, op: Op, inputs: &[PortId]) -> PortId {
    let node_id = function.create_node(NodeKind::Math(op));
    let params: Vec<ParameterId> = function.node(node_id).expect("just created").parameters().to_vec();
    for (pid, source) in params.iter().zip(inputs.iter()) {
        function.link(*source, *pid, true).expect("fresh parameter accepts any source pre-inference");
    }
    function.node(node_id).expect("just created").outputs()[0]
}

/// Creates a `FunctionCall` to `callee_id`, adding one parameter per
/// `(name, type, source)` triple in `args` and linking it. Returns the
/// node id so the caller can add named outputs afterward.
pub(crate) fn call(function: &mut Function, callee_id: ResourceId, args: &[(&str, ValueType, PortId)]) -> NodeId {
    let node_id = function.create_node(NodeKind::FunctionCall);
    set_callee(function, node_id, callee_id);
    for (name, ty, source) in args {
        let pid = function.add_parameter(node_id, *name, *ty).expect("node exists");
        function.link(*source, pid, true).expect("fresh parameter accepts any source pre-inference");
    }
    node_id
}

/// Sets `node_id`'s `Function` parameter to `callee_id`.
pub(crate) fn set_callee(function: &mut Function, node_id: NodeId, callee_id: ResourceId) {
    let (fid_param, _) =
        find_parameter(function, node_id, FUNCTION_ID_PARAMETER).expect("node has a Function parameter");
    function.parameter_mut(fid_param).expect("just looked up").set_value(Value::ResourceId(callee_id));
}

/// Copies `original_param_id`'s binding (source if bound, else literal
/// value) onto a freshly added parameter of the same name/type on
/// `new_node_id`.
pub(crate) fn forward_argument(
    function: &mut Function,
    new_node_id: NodeId,
    name: &str,
    ty: ValueType,
    original_param_id: ParameterId,
) -> ParameterId {
    let pid = function.add_parameter(new_node_id, name, ty).expect("node exists");
    let original = function.parameter(original_param_id).expect("caller holds a valid id");
    if let Some(source) = original.source().map(|s| s.port) {
        function.link(source, pid, true).expect("fresh parameter accepts any source pre-inference");
    } else {
        let value = original.value();
        function.parameter_mut(pid).expect("just added").set_value(value);
    }
    pid
}

/// Redirects every parameter in `function` sourced from `old_port` (if
/// any) to `new_port`, e.g. when a lowered node's output port is replaced
/// by the output of the arithmetic that now computes the same value.
pub(crate) fn rewire_consumers(function: &mut Function, old_port: Option<PortId>, new_port: PortId) {
    let Some(old_port) = old_port else { return };
    let targets: Vec<ParameterId> = function
        .parameters()
        .filter(|p| p.source().map(|s| s.port) == Some(old_port))
        .map(|p| p.id())
        .collect();
    for pid in targets {
        function.link(new_port, pid, true).expect("fresh link, widths reconciled by the next inference pass");
    }
}

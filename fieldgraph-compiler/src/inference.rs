//! Type inference and rule selection (§4.1, §4.4.1).
//!
//! Pattern-matched dispatch on a closed node-subtype set: rather than a
//! trait object per node, `infer_node` switches on [`NodeKind`] and, for the polymorphic
//! `Math` family, picks the one [`Rule`] whose operand widths agree.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use fieldgraph_assembly::assembly::Assembly;
use fieldgraph_core::ops::Op;
use fieldgraph_core::types::{Rule, ValueType};
use fieldgraph_graph::function::{Function, FunctionError};
use fieldgraph_graph::id::{NodeId, ParameterId};
use fieldgraph_graph::node::NodeKind;
use fieldgraph_graph::port::Port;

/// Runs inference over every function in the assembly, in no particular
/// cross-function order (each function's inference is self-contained).
/// Returns the number of functions found invalid.
pub fn infer_assembly(assembly: &mut Assembly) -> usize {
    let mut invalid = 0;
    for function in assembly.functions_mut() {
        if !infer_function(function).unwrap_or(false) {
            invalid += 1;
        }
    }
    invalid
}

/// *Type inference and validation* (§4.4.1): rebuilds the topological
/// order if dirty, then walks it stamping each polymorphic node's rule
/// and operand/output types from its bound sources (propagating literal
/// types where unbound). Returns the function's resulting validity,
/// which is also stored via [`Function::set_valid`].
///
/// A [`FunctionError::DanglingPortReference`] from the underlying
/// `rebuild_order` propagates unchanged; a cyclic graph is reported as
/// `Ok(false)` per §4.4.8 ("cyclic graph: function invalid").
pub fn infer_function(function: &mut Function) -> Result<bool, FunctionError> {
    if function.is_dirty() {
        function.rebuild_order()?;
    }
    if !function.is_valid() {
        return Ok(false);
    }

    let order: Vec<NodeId> = function.topological_order().to_vec();
    let mut all_valid = true;
    for node_id in order {
        if !infer_node(function, node_id) {
            all_valid = false;
        }
    }
    function.set_valid(all_valid);
    Ok(all_valid)
}

/// Infers (or validates) one node. Returns `false` when the node's bound
/// sources are inconsistent with its declared or inferable type.
fn infer_node(function: &mut Function, node_id: NodeId) -> bool {
    let Some(node) = function.node(node_id) else { return true };
    if node.is_begin() || node.is_end() {
        return true;
    }
    let elementwise_op = match node.kind() {
        NodeKind::Math(op) if op.is_elementwise() => Some(*op),
        _ => None,
    };

    let parameter_ids: Vec<ParameterId> = node.parameters().to_vec();
    let effective_types: Vec<ValueType> =
        parameter_ids.iter().map(|pid| effective_type(function, *pid)).collect();

    match elementwise_op {
        Some(_op) => {
            let Some(first) = effective_types.first().copied() else {
                // No operands at all (shouldn't happen for any current
                // elementwise op, but a node with zero parameters has
                // nothing to disagree about).
                return true;
            };
            let consistent = effective_types.iter().all(|ty| *ty == first);
            let Some(rule) = consistent.then(|| Rule::for_value_type(first)).flatten() else {
                return false;
            };
            stamp_rule(function, node_id, rule, first, &parameter_ids);
            true
        }
        None => {
            // Fixed-shape nodes (Constant, fixed-rule Math, FunctionCall,
            // FunctionGradient, NormalizeDistanceField, Begin, End): their
            // declared types never change, only bound sources are
            // checked against them.
            parameter_ids.iter().zip(effective_types.iter()).all(|(pid, effective)| {
                function.parameter(*pid).map(|p| p.value_type() == *effective).unwrap_or(true)
            })
        }
    }
}

/// A parameter's type as seen by inference: its bound source's port type
/// if linked, else its own currently declared type (the literal it would
/// fall back to, per §4.1 "propagating literal-parameter types where no
/// source is bound").
fn effective_type(function: &Function, parameter_id: ParameterId) -> ValueType {
    let param = function.parameter(parameter_id).expect("parameter registered on its node");
    match param.source() {
        Some(source) => {
            function.port(source.port).map(Port::value_type).unwrap_or_else(|| param.value_type())
        }
        None => param.value_type(),
    }
}

fn stamp_rule(function: &mut Function, node_id: NodeId, rule: Rule, ty: ValueType, parameter_ids: &[ParameterId]) {
    for pid in parameter_ids {
        if let Some(p) = function.parameter_mut(*pid) {
            p.set_value_type(ty);
        }
    }
    let output_ids: Vec<_> = function.node(node_id).map(|n| n.outputs().to_vec()).unwrap_or_default();
    for port_id in output_ids {
        if let Some(p) = function.port_mut(port_id) {
            p.set_value_type(ty);
        }
    }
    if let Some(n) = function.node_mut(node_id) {
        n.set_rule(Some(rule));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgraph_core::value::ResourceId;

    fn new_function() -> Function {
        Function::new(ResourceId::new(1), "Test")
    }

    #[test]
    fn elementwise_node_adopts_rule_of_its_bound_source() {
        let mut func = new_function();
        let vec_const = func.create_node(NodeKind::Constant(ValueType::Vec3));
        let add = func.create_node(NodeKind::Math(Op::Add));
        let vec_out = func.node(vec_const).unwrap().outputs()[0];
        let add_in_a = func.node(add).unwrap().parameters()[0];
        let add_in_b = func.node(add).unwrap().parameters()[1];
        func.link(vec_out, add_in_a, true).unwrap();
        func.link(vec_out, add_in_b, true).unwrap();

        let valid = infer_function(&mut func).unwrap();
        assert!(valid);
        assert_eq!(func.node(add).unwrap().rule(), Some(Rule::Vec3));
        let add_out = func.node(add).unwrap().outputs()[0];
        assert_eq!(func.port(add_out).unwrap().value_type(), ValueType::Vec3);
    }

    #[test]
    fn elementwise_node_is_invalid_on_mismatched_operand_widths() {
        let mut func = new_function();
        let vec_const = func.create_node(NodeKind::Constant(ValueType::Vec3));
        let add = func.create_node(NodeKind::Math(Op::Add));
        let vec_out = func.node(vec_const).unwrap().outputs()[0];
        let add_in_a = func.node(add).unwrap().parameters()[0];
        // add_in_b stays an unbound Scalar literal, disagreeing with a.
        func.link(vec_out, add_in_a, true).unwrap();

        let valid = infer_function(&mut func).unwrap();
        assert!(!valid);
        assert!(func.node(add).unwrap().rule().is_none());
    }

    #[test]
    fn fixed_shape_node_rejects_a_mismatched_bound_source() {
        let mut func = new_function();
        let scalar_const = func.create_node(NodeKind::Constant(ValueType::Scalar));
        let dot = func.create_node(NodeKind::Math(Op::Dot));
        let scalar_out = func.node(scalar_const).unwrap().outputs()[0];
        let dot_in_a = func.node(dot).unwrap().parameters()[0];
        // Dot's "a" operand is declared Vec3; binding a Scalar source is
        // a structural type mismatch, not something a rule can absorb.
        func.link(scalar_out, dot_in_a, true).unwrap();

        let valid = infer_function(&mut func).unwrap();
        assert!(!valid);
    }

    #[test]
    fn function_with_no_math_nodes_is_trivially_valid() {
        let mut func = new_function();
        assert!(infer_function(&mut func).unwrap());
    }
}

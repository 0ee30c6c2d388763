//! Output-use propagation across function-call boundaries (§4.4.3).

#[cfg(not(feature = "std"))]
use alloc::{collections::BTreeSet, string::String, vec::Vec};
#[cfg(feature = "std")]
use std::collections::BTreeSet;

use fieldgraph_assembly::assembly::Assembly;
use fieldgraph_core::value::{ResourceId, Value};
use fieldgraph_graph::function::Function;
use fieldgraph_graph::id::PortId;
use fieldgraph_graph::node::{Node, NodeKind, FUNCTION_ID_PARAMETER};

/// *Output-use propagation* (§4.4.3): marks every output port referenced
/// by some parameter source as `used`, then for each `FunctionCall`
/// propagates each call output's `used` flag to the corresponding `End`
/// parameter's `consumed_by_function` on the callee. Lets a backend omit
/// dead outputs inside sub-functions.
pub fn propagate_use(assembly: &mut Assembly) {
    for function in assembly.functions_mut() {
        let referenced: BTreeSet<PortId> =
            function.parameters().filter_map(|p| p.source().map(|s| s.port)).collect();
        for port_id in referenced {
            if let Some(port) = function.port_mut(port_id) {
                port.set_used(true);
            }
        }
    }

    let mut propagations: Vec<(ResourceId, String, bool)> = Vec::new();
    for function in assembly.functions() {
        for node in function.nodes() {
            if !matches!(node.kind(), NodeKind::FunctionCall) {
                continue;
            }
            let Some(callee_id) = resolve_callee(function, node) else { continue };
            for port_id in node.outputs() {
                if let Some(port) = function.port(*port_id) {
                    propagations.push((callee_id, String::from(port.name()), port.used()));
                }
            }
        }
    }

    for (callee_id, name, used) in propagations {
        let Some(callee) = assembly.find_mut(callee_id) else { continue };
        let end = callee.end();
        let Some(end_node) = callee.node(end) else { continue };
        let target = end_node
            .parameters()
            .iter()
            .copied()
            .find(|pid| callee.parameter(*pid).map(|p| p.name() == name).unwrap_or(false));
        if let Some(pid) = target {
            if let Some(param) = callee.parameter_mut(pid) {
                // A parameter can be the mirror of several call sites;
                // once any one of them uses it, it stays consumed.
                let currently = param.consumed_by_function();
                param.set_consumed_by_function(currently || used);
            }
        }
    }
}

fn resolve_callee(function: &Function, node: &Node) -> Option<ResourceId> {
    node.parameters()
        .iter()
        .filter_map(|pid| function.parameter(*pid))
        .find(|p| p.name() == FUNCTION_ID_PARAMETER)
        .and_then(|p| match p.value() {
            Value::ResourceId(id) if p.source().is_none() => Some(id),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgraph_core::types::ValueType;
    use fieldgraph_graph::node::NodeKind;

    #[test]
    fn referenced_port_is_marked_used() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let function = assembly.add_if_missing(ResourceId::new(0), "Scene");
        let constant = function.create_node(NodeKind::Constant(ValueType::Scalar));
        let add = function.create_node(NodeKind::Math(fieldgraph_core::ops::Op::Add));
        let constant_out = function.node(constant).unwrap().outputs()[0];
        let add_in = function.node(add).unwrap().parameters()[0];
        function.link(constant_out, add_in, true).unwrap();

        propagate_use(&mut assembly);
        let function = assembly.find(ResourceId::new(0)).unwrap();
        assert!(function.port(constant_out).unwrap().used());
    }

    #[test]
    fn call_output_use_propagates_to_callee_end_parameter() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let callee_id = ResourceId::new(1);
        {
            let callee = assembly.add_if_missing(callee_id, "Callee");
            let end = callee.end();
            callee.add_parameter(end, "Distance", ValueType::Scalar).unwrap();
        }
        let caller = assembly.add_if_missing(ResourceId::new(2), "Caller");
        let call = caller.create_node(NodeKind::FunctionCall);
        let function_param = caller
            .node(call)
            .unwrap()
            .parameters()
            .iter()
            .copied()
            .find(|pid| caller.parameter(*pid).unwrap().name() == FUNCTION_ID_PARAMETER)
            .unwrap();
        caller.parameter_mut(function_param).unwrap().set_value(Value::ResourceId(callee_id));
        let call_output = caller.add_output(call, "Distance", ValueType::Scalar).unwrap();
        let end = caller.end();
        let shape_param = caller
            .node(end)
            .unwrap()
            .parameters()
            .iter()
            .copied()
            .find(|pid| caller.parameter(*pid).unwrap().name() == "Shape")
            .unwrap();
        caller.link(call_output, shape_param, true).unwrap();

        propagate_use(&mut assembly);

        let callee = assembly.find(callee_id).unwrap();
        let end = callee.end();
        let distance_param = callee
            .node(end)
            .unwrap()
            .parameters()
            .iter()
            .copied()
            .find(|pid| callee.parameter(*pid).unwrap().name() == "Distance")
            .unwrap();
        assert!(callee.parameter(distance_param).unwrap().consumed_by_function());
    }
}

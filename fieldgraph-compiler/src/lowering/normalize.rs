//! `NormalizeDistanceField` lowering (§4.4.6): `f(x) / max(|∇f|(x), ε)`.

#[cfg(not(feature = "std"))]
use alloc::{format, string::String, vec::Vec};
#[cfg(feature = "std")]
use std::vec::Vec;

use fieldgraph_assembly::assembly::Assembly;
use fieldgraph_core::ops::Op;
use fieldgraph_core::types::ValueType;
use fieldgraph_core::value::ResourceId;
use fieldgraph_graph::id::{NodeId, PortId};
use fieldgraph_graph::node::NodeKind;

use super::{
    begin_signature, call, const_scalar, end_signature, find_output, find_parameter, forward_argument, math,
    resolve_function_id, rewire_consumers, set_callee, LoweringCache,
};

const DEFAULT_STEP_SIZE: f32 = 1e-3;

struct NormalizeSite {
    function_id: ResourceId,
    node_id: NodeId,
    callee_id: ResourceId,
    scalar_output: String,
    vector_input: String,
}

/// *NormalizeDistanceField lowering* (§4.4.6): rewrites every
/// `NormalizeDistanceField` node into `f(x) / max(|∇f|(x), ε)`, composed
/// from a `FunctionCall` to a memoized wrapper (whose `End.Distance`
/// equals the chosen scalar output) plus a `FunctionGradient` over that
/// same wrapper — which the gradient lowering pass then rewrites in turn.
/// A node whose callee or named signature doesn't resolve is left
/// untouched and not counted.
pub fn lower_normalizes(assembly: &mut Assembly, cache: &mut LoweringCache) -> usize {
    let mut sites = Vec::new();
    for function in assembly.functions() {
        for node in function.nodes() {
            let NodeKind::NormalizeDistanceField { scalar_output, vector_input } = node.kind() else { continue };
            let Some(callee_id) = resolve_function_id(function, node.id()) else { continue };
            sites.push(NormalizeSite {
                function_id: function.resource_id(),
                node_id: node.id(),
                callee_id,
                scalar_output: scalar_output.clone(),
                vector_input: vector_input.clone(),
            });
        }
    }

    let mut lowered = 0;
    for site in &sites {
        if lower_one(assembly, cache, site) {
            lowered += 1;
        }
    }
    lowered
}

fn lower_one(assembly: &mut Assembly, cache: &mut LoweringCache, site: &NormalizeSite) -> bool {
    if !signature_is_valid(assembly, site.callee_id, &site.scalar_output, &site.vector_input) {
        return false;
    }

    let key = (site.callee_id, site.scalar_output.clone(), site.vector_input.clone());
    let wrapper_id = match cache.normalize_wrappers.get(&key) {
        Some(id) => *id,
        None => {
            let id = synthesize_wrapper(assembly, site.callee_id, &site.scalar_output);
            cache.normalize_wrappers.insert(key, id);
            id
        }
    };

    rewrite_call_site(assembly, site, wrapper_id);
    true
}

fn signature_is_valid(assembly: &Assembly, callee_id: ResourceId, scalar_output: &str, vector_input: &str) -> bool {
    let Some(callee) = assembly.find(callee_id) else { return false };
    let has_scalar_output =
        end_signature(callee).iter().any(|(name, ty)| name == scalar_output && *ty == ValueType::Scalar);
    let has_vector_input =
        begin_signature(callee).iter().any(|(name, ty)| name == vector_input && *ty == ValueType::Vec3);
    has_scalar_output && has_vector_input
}

/// Builds the shared wrapper whose sole purpose is giving the scalar
/// output a fixed name (`Distance`), so the gradient helper synthesized
/// over it doesn't need to know the caller's chosen output name.
fn synthesize_wrapper(assembly: &mut Assembly, callee_id: ResourceId, scalar_output: &str) -> ResourceId {
    let args = begin_signature(assembly.find(callee_id).expect("validated by caller"));

    let wrapper_id = assembly.insert_managed(wrapper_name(scalar_output));
    let wrapper = assembly.find_mut(wrapper_id).expect("just inserted");
    let begin = wrapper.begin();
    for (name, ty) in &args {
        wrapper.add_output(begin, name.clone(), *ty).expect("Begin accepts any output");
    }

    let call_args: Vec<(&str, ValueType, PortId)> = args
        .iter()
        .map(|(name, ty)| (name.as_str(), *ty, find_output(wrapper, begin, name).expect("just mirrored")))
        .collect();
    let call_node = call(wrapper, callee_id, &call_args);
    let call_output = wrapper.add_output(call_node, scalar_output, ValueType::Scalar).expect("node exists");

    let end = wrapper.end();
    let distance_param = wrapper.add_parameter(end, "Distance", ValueType::Scalar).expect("node exists");
    wrapper.link(call_output, distance_param, true).expect("fresh parameter");

    wrapper_id
}

fn rewrite_call_site(assembly: &mut Assembly, site: &NormalizeSite, wrapper_id: ResourceId) {
    let wrapper_args = begin_signature(assembly.find(wrapper_id).expect("just synthesized"));
    let function = assembly.find_mut(site.function_id).expect("collected from this assembly");

    let old_distance_port = find_output(function, site.node_id, "Distance");

    // f(x): call the wrapper directly.
    let value_call = function.create_node(NodeKind::FunctionCall);
    set_callee(function, value_call, wrapper_id);
    for (name, ty) in &wrapper_args {
        if let Some((original_pid, original_ty)) = find_parameter(function, site.node_id, name) {
            forward_argument(function, value_call, name, original_ty, original_pid);
        } else {
            function.add_parameter(value_call, name.clone(), *ty).expect("node exists");
        }
    }
    let value_port = function.add_output(value_call, "Distance", ValueType::Scalar).expect("node exists");

    // |∇f|(x): a FunctionGradient over the same wrapper. The gradient
    // lowering pass rewrites this node away in a later pipeline stage.
    let gradient_node = function.create_node(NodeKind::FunctionGradient {
        step_size: DEFAULT_STEP_SIZE,
        scalar_output: "Distance".into(),
        vector_input: site.vector_input.clone(),
    });
    set_callee(function, gradient_node, wrapper_id);
    for (name, ty) in &wrapper_args {
        if let Some((original_pid, original_ty)) = find_parameter(function, site.node_id, name) {
            forward_argument(function, gradient_node, name, original_ty, original_pid);
        } else {
            function.add_parameter(gradient_node, name.clone(), *ty).expect("node exists");
        }
    }
    let magnitude_port = function.add_output(gradient_node, "Magnitude", ValueType::Scalar).expect("node exists");

    let eps = const_scalar(function, 1e-8);
    let safe_magnitude = math(function, Op::Max, &[magnitude_port, eps]);
    let result = math(function, Op::Div, &[value_port, safe_magnitude]);

    rewire_consumers(function, old_distance_port, result);
    let _ = function.remove_node(site.node_id);
}

fn wrapper_name(scalar_output: &str) -> String {
    format!("NormalizeWrapper_{scalar_output}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgraph_core::value::Value;
    use fieldgraph_graph::node::FUNCTION_ID_PARAMETER;

    fn make_callee(assembly: &mut Assembly) -> ResourceId {
        let callee_id = ResourceId::new(1);
        let callee = assembly.add_if_missing(callee_id, "Sphere");
        let begin = callee.begin();
        callee.add_output(begin, "Pos", ValueType::Vec3).unwrap();
        let pos_port = find_output(callee, begin, "Pos").unwrap();
        let length = math(callee, Op::Length, &[pos_port]);
        let end = callee.end();
        let distance_param = callee.add_parameter(end, "Distance", ValueType::Scalar).unwrap();
        callee.link(length, distance_param, true).unwrap();
        callee_id
    }

    fn make_normalize_node(assembly: &mut Assembly, caller_id: ResourceId, callee_id: ResourceId) -> NodeId {
        let caller = assembly.add_if_missing(caller_id, "Caller");
        let node = caller.create_node(NodeKind::NormalizeDistanceField {
            scalar_output: "Distance".into(),
            vector_input: "Pos".into(),
        });
        let fid = find_parameter(caller, node, FUNCTION_ID_PARAMETER).unwrap().0;
        caller.parameter_mut(fid).unwrap().set_value(Value::ResourceId(callee_id));
        let pos_param = caller.add_parameter(node, "Pos", ValueType::Vec3).unwrap();
        let begin = caller.begin();
        caller.add_output(begin, "QueryPos", ValueType::Vec3).unwrap();
        let query_pos = find_output(caller, begin, "QueryPos").unwrap();
        caller.link(query_pos, pos_param, true).unwrap();
        node
    }

    #[test]
    fn lower_normalizes_replaces_the_node_with_a_call_plus_gradient_plus_divide() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let callee_id = make_callee(&mut assembly);
        let caller_id = ResourceId::new(2);
        make_normalize_node(&mut assembly, caller_id, callee_id);

        let mut cache = LoweringCache::new();
        let lowered = lower_normalizes(&mut assembly, &mut cache);
        assert_eq!(lowered, 1);

        let caller = assembly.find(caller_id).unwrap();
        assert!(caller.nodes().all(|n| !matches!(n.kind(), NodeKind::NormalizeDistanceField { .. })));
        assert!(caller.nodes().any(|n| matches!(n.kind(), NodeKind::FunctionGradient { .. })));
        assert!(caller.nodes().any(|n| matches!(n.kind(), NodeKind::Math(Op::Div))));
        assert_eq!(assembly.function_count(), 3); // callee, caller, wrapper
    }

    #[test]
    fn lower_normalizes_shares_one_wrapper_across_two_identical_signatures() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let callee_id = make_callee(&mut assembly);
        make_normalize_node(&mut assembly, ResourceId::new(2), callee_id);
        make_normalize_node(&mut assembly, ResourceId::new(3), callee_id);

        let mut cache = LoweringCache::new();
        let lowered = lower_normalizes(&mut assembly, &mut cache);
        assert_eq!(lowered, 2);
        assert_eq!(assembly.function_count(), 4); // callee, 2 callers, one shared wrapper
    }

    #[test]
    fn lower_normalizes_skips_a_mismatched_vector_input_name() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let callee_id = make_callee(&mut assembly);
        let caller = assembly.add_if_missing(ResourceId::new(2), "Caller");
        let node = caller.create_node(NodeKind::NormalizeDistanceField {
            scalar_output: "Distance".into(),
            vector_input: "NoSuchInput".into(),
        });
        let fid = find_parameter(caller, node, FUNCTION_ID_PARAMETER).unwrap().0;
        caller.parameter_mut(fid).unwrap().set_value(Value::ResourceId(callee_id));

        let mut cache = LoweringCache::new();
        let lowered = lower_normalizes(&mut assembly, &mut cache);
        assert_eq!(lowered, 0);
    }
}

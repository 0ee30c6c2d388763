//! Central-difference lowering for `FunctionGradient` (§4.4.5).

#[cfg(not(feature = "std"))]
use alloc::{format, string::String, vec::Vec};
#[cfg(feature = "std")]
use std::vec::Vec;

use fieldgraph_assembly::assembly::Assembly;
use fieldgraph_core::ops::Op;
use fieldgraph_core::types::ValueType;
use fieldgraph_core::value::{ResourceId, Value};
use fieldgraph_graph::id::{NodeId, PortId};
use fieldgraph_graph::node::NodeKind;

use super::{
    begin_signature, call, const_scalar, end_signature, find_output, find_parameter, forward_argument, math,
    resolve_function_id, rewire_consumers, set_callee, LoweringCache,
};

struct GradientSite {
    function_id: ResourceId,
    node_id: NodeId,
    callee_id: ResourceId,
    step_size: f32,
    scalar_output: String,
    vector_input: String,
}

/// *FunctionGradient lowering* (§4.4.5): rewrites every `FunctionGradient`
/// node into a `FunctionCall` to a memoized central-difference helper.
/// A node whose callee does not resolve, or whose named scalar output or
/// `Vec3` input does not exist on the callee, is left untouched and not
/// counted — the next inference pass reports it invalid.
pub fn lower_gradients(assembly: &mut Assembly, cache: &mut LoweringCache) -> usize {
    let mut sites = Vec::new();
    for function in assembly.functions() {
        for node in function.nodes() {
            let NodeKind::FunctionGradient { step_size, scalar_output, vector_input } = node.kind() else {
                continue;
            };
            let Some(callee_id) = resolve_function_id(function, node.id()) else { continue };
            sites.push(GradientSite {
                function_id: function.resource_id(),
                node_id: node.id(),
                callee_id,
                step_size: *step_size,
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

fn lower_one(assembly: &mut Assembly, cache: &mut LoweringCache, site: &GradientSite) -> bool {
    if !signature_is_valid(assembly, site.callee_id, &site.scalar_output, &site.vector_input) {
        return false;
    }

    let key = (site.callee_id, site.scalar_output.clone(), site.vector_input.clone());
    let helper_id = match cache.gradients.get(&key) {
        Some(id) => *id,
        None => {
            let id = synthesize_helper(assembly, site.callee_id, &site.scalar_output, &site.vector_input);
            cache.gradients.insert(key, id);
            id
        }
    };

    rewrite_call_site(assembly, site, helper_id);
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

/// Builds the memoized central-difference helper for one
/// `(callee, scalar_output, vector_input)` signature: a managed function
/// whose arguments mirror the callee's plus a `StepSize` scalar, and
/// whose `End` exposes `Vector` (the normalized gradient direction, masked
/// to an exact zero when the raw gradient length doesn't clear `eps`) and
/// `Magnitude` (its raw length).
fn synthesize_helper(assembly: &mut Assembly, callee_id: ResourceId, scalar_output: &str, vector_input: &str) -> ResourceId {
    let args = begin_signature(assembly.find(callee_id).expect("validated by caller"));

    let helper_id = assembly.insert_managed(helper_name(scalar_output, vector_input));
    let helper = assembly.find_mut(helper_id).expect("just inserted");
    let begin = helper.begin();

    for (name, ty) in &args {
        helper.add_output(begin, name.clone(), *ty).expect("Begin accepts any output");
    }
    helper.add_output(begin, "StepSize", ValueType::Scalar).expect("Begin accepts any output");

    let mirrored: Vec<(String, ValueType, PortId)> = args
        .iter()
        .map(|(name, ty)| {
            let port = find_output(helper, begin, name).expect("just mirrored");
            (name.clone(), *ty, port)
        })
        .collect();
    let step_size_port = find_output(helper, begin, "StepSize").expect("just mirrored");

    let abs_h = math(helper, Op::Abs, &[step_size_port]);
    let eps = const_scalar(helper, 1e-8);
    let safe_h = math(helper, Op::Max, &[abs_h, eps]);
    let two_h = math(helper, Op::Add, &[safe_h, safe_h]);
    let zero = const_scalar(helper, 0.0);

    let mut partials = Vec::with_capacity(3);
    for axis in 0..3 {
        let mut axis_components = [zero, zero, zero];
        axis_components[axis] = safe_h;
        let offset = math(helper, Op::ComposeVector, &axis_components);

        let mut plus_refs: Vec<(&str, ValueType, PortId)> = Vec::with_capacity(mirrored.len());
        let mut minus_refs: Vec<(&str, ValueType, PortId)> = Vec::with_capacity(mirrored.len());
        for (name, ty, port) in &mirrored {
            if name == vector_input {
                let plus_pos = math(helper, Op::Add, &[*port, offset]);
                let minus_pos = math(helper, Op::Sub, &[*port, offset]);
                plus_refs.push((name.as_str(), *ty, plus_pos));
                minus_refs.push((name.as_str(), *ty, minus_pos));
            } else {
                plus_refs.push((name.as_str(), *ty, *port));
                minus_refs.push((name.as_str(), *ty, *port));
            }
        }

        let call_plus = call(helper, callee_id, &plus_refs);
        let plus_out = helper.add_output(call_plus, scalar_output, ValueType::Scalar).expect("node exists");
        let call_minus = call(helper, callee_id, &minus_refs);
        let minus_out = helper.add_output(call_minus, scalar_output, ValueType::Scalar).expect("node exists");

        let diff = math(helper, Op::Sub, &[plus_out, minus_out]);
        let partial = math(helper, Op::Div, &[diff, two_h]);
        partials.push(partial);
    }

    let gradient_vec = math(helper, Op::ComposeVector, &partials);
    let length = math(helper, Op::Length, &[gradient_vec]);
    let safe_length = math(helper, Op::Max, &[length, eps]);
    let denom = math(helper, Op::VectorFromScalar, &[safe_length]);
    let normalized = math(helper, Op::Div, &[gradient_vec, denom]);

    // mask = (length < eps) ? 0 : 1, so a near-zero gradient collapses to
    // an exact zero vector instead of a spuriously large direction.
    let one = const_scalar(helper, 1.0);
    let mask = math(helper, Op::Select, &[length, eps, zero, one]);
    let mask_vec = math(helper, Op::VectorFromScalar, &[mask]);
    let masked = math(helper, Op::Mul, &[normalized, mask_vec]);

    let end = helper.end();
    let vector_param = helper.add_parameter(end, "Vector", ValueType::Vec3).expect("node exists");
    helper.link(masked, vector_param, true).expect("fresh parameter");
    let magnitude_param = helper.add_parameter(end, "Magnitude", ValueType::Scalar).expect("node exists");
    helper.link(length, magnitude_param, true).expect("fresh parameter");

    helper_id
}

fn rewrite_call_site(assembly: &mut Assembly, site: &GradientSite, helper_id: ResourceId) {
    let helper_args = begin_signature(assembly.find(helper_id).expect("just synthesized"));
    let function = assembly.find_mut(site.function_id).expect("collected from this assembly");

    let old_vector_port = find_output(function, site.node_id, "Vector");
    let old_magnitude_port = find_output(function, site.node_id, "Magnitude");

    let new_call = function.create_node(NodeKind::FunctionCall);
    set_callee(function, new_call, helper_id);
    for (name, ty) in &helper_args {
        if name == "StepSize" {
            let pid = function.add_parameter(new_call, "StepSize", ValueType::Scalar).expect("node exists");
            function.parameter_mut(pid).expect("just added").set_value(Value::Scalar(site.step_size));
            continue;
        }
        if let Some((original_pid, original_ty)) = find_parameter(function, site.node_id, name) {
            forward_argument(function, new_call, name, original_ty, original_pid);
        } else {
            function.add_parameter(new_call, name.clone(), *ty).expect("node exists");
        }
    }

    let new_vector = function.add_output(new_call, "Vector", ValueType::Vec3).expect("node exists");
    let new_magnitude = function.add_output(new_call, "Magnitude", ValueType::Scalar).expect("node exists");

    rewire_consumers(function, old_vector_port, new_vector);
    rewire_consumers(function, old_magnitude_port, new_magnitude);

    let _ = function.remove_node(site.node_id);
}

fn helper_name(scalar_output: &str, vector_input: &str) -> String {
    format!("Gradient_{scalar_output}_wrt_{vector_input}")
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

    fn make_gradient_node(assembly: &mut Assembly, caller_id: ResourceId, callee_id: ResourceId) -> NodeId {
        let caller = assembly.add_if_missing(caller_id, "Caller");
        let node = caller.create_node(NodeKind::FunctionGradient {
            step_size: 1e-3,
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
    fn lower_gradients_replaces_the_node_with_a_call_to_a_helper() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let callee_id = make_callee(&mut assembly);
        let caller_id = ResourceId::new(2);
        make_gradient_node(&mut assembly, caller_id, callee_id);

        let mut cache = LoweringCache::new();
        let lowered = lower_gradients(&mut assembly, &mut cache);
        assert_eq!(lowered, 1);

        let caller = assembly.find(caller_id).unwrap();
        assert!(caller.nodes().all(|n| !matches!(n.kind(), NodeKind::FunctionGradient { .. })));
        assert!(caller.nodes().any(|n| matches!(n.kind(), NodeKind::FunctionCall)));
        assert_eq!(assembly.function_count(), 3); // callee, caller, gradient helper
    }

    #[test]
    fn lower_gradients_shares_one_helper_across_two_identical_signatures() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let callee_id = make_callee(&mut assembly);
        make_gradient_node(&mut assembly, ResourceId::new(2), callee_id);
        make_gradient_node(&mut assembly, ResourceId::new(3), callee_id);

        let mut cache = LoweringCache::new();
        let lowered = lower_gradients(&mut assembly, &mut cache);
        assert_eq!(lowered, 2);
        assert_eq!(assembly.function_count(), 4); // callee, 2 callers, one shared helper
    }

    #[test]
    fn lower_gradients_skips_an_unresolvable_callee() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let caller = assembly.add_if_missing(ResourceId::new(2), "Caller");
        let node = caller.create_node(NodeKind::FunctionGradient {
            step_size: 1e-3,
            scalar_output: "Distance".into(),
            vector_input: "Pos".into(),
        });
        let fid = find_parameter(caller, node, FUNCTION_ID_PARAMETER).unwrap().0;
        caller.parameter_mut(fid).unwrap().set_value(Value::ResourceId(ResourceId::new(99)));

        let mut cache = LoweringCache::new();
        let lowered = lower_gradients(&mut assembly, &mut cache);
        assert_eq!(lowered, 0);
        assert!(assembly.find(ResourceId::new(2)).unwrap().nodes().any(|n| matches!(n.kind(), NodeKind::FunctionGradient { .. })));
    }
}

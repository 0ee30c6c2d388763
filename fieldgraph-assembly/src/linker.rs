//! Call-I/O re-mirroring and duplicate-function rewriting (§4.3).
//!
//! The open question in §9 ("mirror updates run at multiple points... a
//! single re-mirror pass owned by the linker is recommended") is resolved
//! here: [`propagate_call_io`] is the one place `FunctionCall` nodes are
//! grown or shrunk to match their resolved callee, and callers (the
//! compiler pipeline, the 3MF importer after a merge) invoke it at their
//! own well-defined points rather than mirroring inline.

#[cfg(not(feature = "std"))]
use alloc::{collections::BTreeMap, string::String, vec::Vec};
#[cfg(feature = "std")]
use std::collections::BTreeMap;

use fieldgraph_core::types::ValueType;
use fieldgraph_core::value::{ResourceId, Value};
use fieldgraph_graph::function::Function;
use fieldgraph_graph::id::{NodeId, ParameterId, PortId};
use fieldgraph_graph::node::{NodeKind, FUNCTION_ID_PARAMETER};
use fieldgraph_graph::parameter::Parameter;

use crate::assembly::Assembly;

/// Counters describing the effect of a linker pass; purely informational,
/// surfaced through a [`fieldgraph_core::log::LogSink`] by the pipeline
/// that drives the linker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkerReport {
    pub parameters_mirrored: usize,
    pub parameters_removed: usize,
    pub ports_mirrored: usize,
    pub ports_removed: usize,
    pub invalid_calls: usize,
    pub references_rewritten: usize,
    pub functions_removed: usize,
}

impl LinkerReport {
    /// Accumulates counters from a second pass (the compiler pipeline runs
    /// the linker twice: once before lowering, once after, since lowering
    /// grows new `FunctionCall` nodes of its own).
    pub fn merge(&mut self, other: LinkerReport) {
        self.parameters_mirrored += other.parameters_mirrored;
        self.parameters_removed += other.parameters_removed;
        self.ports_mirrored += other.ports_mirrored;
        self.ports_removed += other.ports_removed;
        self.invalid_calls += other.invalid_calls;
        self.references_rewritten += other.references_rewritten;
        self.functions_removed += other.functions_removed;
    }
}

struct CalleeSignature {
    inputs: Vec<(String, ValueType)>,
    outputs: Vec<(String, ValueType)>,
}

fn callee_signature(callee: &Function) -> CalleeSignature {
    let begin = callee.node(callee.begin()).expect("every function has a Begin");
    let end = callee.node(callee.end()).expect("every function has an End");
    let inputs = begin
        .outputs()
        .iter()
        .filter_map(|pid| callee.port(*pid))
        .map(|p| (String::from(p.name()), p.value_type()))
        .collect();
    let outputs = end
        .parameters()
        .iter()
        .filter_map(|pid| callee.parameter(*pid))
        .map(|p| (String::from(p.name()), p.value_type()))
        .collect();
    CalleeSignature { inputs, outputs }
}

/// Which half of a callee's signature a node kind mirrors. `FunctionCall`
/// mirrors both; `FunctionGradient`/`NormalizeDistanceField` expose a
/// fixed output shape of their own (`Vector`/`Magnitude`, `Distance`) and
/// only need their *inputs* mirrored so a caller can wire arguments before
/// lowering rewrites them away (§4.4.5, §4.4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MirrorScope {
    InputsAndOutputs,
    InputsOnly,
}

fn mirror_scope(kind: &NodeKind) -> Option<MirrorScope> {
    match kind {
        NodeKind::FunctionCall => Some(MirrorScope::InputsAndOutputs),
        NodeKind::FunctionGradient { .. } | NodeKind::NormalizeDistanceField { .. } => {
            Some(MirrorScope::InputsOnly)
        }
        _ => None,
    }
}

/// *Propagate call I/O* (§4.3): for every `FunctionCall`, `FunctionGradient`
/// and `NormalizeDistanceField` node in every function, resolves its
/// `FunctionId` parameter and mirrors the callee's `Begin` outputs as
/// parameters (all three kinds) and the callee's `End` parameters as
/// output ports (`FunctionCall` only — the other two have a fixed output
/// shape of their own), adding and removing to match. Calls whose
/// `FunctionId` does not resolve are left untouched and counted in
/// [`LinkerReport::invalid_calls`]; the inference pass is responsible for
/// marking such nodes invalid.
pub fn propagate_call_io(assembly: &mut Assembly) -> LinkerReport {
    let mut report = LinkerReport::default();

    let mut todo: Vec<(ResourceId, NodeId, MirrorScope, Option<CalleeSignature>)> = Vec::new();
    for function in assembly.functions() {
        for node in function.nodes() {
            let Some(scope) = mirror_scope(node.kind()) else { continue };
            let callee_id = node
                .parameters()
                .iter()
                .filter_map(|pid| function.parameter(*pid))
                .find(|p| p.name() == FUNCTION_ID_PARAMETER)
                .and_then(|p| match p.value() {
                    Value::ResourceId(id) if p.source().is_none() => Some(id),
                    _ => None,
                });
            let signature = callee_id.and_then(|id| assembly.find(id)).map(callee_signature);
            todo.push((function.resource_id(), node.id(), scope, signature));
        }
    }

    for (function_id, node_id, scope, signature) in todo {
        let function = assembly.find_mut(function_id).expect("collected from this assembly");
        let Some(signature) = signature else {
            report.invalid_calls += 1;
            continue;
        };
        mirror_node_io(function, node_id, scope, &signature, &mut report);
    }

    report
}

fn mirror_node_io(
    function: &mut Function,
    node_id: NodeId,
    scope: MirrorScope,
    signature: &CalleeSignature,
    report: &mut LinkerReport,
) {
    let existing_param_ids: Vec<ParameterId> = function
        .node(node_id)
        .map(|n| n.parameters().to_vec())
        .unwrap_or_default();
    let existing_params: Vec<(ParameterId, String)> = existing_param_ids
        .iter()
        .filter_map(|pid| function.parameter(*pid).map(|p| (*pid, String::from(p.name()))))
        .filter(|(_, name)| name != FUNCTION_ID_PARAMETER)
        .collect();

    for (name, ty) in &signature.inputs {
        if !existing_params.iter().any(|(_, existing)| existing == name) {
            if function.add_parameter(node_id, name.clone(), *ty).is_ok() {
                report.parameters_mirrored += 1;
            }
        }
    }
    for (pid, name) in &existing_params {
        if !signature.inputs.iter().any(|(input_name, _)| input_name == name) {
            if function.remove_parameter(*pid).is_ok() {
                report.parameters_removed += 1;
            }
        }
    }

    if scope != MirrorScope::InputsAndOutputs {
        return;
    }

    let existing_port_ids: Vec<PortId> = function.node(node_id).map(|n| n.outputs().to_vec()).unwrap_or_default();
    let existing_ports: Vec<(PortId, String)> = existing_port_ids
        .iter()
        .filter_map(|pid| function.port(*pid).map(|p| (*pid, String::from(p.name()))))
        .collect();

    for (name, ty) in &signature.outputs {
        if !existing_ports.iter().any(|(_, existing)| existing == name) {
            if function.add_output(node_id, name.clone(), *ty).is_ok() {
                report.ports_mirrored += 1;
            }
        }
    }
    for (pid, name) in &existing_ports {
        if !signature.outputs.iter().any(|(output_name, _)| output_name == name) {
            if function.remove_output(*pid).is_ok() {
                report.ports_removed += 1;
            }
        }
    }
}

/// The function comparator (§4.3 "Equality"): deep-compares node count,
/// the set of node unique names, and each matching node's parameters by
/// name and textual value (literal text, or the bound source's cached
/// name). Editor-only state such as node canvas position has no
/// counterpart in this model (the node editor is an explicit external
/// collaborator, §1) and is not part of the comparison.
pub fn functions_equivalent(a: &Function, b: &Function) -> bool {
    if a.node_count() != b.node_count() {
        return false;
    }
    let mut a_names: Vec<&str> = a.nodes().map(|n| n.unique_name()).collect();
    let mut b_names: Vec<&str> = b.nodes().map(|n| n.unique_name()).collect();
    a_names.sort_unstable();
    b_names.sort_unstable();
    if a_names != b_names {
        return false;
    }

    for a_node in a.nodes() {
        let Some(b_node) = b.nodes().find(|n| n.unique_name() == a_node.unique_name()) else {
            return false;
        };
        if a_node.parameters().len() != b_node.parameters().len() {
            return false;
        }
        for pid in a_node.parameters() {
            let Some(a_param) = a.parameter(*pid) else { return false };
            let Some(b_param) = b_node
                .parameters()
                .iter()
                .filter_map(|bpid| b.parameter(*bpid))
                .find(|bp| bp.name() == a_param.name())
            else {
                return false;
            };
            if !parameters_equivalent(a_param, b_param) {
                return false;
            }
        }
    }
    true
}

fn parameters_equivalent(a: &Parameter, b: &Parameter) -> bool {
    match (a.source(), b.source()) {
        (Some(a_src), Some(b_src)) => a_src.cached_name == b_src.cached_name,
        (None, None) => a.value().to_kernel_literal() == b.value().to_kernel_literal(),
        _ => false,
    }
}

/// *Duplicate detection on merge* (§4.3, §6.1): pairs each function in
/// `original` with any function in `merged` judged equivalent by
/// [`functions_equivalent`], rewrites every literal `ResourceId`-typed
/// parameter in `merged` that names a duplicate to name the original
/// instead, then deletes the duplicates. Iterates to a fixed point, since
/// rewriting can expose new duplicates (e.g. two call sites that only
/// differed by which of two now-merged functions they called).
pub fn rewrite_duplicates(original: &Assembly, merged: &mut Assembly) -> LinkerReport {
    let mut report = LinkerReport::default();
    loop {
        let mut mapping: BTreeMap<ResourceId, ResourceId> = BTreeMap::new();
        for o in original.functions() {
            for e in merged.functions() {
                if e.resource_id() == o.resource_id() {
                    continue;
                }
                if functions_equivalent(o, e) {
                    mapping.insert(e.resource_id(), o.resource_id());
                }
            }
        }
        if mapping.is_empty() {
            break;
        }

        for function in merged.functions_mut() {
            let candidates: Vec<ParameterId> = function
                .parameters()
                .filter(|p| p.value_type() == ValueType::ResourceId && p.source().is_none())
                .map(Parameter::id)
                .collect();
            for pid in candidates {
                let param = function.parameter_mut(pid).expect("just collected");
                if let Value::ResourceId(current) = param.value() {
                    if let Some(replacement) = mapping.get(&current) {
                        param.set_value(Value::ResourceId(*replacement));
                        report.references_rewritten += 1;
                    }
                }
            }
        }

        for duplicate_id in mapping.keys() {
            if merged.delete(*duplicate_id).is_some() {
                report.functions_removed += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgraph_core::ops::Op;

    #[test]
    fn propagate_call_io_mirrors_resolved_callee() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let callee_id = ResourceId::new(1);
        {
            let callee = assembly.add_if_missing(callee_id, "Callee");
            let begin = callee.begin();
            callee.add_output(begin, "Radius", ValueType::Scalar).unwrap();
            let end = callee.end();
            callee.add_parameter(end, "Distance", ValueType::Scalar).unwrap();
        }
        let caller = assembly.add_if_missing(ResourceId::new(2), "Caller");
        let call_node = caller.create_node(NodeKind::FunctionCall);
        let function_param = caller
            .node(call_node)
            .unwrap()
            .parameters()
            .iter()
            .copied()
            .find(|pid| caller.parameter(*pid).unwrap().name() == FUNCTION_ID_PARAMETER)
            .unwrap();
        caller.parameter_mut(function_param).unwrap().set_value(Value::ResourceId(callee_id));

        let report = propagate_call_io(&mut assembly);
        assert_eq!(report.invalid_calls, 0);
        assert_eq!(report.parameters_mirrored, 1);
        assert_eq!(report.ports_mirrored, 1);

        let caller = assembly.find(ResourceId::new(2)).unwrap();
        let call = caller.node(call_node).unwrap();
        assert_eq!(call.parameters().len(), 2); // Function + Radius
        assert_eq!(call.outputs().len(), 1); // Distance
    }

    #[test]
    fn propagate_call_io_counts_unresolved_calls() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let caller = assembly.add_if_missing(ResourceId::new(0), "Caller");
        caller.create_node(NodeKind::FunctionCall);
        let report = propagate_call_io(&mut assembly);
        assert_eq!(report.invalid_calls, 1);
    }

    #[test]
    fn functions_equivalent_ignores_unrelated_resource_ids() {
        let mut a = Assembly::new(ResourceId::new(0));
        let fa = a.add_if_missing(ResourceId::new(10), "F");
        fa.create_node(NodeKind::Math(Op::Add));

        let mut b = Assembly::new(ResourceId::new(0));
        let fb = b.add_if_missing(ResourceId::new(20), "F");
        fb.create_node(NodeKind::Math(Op::Add));

        assert!(functions_equivalent(a.find(ResourceId::new(10)).unwrap(), b.find(ResourceId::new(20)).unwrap()));
    }

    #[test]
    fn rewrite_duplicates_reaches_a_fixed_point() {
        let mut original = Assembly::new(ResourceId::new(0));
        let f1 = original.add_if_missing(ResourceId::new(1), "F");
        f1.create_node(NodeKind::Math(Op::Add));

        let mut merged = Assembly::new(ResourceId::new(0));
        let f2 = merged.add_if_missing(ResourceId::new(2), "F");
        f2.create_node(NodeKind::Math(Op::Add));
        let caller = merged.add_if_missing(ResourceId::new(3), "Caller");
        let call_node = caller.create_node(NodeKind::FunctionCall);
        let function_param = caller
            .node(call_node)
            .unwrap()
            .parameters()
            .iter()
            .copied()
            .find(|pid| caller.parameter(*pid).unwrap().name() == FUNCTION_ID_PARAMETER)
            .unwrap();
        caller.parameter_mut(function_param).unwrap().set_value(Value::ResourceId(ResourceId::new(2)));

        let report = rewrite_duplicates(&original, &mut merged);
        assert_eq!(report.functions_removed, 1);
        assert_eq!(report.references_rewritten, 1);
        assert!(merged.find(ResourceId::new(2)).is_none());

        let caller = merged.find(ResourceId::new(3)).unwrap();
        let function_param = caller
            .node(call_node)
            .unwrap()
            .parameters()
            .iter()
            .copied()
            .find(|pid| caller.parameter(*pid).unwrap().name() == FUNCTION_ID_PARAMETER)
            .unwrap();
        assert_eq!(caller.parameter(function_param).unwrap().value(), Value::ResourceId(ResourceId::new(1)));

        let second_pass = rewrite_duplicates(&original, &mut merged);
        assert_eq!(second_pass.functions_removed, 0);
    }
}

//! Structural import (§6.1): turns a [`SceneDocument`] into an
//! [`Assembly`] whose entry function is the scene's evaluated shape.
//!
//! The reader is non-strict: an unresolved reference or unmapped node
//! type is logged and the offending node skipped, rather than aborting
//! the whole import. This mirrors how a real archive reader has to cope
//! with a 3MF package another tool wrote slightly wrong — one bad
//! resource shouldn't cost the rest of the scene.

use std::collections::BTreeMap;

use log::{error, warn};

use fieldgraph_assembly::assembly::Assembly;
use fieldgraph_assembly::linker::propagate_call_io;
use fieldgraph_core::types::ValueType;
use fieldgraph_core::value::{ResourceId, Value};
use fieldgraph_core::ops::Op;
use fieldgraph_graph::function::Function;
use fieldgraph_graph::id::{NodeId, ParameterId, PortId};
use fieldgraph_graph::node::{NodeKind, FUNCTION_ID_PARAMETER};

use crate::document::{
    FunctionFromImage3DDoc, ImplicitFunctionDoc, ImplicitNodeDoc, InputValueDoc, NodeTypeDoc,
    SceneDocument, Transform12,
};

fn allocate_resource(
    model_to_resource: &mut BTreeMap<u32, ResourceId>,
    next_resource: &mut u32,
    model_id: u32,
) -> ResourceId {
    *model_to_resource.entry(model_id).or_insert_with(|| {
        let id = ResourceId::new(*next_resource);
        *next_resource += 1;
        id
    })
}

const POS_NAME: &str = "Pos";
const SHAPE_NAME: &str = "Shape";
const COLOR_NAME: &str = "Color";

/// Builds an [`Assembly`] from `document`. The returned assembly's entry
/// function computes the scene's combined distance field at `End.Shape`
/// and, when any function-from-image resource contributed color, at
/// `End.Color`.
pub fn import_scene(document: &SceneDocument) -> Assembly {
    let units_per_mm = document.unit.units_per_mm();
    let mut assembly = Assembly::new(ResourceId::new(0));
    let entry_id = assembly.assembly_function_id();
    assembly.add_if_missing(entry_id, "Scene");

    let mut model_to_resource: BTreeMap<u32, ResourceId> = BTreeMap::new();
    let mut next_resource = 1u32;

    for function_doc in &document.functions {
        let id = allocate_resource(&mut model_to_resource, &mut next_resource, function_doc.model_resource_id);
        assembly.add_if_missing(id, function_doc.display_name.clone());
    }
    for image_doc in &document.image_functions {
        let id = allocate_resource(&mut model_to_resource, &mut next_resource, image_doc.model_resource_id);
        let function = assembly.add_if_missing(id, image_doc.display_name.clone());
        synthesize_image_function(function, image_doc);
    }

    for function_doc in &document.functions {
        let id = model_to_resource[&function_doc.model_resource_id];
        import_function_body(&mut assembly, id, function_doc, &model_to_resource);
    }

    import_level_sets(&mut assembly, entry_id, document, &model_to_resource, units_per_mm);

    for function in assembly.functions_mut() {
        let _ = function.rebuild_order();
    }

    assembly
}

/// Builds a synthesized function whose `End.Color` samples a 3D image
/// stack at `Begin.Pos` and applies `sample * scale + offset`. The core
/// [`Op::ImageSampler`] only produces an RGB sample, so this function has
/// no alpha output; a document's declared alpha channel is silently
/// unmodeled, which is recorded as an open decision rather than invented.
fn synthesize_image_function(function: &mut Function, doc: &FunctionFromImage3DDoc) {
    let begin = function.begin();
    let pos_port = function
        .add_output(begin, POS_NAME, ValueType::Vec3)
        .expect("begin always accepts a new output");

    let image_port = constant_resource(function, ResourceId::new(doc.image_resource_id));

    let sample = function.create_node(NodeKind::Math(Op::ImageSampler));
    let sample_params = function.node(sample).expect("just created").parameters().to_vec();
    link(function, pos_port, sample_params[0]);
    link(function, image_port, sample_params[1]);
    let sample_port = function.node(sample).expect("just created").outputs()[0];

    let scale_port = constant_vec3(function, [doc.scale; 3]);
    let scaled = elementwise_vec3(function, Op::Mul, sample_port, scale_port);
    let offset_port = constant_vec3(function, [doc.offset; 3]);
    let biased = elementwise_vec3(function, Op::Add, scaled, offset_port);

    let end = function.end();
    if let Some(color_param) = find_parameter_named(function, end, COLOR_NAME) {
        link(function, biased, color_param);
        function.parameter_mut(color_param).expect("just found").set_consumed_by_function(true);
    }
}

fn import_function_body(
    assembly: &mut Assembly,
    function_id: ResourceId,
    doc: &ImplicitFunctionDoc,
    model_to_resource: &BTreeMap<u32, ResourceId>,
) {
    let function = assembly.find_mut(function_id).expect("inserted before this call");
    let begin = function.begin();
    for (name, ty) in &doc.inputs {
        let _ = function.add_output(begin, name.clone(), *ty);
    }
    reshape_end(function, &doc.outputs);

    let mut name_to_node: BTreeMap<String, NodeId> = BTreeMap::new();
    for node_doc in &doc.nodes {
        let Some(kind) = map_node_type(node_doc.node_type) else {
            warn!(
                "node '{}' in function '{}' has no core equivalent (type {:?}); skipping",
                node_doc.name, doc.display_name, node_doc.node_type
            );
            continue;
        };
        let node_id = function.create_node(kind);
        name_to_node.insert(node_doc.name.clone(), node_id);

        if node_doc.node_type == NodeTypeDoc::FunctionCall {
            bind_function_call(function, node_id, node_doc, model_to_resource, &doc.display_name);
        }
    }

    for node_doc in &doc.nodes {
        let Some(&node_id) = name_to_node.get(&node_doc.name) else { continue };
        for input in &node_doc.inputs {
            let Some(param_id) = find_parameter_named(function, node_id, &input.name) else {
                continue;
            };
            match &input.value {
                InputValueDoc::Literal(value) => {
                    set_literal(function, param_id, *value);
                }
                InputValueDoc::Reference(reference) => {
                    let Some(source) = resolve_reference(function, begin, &name_to_node, reference)
                    else {
                        error!(
                            "node '{}' in function '{}': unresolved reference '{reference}'",
                            node_doc.name, doc.display_name
                        );
                        continue;
                    };
                    link(function, source, param_id);
                }
            }
        }
    }
}

fn bind_function_call(
    function: &mut Function,
    node_id: NodeId,
    node_doc: &ImplicitNodeDoc,
    model_to_resource: &BTreeMap<u32, ResourceId>,
    owner_name: &str,
) {
    let Some(callee_model_id) = node_doc.function_reference else { return };
    let Some(&callee_id) = model_to_resource.get(&callee_model_id) else {
        error!(
            "node '{}' in function '{owner_name}': FunctionCall references unknown function {callee_model_id}",
            node_doc.name
        );
        return;
    };
    if let Some(param_id) = find_parameter_named(function, node_id, FUNCTION_ID_PARAMETER) {
        function.parameter_mut(param_id).expect("just found").set_value(Value::ResourceId(callee_id));
    }
}

/// Replaces `End`'s parameter list with `outputs`, unless `outputs` is
/// empty — in which case the node's default `Shape`/`Color` pair (the
/// entry function's convention) is left alone.
fn reshape_end(function: &mut Function, outputs: &[(String, ValueType)]) {
    if outputs.is_empty() {
        return;
    }
    let end = function.end();
    let existing: Vec<(ParameterId, String)> = function
        .node(end)
        .expect("every function has an end node")
        .parameters()
        .iter()
        .filter_map(|pid| function.parameter(*pid).map(|p| (*pid, String::from(p.name()))))
        .collect();

    for (param_id, name) in &existing {
        if !outputs.iter().any(|(declared, _)| declared == name) {
            let _ = function.remove_parameter(*param_id);
        }
    }
    for (name, ty) in outputs {
        let already_present = function
            .node(end)
            .expect("every function has an end node")
            .parameters()
            .iter()
            .any(|pid| function.parameter(*pid).map(|p| p.name() == name).unwrap_or(false));
        if !already_present {
            let _ = function.add_parameter(end, name.clone(), *ty);
        }
    }
}

struct PendingLevelSet {
    call_node: NodeId,
    local_pos: PortId,
    domain_port: PortId,
}

/// Weaves every `levelset` build item into the entry function: each
/// contributes `FunctionCall(local position) ∩ domain`, unioned into the
/// running shape with `Min` (§4.1's SDF union convention). The `Max`
/// used for the per-level-set intersection follows the same convention
/// symmetrically; it isn't spelled out as explicitly, so it's recorded
/// as a deliberate reading rather than an invented one.
///
/// A `FunctionCall` node's output ports don't exist until
/// [`propagate_call_io`] mirrors them in from the callee's `End`, so this
/// runs in two passes: first every call and its domain term are built,
/// then (after mirroring) each call's `Pos` argument is wired and its
/// now-present `Shape` output is intersected with its domain term.
fn import_level_sets(
    assembly: &mut Assembly,
    entry_id: ResourceId,
    document: &SceneDocument,
    model_to_resource: &BTreeMap<u32, ResourceId>,
    units_per_mm: f32,
) {
    let mut pending: Vec<PendingLevelSet> = Vec::new();
    let mut fallback: Option<f32> = None;

    for item in &document.build_items {
        let Some(level_set) =
            document.level_sets.iter().find(|ls| ls.model_resource_id == item.object_model_resource_id)
        else {
            continue;
        };
        let Some(&callee_id) = model_to_resource.get(&level_set.function_model_resource_id) else {
            error!(
                "level set {} references unknown function {}",
                level_set.model_resource_id, level_set.function_model_resource_id
            );
            continue;
        };

        let function = assembly.find_mut(entry_id).expect("entry function inserted up front");
        let begin = function.begin();
        let pos_port = match find_output_named(function, begin, POS_NAME) {
            Some(port) => port,
            None => function.add_output(begin, POS_NAME, ValueType::Vec3).expect("begin accepts outputs"),
        };

        let world = compose_transform(&item.transform, &level_set.transform, units_per_mm);
        let local = world.inverse().unwrap_or(fieldgraph_core::value::Mat4::IDENTITY);
        let local_port = constant_mat4(function, local);
        let to_local = function.create_node(NodeKind::Math(Op::MatrixVectorMul));
        let to_local_params = function.node(to_local).expect("just created").parameters().to_vec();
        link(function, local_port, to_local_params[0]);
        link(function, pos_port, to_local_params[1]);
        let local_pos = function.node(to_local).expect("just created").outputs()[0];

        let call_node = function.create_node(NodeKind::FunctionCall);
        if let Some(param_id) = find_parameter_named(function, call_node, FUNCTION_ID_PARAMETER) {
            function.parameter_mut(param_id).expect("just found").set_value(Value::ResourceId(callee_id));
        }

        let domain_port = match level_set.mesh_model_resource_id {
            Some(mesh_model_id) => {
                let mesh_id = model_to_resource.get(&mesh_model_id).copied().unwrap_or(ResourceId::INVALID);
                let mesh_port = constant_resource(function, mesh_id);
                let aux_port = constant_resource(function, mesh_id);
                let node = function.create_node(NodeKind::Math(Op::SignedDistanceToMesh));
                let params = function.node(node).expect("just created").parameters().to_vec();
                link(function, local_pos, params[0]);
                link(function, mesh_port, params[1]);
                link(function, aux_port, params[2]);
                function.node(node).expect("just created").outputs()[0]
            }
            None => {
                let min_port = constant_vec3(function, level_set.mesh_bbox_min);
                let max_port = constant_vec3(function, level_set.mesh_bbox_max);
                let node = function.create_node(NodeKind::Math(Op::BoxMinMax));
                let params = function.node(node).expect("just created").parameters().to_vec();
                link(function, local_pos, params[0]);
                link(function, min_port, params[1]);
                link(function, max_port, params[2]);
                function.node(node).expect("just created").outputs()[0]
            }
        };

        pending.push(PendingLevelSet { call_node, local_pos, domain_port });

        if let Some(value) = level_set.fallback_value {
            fallback = Some(value);
        }
    }

    propagate_call_io(assembly);

    let mut shape_port: Option<PortId> = None;
    for entry in &pending {
        let function = assembly.find_mut(entry_id).expect("entry function inserted up front");
        if let Some(pos_param) = find_parameter_named(function, entry.call_node, POS_NAME) {
            link(function, entry.local_pos, pos_param);
        }
        let Some(call_shape) = find_output_named(function, entry.call_node, SHAPE_NAME) else {
            continue;
        };
        let intersected = scalar_max(function, call_shape, entry.domain_port);
        shape_port = Some(match shape_port {
            Some(existing) => union_min(function, existing, intersected),
            None => intersected,
        });
    }

    if let Some(port) = shape_port {
        let function = assembly.find_mut(entry_id).expect("entry function inserted up front");
        let end = function.end();
        if let Some(shape_param) = find_parameter_named(function, end, SHAPE_NAME) {
            link(function, port, shape_param);
            function.parameter_mut(shape_param).expect("just found").set_consumed_by_function(true);
        }
    }
    if let Some(value) = fallback {
        assembly.set_fallback(Some(Value::Scalar(value)));
    }
}

fn scalar_max(function: &mut Function, a: PortId, b: PortId) -> PortId {
    let node = function.create_node(NodeKind::Math(Op::Max));
    function.node_mut(node).expect("just created").set_rule(Some(fieldgraph_core::types::Rule::Scalar));
    let params = function.node(node).expect("just created").parameters().to_vec();
    link(function, a, params[0]);
    link(function, b, params[1]);
    function.node(node).expect("just created").outputs()[0]
}

fn union_min(function: &mut Function, a: PortId, b: PortId) -> PortId {
    let node = function.create_node(NodeKind::Math(Op::Min));
    function.node_mut(node).expect("just created").set_rule(Some(fieldgraph_core::types::Rule::Scalar));
    let params = function.node(node).expect("just created").parameters().to_vec();
    link(function, a, params[0]);
    link(function, b, params[1]);
    function.node(node).expect("just created").outputs()[0]
}

fn elementwise_vec3(function: &mut Function, op: Op, a: PortId, b: PortId) -> PortId {
    let node = function.create_node(NodeKind::Math(op));
    function.node_mut(node).expect("just created").set_rule(Some(fieldgraph_core::types::Rule::Vec3));
    let params = function.node(node).expect("just created").parameters().to_vec();
    link(function, a, params[0]);
    link(function, b, params[1]);
    function.node(node).expect("just created").outputs()[0]
}

fn constant_vec3(function: &mut Function, value: [f32; 3]) -> PortId {
    let node = function.create_node(NodeKind::Constant(ValueType::Vec3));
    for (name, component) in [("X", value[0]), ("Y", value[1]), ("Z", value[2])] {
        if let Some(pid) = find_parameter_named(function, node, name) {
            function.parameter_mut(pid).expect("just found").set_value(Value::Scalar(component));
        }
    }
    function.node(node).expect("just created").outputs()[0]
}

fn constant_resource(function: &mut Function, value: ResourceId) -> PortId {
    let node = function.create_node(NodeKind::Constant(ValueType::ResourceId));
    if let Some(pid) = find_parameter_named(function, node, "Id") {
        function.parameter_mut(pid).expect("just found").set_value(Value::ResourceId(value));
    }
    function.node(node).expect("just created").outputs()[0]
}

fn constant_mat4(function: &mut Function, value: fieldgraph_core::value::Mat4) -> PortId {
    let node = function.create_node(NodeKind::Constant(ValueType::Mat4));
    for row in 0..4usize {
        for col in 0..4usize {
            let name = format!("M{row}{col}");
            if let Some(pid) = find_parameter_named(function, node, &name) {
                function.parameter_mut(pid).expect("just found").set_value(Value::Scalar(value.get(row, col)));
            }
        }
    }
    function.node(node).expect("just created").outputs()[0]
}

fn compose_transform(
    build_item: &Transform12,
    level_set: &Transform12,
    units_per_mm: f32,
) -> fieldgraph_core::value::Mat4 {
    let build = to_mat4(build_item, units_per_mm);
    let local = to_mat4(level_set, units_per_mm);
    matmul(&build, &local)
}

fn to_mat4(transform: &Transform12, units_per_mm: f32) -> fieldgraph_core::value::Mat4 {
    let t = transform.0;
    fieldgraph_core::value::Mat4::from_row_major([
        t[0], t[3], t[6], t[9] * units_per_mm,
        t[1], t[4], t[7], t[10] * units_per_mm,
        t[2], t[5], t[8], t[11] * units_per_mm,
        0.0, 0.0, 0.0, 1.0,
    ])
}

fn matmul(
    a: &fieldgraph_core::value::Mat4,
    b: &fieldgraph_core::value::Mat4,
) -> fieldgraph_core::value::Mat4 {
    let mut out = [0.0f32; 16];
    for row in 0..4 {
        for col in 0..4 {
            let mut sum = 0.0;
            for k in 0..4 {
                sum += a.get(row, k) * b.get(k, col);
            }
            out[(row * 4 + col) as usize] = sum;
        }
    }
    fieldgraph_core::value::Mat4::from_row_major(out)
}

fn set_literal(function: &mut Function, param_id: ParameterId, value: f32) {
    let ty = function.parameter(param_id).map(|p| p.value_type()).unwrap_or(ValueType::Scalar);
    let resolved = match ty {
        ValueType::ResourceId => Value::ResourceId(ResourceId::new(value as u32)),
        _ => Value::Scalar(value),
    };
    if let Some(param) = function.parameter_mut(param_id) {
        param.set_value(resolved);
        param.set_input_source_required(false);
    }
}

fn link(function: &mut Function, source: PortId, target: ParameterId) {
    let _ = function.link(source, target, true);
}

fn find_parameter_named(function: &Function, node_id: NodeId, name: &str) -> Option<ParameterId> {
    let node = function.node(node_id)?;
    node.parameters()
        .iter()
        .copied()
        .find(|pid| function.parameter(*pid).map(|p| p.name() == name).unwrap_or(false))
}

fn find_output_named(function: &Function, node_id: NodeId, name: &str) -> Option<PortId> {
    let node = function.node(node_id)?;
    node.outputs()
        .iter()
        .copied()
        .find(|pid| function.port(*pid).map(|p| p.name() == name).unwrap_or(false))
}

/// Splits `"NodeName.Port"` on the first `.`; a reference with no dot is
/// passed through as both node and port name unchanged, matching what
/// the reference reader itself falls back to for a malformed reference.
fn split_reference(reference: &str) -> (&str, &str) {
    match reference.find('.') {
        Some(at) => (&reference[..at], &reference[at + 1..]),
        None => (reference, reference),
    }
}

fn resolve_reference(
    function: &Function,
    begin: NodeId,
    name_to_node: &BTreeMap<String, NodeId>,
    reference: &str,
) -> Option<PortId> {
    let (node_name, port_name) = split_reference(reference);
    let source_node = if node_name == "inputs" { begin } else { *name_to_node.get(node_name)? };
    find_output_named(function, source_node, port_name)
}

fn map_node_type(node_type: NodeTypeDoc) -> Option<NodeKind> {
    use NodeTypeDoc::*;
    Some(match node_type {
        Addition => NodeKind::Math(Op::Add),
        Subtraction => NodeKind::Math(Op::Sub),
        Multiplication => NodeKind::Math(Op::Mul),
        Division => NodeKind::Math(Op::Div),
        Constant => NodeKind::Constant(ValueType::Scalar),
        ConstVec => NodeKind::Constant(ValueType::Vec3),
        ConstMat => NodeKind::Constant(ValueType::Mat4),
        ConstResourceId => NodeKind::Constant(ValueType::ResourceId),
        ComposeVector => NodeKind::Math(Op::ComposeVector),
        DecomposeVector => NodeKind::Math(Op::DecomposeVector),
        ComposeMatrix => NodeKind::Math(Op::ComposeMatrix),
        MatrixFromColumns => NodeKind::Math(Op::ComposeMatrixFromColumns),
        MatrixFromRows => NodeKind::Math(Op::ComposeMatrixFromRows),
        Dot => NodeKind::Math(Op::Dot),
        Cross => NodeKind::Math(Op::Cross),
        MatVecMultiplication => NodeKind::Math(Op::MatrixVectorMul),
        Transpose => NodeKind::Math(Op::Transpose),
        Inverse => NodeKind::Math(Op::Inverse),
        Sinus => NodeKind::Math(Op::Sin),
        Cosinus => NodeKind::Math(Op::Cos),
        Tan => NodeKind::Math(Op::Tan),
        ArcSin => NodeKind::Math(Op::Asin),
        ArcCos => NodeKind::Math(Op::Acos),
        ArcTan => NodeKind::Math(Op::Atan),
        ArcTan2 => NodeKind::Math(Op::Atan2),
        Min => NodeKind::Math(Op::Min),
        Max => NodeKind::Math(Op::Max),
        Abs => NodeKind::Math(Op::Abs),
        Fmod => NodeKind::Math(Op::Fmod),
        Mod => NodeKind::Math(Op::Mod),
        Sqrt => NodeKind::Math(Op::Sqrt),
        Exp => NodeKind::Math(Op::Exp),
        Log => NodeKind::Math(Op::Log),
        Log2 => NodeKind::Math(Op::Log2),
        Log10 => NodeKind::Math(Op::Log10),
        Select => NodeKind::Math(Op::Select),
        Clamp => NodeKind::Math(Op::Clamp),
        Sinh => NodeKind::Math(Op::Sinh),
        Cosh => NodeKind::Math(Op::Cosh),
        Tanh => NodeKind::Math(Op::Tanh),
        Round => NodeKind::Math(Op::Round),
        Ceil => NodeKind::Math(Op::Ceil),
        Floor => NodeKind::Math(Op::Floor),
        Sign => NodeKind::Math(Op::Sign),
        Fract => NodeKind::Math(Op::Fract),
        Length => NodeKind::Math(Op::Length),
        VectorFromScalar => NodeKind::Math(Op::VectorFromScalar),
        Mesh => NodeKind::Math(Op::SignedDistanceToMesh),
        UnsignedMesh => NodeKind::Math(Op::UnsignedDistanceToMesh),
        FunctionCall => NodeKind::FunctionCall,
        Pow => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ImplicitInputDoc, MetadataDoc};

    fn doc_with_one_addition() -> SceneDocument {
        SceneDocument {
            unit: crate::document::Unit::Millimeter,
            functions: vec![ImplicitFunctionDoc {
                model_resource_id: 1,
                display_name: "addsample".into(),
                inputs: vec![("Pos".into(), ValueType::Vec3)],
                outputs: vec![("Shape".into(), ValueType::Scalar)],
                nodes: vec![ImplicitNodeDoc {
                    name: "len".into(),
                    node_type: NodeTypeDoc::Length,
                    function_reference: None,
                    inputs: vec![ImplicitInputDoc {
                        name: "a".into(),
                        value: InputValueDoc::Reference("inputs.Pos".into()),
                    }],
                }],
            }],
            image_functions: vec![],
            level_sets: vec![],
            meshes: vec![],
            build_items: vec![],
            metadata: MetadataDoc::default(),
        }
    }

    #[test]
    fn a_function_with_one_length_node_links_to_begin_pos() {
        let document = doc_with_one_addition();
        let assembly = import_scene(&document);
        let function = assembly.find(ResourceId::new(1)).expect("function imported");
        assert_eq!(function.node_count(), 3); // Begin, End, Length
    }

    #[test]
    fn split_reference_handles_the_inputs_sentinel() {
        assert_eq!(split_reference("inputs.Pos"), ("inputs", "Pos"));
        assert_eq!(split_reference("len.Value"), ("len", "Value"));
    }

    #[test]
    fn split_reference_falls_back_to_the_whole_string_without_a_dot() {
        assert_eq!(split_reference("malformed"), ("malformed", "malformed"));
    }

    #[test]
    fn unmapped_node_types_are_skipped_not_fatal() {
        let mut document = doc_with_one_addition();
        document.functions[0].nodes.push(ImplicitNodeDoc {
            name: "pow".into(),
            node_type: NodeTypeDoc::Pow,
            function_reference: None,
            inputs: vec![],
        });
        let assembly = import_scene(&document);
        let function = assembly.find(ResourceId::new(1)).expect("function imported");
        assert_eq!(function.node_count(), 3); // the Pow node never got created
    }
}

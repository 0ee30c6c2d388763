//! Structural export (§6.1): turns an [`Assembly`] back into the
//! implicit-function resources a real 3MF writer would serialize.

use std::collections::BTreeMap;

use log::info;

use fieldgraph_assembly::assembly::Assembly;
use fieldgraph_core::ops::Op;
use fieldgraph_core::types::ValueType;
use fieldgraph_core::value::{ResourceId, Value};
use fieldgraph_graph::function::Function;
use fieldgraph_graph::node::{Node, NodeKind, FUNCTION_ID_PARAMETER};
use fieldgraph_graph::parameter::Parameter;

use crate::document::{
    ImplicitFunctionDoc, ImplicitInputDoc, ImplicitNodeDoc, InputValueDoc, MetadataDoc,
    NodeTypeDoc, SceneDocument, Unit,
};

/// Exports every non-managed function in `assembly` into a fresh
/// [`SceneDocument`]. Managed functions are lowering's own synthesized
/// helpers (gradient/normalize expansions, §4.4.5-6); the reference
/// writer skips a function outright once it reports itself managed, and
/// this does the same rather than re-serializing compiler output as if
/// it were user content.
///
/// `existing_metadata`'s fields are left untouched when already present,
/// mirroring the reference writer's idempotency check before it adds its
/// own metadata group; only the gaps are filled from `application_name`
/// and `creation_date_utc`. Producing the timestamp itself is left to the
/// caller, who has an actual clock.
pub fn export_scene(
    assembly: &Assembly,
    existing_metadata: &MetadataDoc,
    application_name: &str,
    creation_date_utc: &str,
) -> SceneDocument {
    let mut resource_to_model: BTreeMap<ResourceId, u32> = BTreeMap::new();
    let mut next_model_id = 1u32;
    for function in assembly.functions_in_emission_order() {
        if function.managed() {
            continue;
        }
        resource_to_model.insert(function.resource_id(), next_model_id);
        next_model_id += 1;
    }

    let mut functions = Vec::new();
    for function in assembly.functions_in_emission_order() {
        if function.managed() {
            info!("skipping managed function '{}' on export", function.display_name());
            continue;
        }
        let model_id = resource_to_model[&function.resource_id()];
        functions.push(export_function(function, model_id, &resource_to_model));
    }

    SceneDocument {
        unit: Unit::Millimeter,
        functions,
        image_functions: Vec::new(),
        level_sets: Vec::new(),
        meshes: Vec::new(),
        build_items: Vec::new(),
        metadata: fill_metadata(existing_metadata, application_name, creation_date_utc),
    }
}

fn fill_metadata(existing: &MetadataDoc, application_name: &str, creation_date_utc: &str) -> MetadataDoc {
    let mut metadata = existing.clone();
    if metadata.application_name.is_some() {
        info!("application name metadata already present; leaving it untouched");
    } else {
        metadata.application_name = Some(application_name.to_string());
    }
    if metadata.creation_date_utc.is_some() {
        info!("creation date metadata already present; leaving it untouched");
    } else {
        metadata.creation_date_utc = Some(creation_date_utc.to_string());
    }
    metadata
}

fn export_function(
    function: &Function,
    model_resource_id: u32,
    resource_to_model: &BTreeMap<ResourceId, u32>,
) -> ImplicitFunctionDoc {
    let begin = function.begin();
    let end = function.end();

    let inputs = function
        .node(begin)
        .expect("every function has a begin node")
        .outputs()
        .iter()
        .filter_map(|pid| function.port(*pid))
        .map(|port| (port.name().to_string(), port.value_type()))
        .collect();
    let outputs = function
        .node(end)
        .expect("every function has an end node")
        .parameters()
        .iter()
        .filter_map(|pid| function.parameter(*pid))
        .map(|param| (param.name().to_string(), param.value_type()))
        .collect();

    let mut nodes = Vec::new();
    for node in function.nodes() {
        if node.is_begin() || node.is_end() {
            continue;
        }
        let Some(node_type) = map_node_kind(node.kind()) else { continue };
        let function_reference = matches!(node.kind(), NodeKind::FunctionCall)
            .then(|| function_call_reference(function, node, resource_to_model))
            .flatten();

        let node_inputs = node
            .parameters()
            .iter()
            .filter_map(|pid| function.parameter(*pid))
            .filter(|param| param.name() != FUNCTION_ID_PARAMETER)
            .map(|param| ImplicitInputDoc { name: param.name().to_string(), value: export_input_value(param) })
            .collect();

        nodes.push(ImplicitNodeDoc {
            name: node.unique_name().to_string(),
            node_type,
            function_reference,
            inputs: node_inputs,
        });
    }

    ImplicitFunctionDoc {
        model_resource_id,
        display_name: function.display_name().to_string(),
        inputs,
        outputs,
        nodes,
    }
}

fn function_call_reference(
    function: &Function,
    node: &Node,
    resource_to_model: &BTreeMap<ResourceId, u32>,
) -> Option<u32> {
    let fid_param = node
        .parameters()
        .iter()
        .copied()
        .find(|pid| function.parameter(*pid).map(|p| p.name() == FUNCTION_ID_PARAMETER).unwrap_or(false))?;
    match function.parameter(fid_param)?.value() {
        Value::ResourceId(id) => resource_to_model.get(&id).copied(),
        _ => None,
    }
}

/// The `"Begin.Port"` form `Function::link` caches is rewritten to the
/// `"inputs.Port"` sentinel the reader expects for that source node.
fn export_input_value(parameter: &Parameter) -> InputValueDoc {
    match parameter.source() {
        Some(source) => {
            let reference = match source.cached_name.strip_prefix("Begin.") {
                Some(rest) => format!("inputs.{rest}"),
                None => source.cached_name.clone(),
            };
            InputValueDoc::Reference(reference)
        }
        None => InputValueDoc::Literal(literal_component(parameter.value())),
    }
}

fn literal_component(value: Value) -> f32 {
    match value {
        Value::Scalar(s) => s,
        Value::ResourceId(id) => id.0 as f32,
        Value::Vec3(_) | Value::Mat4(_) => 0.0,
    }
}

/// Inverse of the importer's node-type mapping. `BoxMinMax`/`ImageSampler`
/// and the lowering-only node kinds have no archive-level node type of
/// their own — they only ever arise from this crate's own level-set and
/// function-from-image synthesis, or from the compiler's lowering passes
/// — so a function containing one exports with that node silently
/// dropped rather than invented as a new archive node type.
fn map_node_kind(kind: &NodeKind) -> Option<NodeTypeDoc> {
    use NodeTypeDoc::*;
    Some(match kind {
        NodeKind::Math(op) => match op {
            Op::Add => Addition,
            Op::Sub => Subtraction,
            Op::Mul => Multiplication,
            Op::Div => Division,
            Op::ComposeVector => ComposeVector,
            Op::DecomposeVector => DecomposeVector,
            Op::ComposeMatrix => ComposeMatrix,
            Op::ComposeMatrixFromColumns => MatrixFromColumns,
            Op::ComposeMatrixFromRows => MatrixFromRows,
            Op::Dot => Dot,
            Op::Cross => Cross,
            Op::MatrixVectorMul => MatVecMultiplication,
            Op::Transpose => Transpose,
            Op::Inverse => Inverse,
            Op::Sin => Sinus,
            Op::Cos => Cosinus,
            Op::Tan => Tan,
            Op::Asin => ArcSin,
            Op::Acos => ArcCos,
            Op::Atan => ArcTan,
            Op::Atan2 => ArcTan2,
            Op::Min => Min,
            Op::Max => Max,
            Op::Abs => Abs,
            Op::Fmod => Fmod,
            Op::Mod => Mod,
            Op::Sqrt => Sqrt,
            Op::Exp => Exp,
            Op::Log => Log,
            Op::Log2 => Log2,
            Op::Log10 => Log10,
            Op::Select => Select,
            Op::Clamp => Clamp,
            Op::Sinh => Sinh,
            Op::Cosh => Cosh,
            Op::Tanh => Tanh,
            Op::Round => Round,
            Op::Ceil => Ceil,
            Op::Floor => Floor,
            Op::Sign => Sign,
            Op::Fract => Fract,
            Op::Length => Length,
            Op::VectorFromScalar => VectorFromScalar,
            Op::SignedDistanceToMesh => Mesh,
            Op::UnsignedDistanceToMesh => UnsignedMesh,
            Op::BoxMinMax | Op::ImageSampler => return None,
        },
        NodeKind::Constant(ty) => match ty {
            ValueType::Scalar => Constant,
            ValueType::Vec3 => ConstVec,
            ValueType::Mat4 => ConstMat,
            ValueType::ResourceId => ConstResourceId,
        },
        NodeKind::FunctionCall => FunctionCall,
        NodeKind::Begin
        | NodeKind::End
        | NodeKind::FunctionGradient { .. }
        | NodeKind::NormalizeDistanceField { .. } => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgraph_assembly::assembly::Assembly;

    #[test]
    fn managed_functions_are_skipped_on_export() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let entry_id = assembly.assembly_function_id();
        assembly.add_if_missing(entry_id, "Scene");
        let _managed_id = assembly.insert_managed("Helper");

        let document = export_scene(&assembly, &MetadataDoc::default(), "test-app", "2026-07-28T00:00:00Z");
        assert_eq!(document.functions.len(), 1);
        assert_eq!(document.functions[0].display_name, "Scene");
    }

    #[test]
    fn existing_metadata_is_not_overwritten() {
        let assembly = Assembly::new(ResourceId::new(0));
        let existing = MetadataDoc { application_name: Some("Already Set".into()), creation_date_utc: None };
        let document = export_scene(&assembly, &existing, "New App", "2026-07-28T00:00:00Z");
        assert_eq!(document.metadata.application_name.as_deref(), Some("Already Set"));
        assert_eq!(document.metadata.creation_date_utc.as_deref(), Some("2026-07-28T00:00:00Z"));
    }
}

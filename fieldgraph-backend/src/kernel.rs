//! Kernel-source backend (§4.5.1): one textual statement per node.
//!
//! A topological
//! walk that assigns each visited output a freshly named temporary,
//! remembers it in a var-map keyed by port id, and falls back to a literal
//! when a parameter isn't bound to anything. The assembly function gets the
//! fixed `float4 model(float3 Pos, PAYLOAD_ARGS)` signature with NaN/Inf
//! fallback substitution on its distance output; every other reachable
//! function gets `void <name>(<inputs>, <outputs-by-pointer>, PAYLOAD_ARGS)`,
//! including only ports the use-marking pass actually kept.

#[cfg(not(feature = "std"))]
use alloc::{collections::BTreeMap, format, string::String, vec::Vec};
#[cfg(feature = "std")]
use std::collections::BTreeMap;

use core::fmt;

use fieldgraph_assembly::assembly::{Assembly, AssemblyError};
use fieldgraph_core::log::{LogEvent, LogSink};
use fieldgraph_core::ops::Op;
use fieldgraph_core::types::ValueType;
use fieldgraph_core::value::{ResourceId, Value};
use fieldgraph_graph::function::Function;
use fieldgraph_graph::id::{NodeId, ParameterId, PortId};
use fieldgraph_graph::node::{Node, NodeKind};

use crate::rules::output_value_type;
use crate::traversal::{drive, reachable_functions, resolve_callee, EmissionMemo, NodeVisitor, TraversalError};

/// A failure emitting kernel source for an assembly.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The assembly has no function at its designated entry id.
    MissingAssemblyFunction(ResourceId),
    /// The entry function failed type inference; a backend cannot emit a
    /// body it can't type (§4.5 "a function invalid; backends refuse to
    /// emit for it").
    InvalidAssemblyFunction(ResourceId),
    /// A node was visited twice in one function's traversal.
    Traversal(TraversalError),
    /// A `Math` node reached codegen before the inference pass stamped a
    /// rule onto it.
    UnresolvedRule(NodeId),
    /// A `FunctionCall`'s `Function` parameter doesn't resolve to a
    /// function present in the assembly.
    UnresolvedCallee(NodeId),
    /// A `FunctionGradient`/`NormalizeDistanceField` node survived to
    /// codegen; the lowering passes should have rewritten it away first.
    UnloweredNode(NodeId),
}

impl From<TraversalError> for BackendError {
    fn from(err: TraversalError) -> Self {
        BackendError::Traversal(err)
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::MissingAssemblyFunction(id) => write!(f, "assembly function {} is missing", id.0),
            BackendError::InvalidAssemblyFunction(id) => write!(f, "assembly function {} is invalid", id.0),
            BackendError::Traversal(err) => write!(f, "{err}"),
            BackendError::UnresolvedRule(id) => write!(f, "node {} has no rule stamped by inference", id.0),
            BackendError::UnresolvedCallee(id) => write!(f, "node {} does not resolve to a known function", id.0),
            BackendError::UnloweredNode(id) => write!(f, "node {} was not lowered before codegen", id.0),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BackendError {}

impl From<AssemblyError> for BackendError {
    fn from(err: AssemblyError) -> Self {
        match err {
            AssemblyError::MissingAssemblyFunction { id } => BackendError::MissingAssemblyFunction(id),
        }
    }
}

/// Generated kernel source, split the way a shader compiler usually keeps
/// them: forward declarations so call order doesn't matter, then bodies.
#[derive(Debug, Clone, Default)]
pub struct KernelModule {
    pub declarations: String,
    pub definitions: String,
}

/// Emits kernel source for every function reachable from `assembly`'s entry
/// function, in ascending resource-id order (§5). Functions outside that
/// reachable set, and functions the final inference pass left invalid, are
/// skipped with a warning logged to `log` rather than failing the whole
/// module — only an invalid *entry* function is fatal.
pub fn emit_kernel_module(assembly: &Assembly, log: &mut dyn LogSink) -> Result<KernelModule, BackendError> {
    let entry = assembly.require_assembly_function()?;
    if !entry.is_valid() {
        return Err(BackendError::InvalidAssemblyFunction(assembly.assembly_function_id()));
    }

    let reachable = reachable_functions(assembly);
    let mut module = KernelModule::default();
    let mut memo = EmissionMemo::new();

    for function in assembly.functions_in_emission_order() {
        let id = function.resource_id();
        if id != assembly.assembly_function_id() && !reachable.contains(&id) {
            continue;
        }
        if !function.is_valid() {
            log.emit(LogEvent::warning("skipping an invalid function in kernel codegen"));
            continue;
        }
        if !memo.claim(id) {
            continue;
        }
        emit_function(assembly, function, id == assembly.assembly_function_id(), &mut module)?;
    }
    Ok(module)
}

/// Identifier-safe name for a non-entry function. The entry function's
/// name is always the fixed `model` and never routes through this (a
/// `display_name` isn't guaranteed to be a valid identifier).
fn kernel_function_name(id: ResourceId) -> String {
    format!("fn_{}", id.0)
}

/// `(name, type, port)` for every `Begin` output the use-marking pass kept.
fn used_inputs(function: &Function) -> Vec<(String, ValueType, PortId)> {
    let begin = function.begin();
    let Some(node) = function.node(begin) else { return Vec::new() };
    node.outputs()
        .iter()
        .filter_map(|pid| function.port(*pid))
        .filter(|port| port.used())
        .map(|port| (String::from(port.name()), port.value_type(), port.id()))
        .collect()
}

/// `(name, type, parameter)` for every `End` parameter still consumed by
/// some caller after use-marking.
fn consumed_outputs(function: &Function) -> Vec<(String, ValueType, ParameterId)> {
    let end = function.end();
    let Some(node) = function.node(end) else { return Vec::new() };
    node.parameters()
        .iter()
        .filter_map(|pid| function.parameter(*pid))
        .filter(|p| p.consumed_by_function())
        .map(|p| (String::from(p.name()), p.value_type(), p.id()))
        .collect()
}

fn emit_function(
    assembly: &Assembly,
    function: &Function,
    is_entry: bool,
    module: &mut KernelModule,
) -> Result<(), BackendError> {
    let name = kernel_function_name(function.resource_id());
    let inputs = used_inputs(function);
    let outputs = if is_entry { Vec::new() } else { consumed_outputs(function) };

    let mut signature = if is_entry {
        "float4 model(float3 Pos, PAYLOAD_ARGS)".to_string()
    } else {
        let mut params: Vec<String> =
            inputs.iter().map(|(n, ty, _)| format!("{} {}", ty.kernel_name(), n)).collect();
        params.extend(outputs.iter().map(|(n, ty, _)| format!("{}* {}_out", ty.kernel_name(), n)));
        params.push("PAYLOAD_ARGS".into());
        format!("void {}({})", name, params.join(", "))
    };

    module.declarations.push_str(&signature);
    module.declarations.push_str(";\n");

    let mut emitter = FunctionEmitter::new(assembly, is_entry, &outputs);
    for (_, _, port_id) in &inputs {
        let name = function.port(*port_id).map(|p| String::from(p.name())).unwrap_or_default();
        emitter.var_map.insert(*port_id, name);
    }

    drive(function, &mut emitter)?;

    signature.push_str(" {\n");
    module.definitions.push_str(&signature);
    module.definitions.push_str(&emitter.body);
    module.definitions.push_str(&emitter.tail(assembly, function)?);
    module.definitions.push_str("}\n\n");
    Ok(())
}

struct FunctionEmitter<'a> {
    assembly: &'a Assembly,
    is_entry: bool,
    outputs: &'a [(String, ValueType, ParameterId)],
    var_map: BTreeMap<PortId, String>,
    body: String,
}

impl<'a> FunctionEmitter<'a> {
    fn new(assembly: &'a Assembly, is_entry: bool, outputs: &'a [(String, ValueType, ParameterId)]) -> Self {
        Self { assembly, is_entry, outputs, var_map: BTreeMap::new(), body: String::new() }
    }

    fn operand(&self, function: &Function, parameter_id: ParameterId) -> String {
        let Some(param) = function.parameter(parameter_id) else { return "0.0".into() };
        match param.source() {
            Some(source) => self.var_map.get(&source.port).cloned().unwrap_or_else(|| "0.0".into()),
            None => param.value().to_kernel_literal(),
        }
    }

    fn fresh(&self, node: &Node, output_name: &str) -> String {
        format!("_n{}_{}", node.id().0, output_name)
    }

    /// Builds the statement(s) for one node and records its output(s) in
    /// `var_map`, mirroring `ShaderNode::generate_glsl`'s one-node,
    /// one-assignment shape — widened here to the handful of node kinds
    /// that produce more than one output.
    fn generate_statement(&mut self, function: &Function, node: &Node) -> Result<String, BackendError> {
        let mut text = String::new();

        match node.kind() {
            NodeKind::Begin | NodeKind::End => unreachable!("skipped by the traversal driver"),
            NodeKind::Constant(ty) => {
                let out_port = node.outputs()[0];
                let var = self.fresh(node, "value");
                let params = node.parameters();
                let expr = match ty {
                    ValueType::Scalar | ValueType::ResourceId => self.operand(function, params[0]),
                    ValueType::Vec3 => format!(
                        "float3({}, {}, {})",
                        self.operand(function, params[0]),
                        self.operand(function, params[1]),
                        self.operand(function, params[2]),
                    ),
                    ValueType::Mat4 => {
                        let parts: Vec<String> = params.iter().map(|pid| self.operand(function, *pid)).collect();
                        format!("float4x4({})", parts.join(", "))
                    }
                };
                text.push_str(&format!("    {} {} = {};\n", ty.kernel_name(), var, expr));
                self.var_map.insert(out_port, var);
            }
            NodeKind::Math(op) => {
                let rule = node.rule().ok_or(BackendError::UnresolvedRule(node.id()))?;
                let params = node.parameters();
                let args: Vec<String> = params.iter().map(|pid| self.operand(function, *pid)).collect();

                if *op == Op::DecomposeVector {
                    let expr = args.first().cloned().unwrap_or_else(|| "float3(0.0, 0.0, 0.0)".into());
                    let tmp = self.fresh(node, "value");
                    text.push_str(&format!("    float3 {tmp} = {expr};\n"));
                    for (i, axis) in ["x", "y", "z"].iter().enumerate() {
                        if let Some(port) = node.outputs().get(i) {
                            let var = self.fresh(node, axis);
                            text.push_str(&format!("    float {var} = {tmp}.{axis};\n"));
                            self.var_map.insert(*port, var);
                        }
                    }
                } else {
                    let expr = operator_expression(*op, rule, &args);
                    let out_ty = output_value_type(*op, rule);
                    let var = self.fresh(node, "value");
                    text.push_str(&format!("    {} {} = {};\n", out_ty.kernel_name(), var, expr));
                    if let Some(port) = node.outputs().first() {
                        self.var_map.insert(*port, var);
                    }
                }
            }
            NodeKind::FunctionCall => {
                let callee_id =
                    resolve_callee(function, node.id()).ok_or(BackendError::UnresolvedCallee(node.id()))?;
                let callee = self.assembly.find(callee_id).ok_or(BackendError::UnresolvedCallee(node.id()))?;
                let call_name = kernel_function_name(callee_id);

                let mut args = Vec::new();
                for (name, _ty, _port) in used_inputs(callee) {
                    if let Some(pid) = find_parameter_named(function, node, &name) {
                        args.push(self.operand(function, pid));
                    }
                }

                let mut out_decls = Vec::new();
                let mut out_refs = Vec::new();
                let mut new_vars = Vec::new();
                for (name, ty, _pid) in consumed_outputs(callee) {
                    if let Some(port) = find_output_named(node, function, &name) {
                        let var = self.fresh(node, &name);
                        out_decls.push(format!("    {} {};\n", ty.kernel_name(), var));
                        out_refs.push(format!("&{var}"));
                        new_vars.push((port, var));
                    }
                }

                for decl in &out_decls {
                    text.push_str(decl);
                }
                let mut call_args = args;
                call_args.extend(out_refs);
                call_args.push("PAYLOAD_ARGS".into());
                text.push_str(&format!("    {}({});\n", call_name, call_args.join(", ")));

                for (port, var) in new_vars {
                    self.var_map.insert(port, var);
                }
            }
            NodeKind::FunctionGradient { .. } | NodeKind::NormalizeDistanceField { .. } => {
                return Err(BackendError::UnloweredNode(node.id()));
            }
        }

        Ok(text)
    }

    fn tail(&self, assembly: &Assembly, function: &Function) -> Result<String, BackendError> {
        let end = function.end();
        let mut out = String::new();

        if self.is_entry {
            let Some(end_node) = function.node(end) else { return Ok(out) };
            let params: BTreeMap<String, ParameterId> = end_node
                .parameters()
                .iter()
                .filter_map(|pid| function.parameter(*pid).map(|p| (String::from(p.name()), *pid)))
                .collect();
            let shape_pid = params.get("Shape").copied();
            let color_pid = params.get("Color").copied();
            let distance_raw = shape_pid.map(|pid| self.operand(function, pid)).unwrap_or_else(|| "0.0".into());
            let color = color_pid
                .map(|pid| self.operand(function, pid))
                .unwrap_or_else(|| "float3(0.0, 0.0, 0.0)".into());
            out.push_str(&format!("    float distance_raw = {distance_raw};\n"));
            match assembly.fallback() {
                Some(Value::Scalar(v)) => {
                    out.push_str(&format!(
                        "    float distance = isfinite(distance_raw) ? distance_raw : {:.9};\n",
                        v
                    ));
                }
                _ => out.push_str("    float distance = distance_raw;\n"),
            }
            out.push_str(&format!("    return float4({color}, distance);\n"));
        } else {
            for (name, _ty, pid) in self.outputs {
                let expr = self.operand(function, *pid);
                out.push_str(&format!("    *{name}_out = {expr};\n"));
            }
        }
        Ok(out)
    }
}

impl<'a> NodeVisitor for FunctionEmitter<'a> {
    type Error = BackendError;

    fn visit_begin(&mut self, _function: &Function) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_node(&mut self, function: &Function, node_id: NodeId) -> Result<(), Self::Error> {
        let node = function.node(node_id).expect("node id came from this function's own order");
        let statement = self.generate_statement(function, node)?;
        self.body.push_str(&statement);
        Ok(())
    }

    fn visit_end(&mut self, _function: &Function) -> Result<(), Self::Error> {
        Ok(())
    }
}

fn find_parameter_named(function: &Function, node: &Node, name: &str) -> Option<ParameterId> {
    node.parameters().iter().copied().find(|pid| function.parameter(*pid).map(|p| p.name() == name).unwrap_or(false))
}

fn find_output_named(node: &Node, function: &Function, name: &str) -> Option<PortId> {
    node.outputs().iter().copied().find(|pid| function.port(*pid).map(|p| p.name() == name).unwrap_or(false))
}

/// Textual expression for one `Math` node, given its already-evaluated
/// operand expressions. Elementwise ops read the same regardless of
/// `rule` — the kernel language's own operator overloads on `float`,
/// `float3` and `float4x4` handle the width (§4.5.1).
fn operator_expression(op: Op, _rule: fieldgraph_core::types::Rule, args: &[String]) -> String {
    let a = args.first().cloned().unwrap_or_else(|| "0.0".into());
    let b = args.get(1).cloned().unwrap_or_else(|| "0.0".into());
    let c = args.get(2).cloned().unwrap_or_else(|| "0.0".into());
    let d = args.get(3).cloned().unwrap_or_else(|| "0.0".into());

    match op {
        Op::Add => format!("({a} + {b})"),
        Op::Sub => format!("({a} - {b})"),
        Op::Mul => format!("({a} * {b})"),
        Op::Div => format!("({a} / {b})"),
        Op::Sin => format!("sin({a})"),
        Op::Cos => format!("cos({a})"),
        Op::Tan => format!("tan({a})"),
        Op::Asin => format!("asin({a})"),
        Op::Acos => format!("acos({a})"),
        Op::Atan => format!("atan({a})"),
        Op::Abs => format!("abs({a})"),
        Op::Sqrt => format!("sqrt({a})"),
        Op::Exp => format!("exp({a})"),
        Op::Log => format!("log({a})"),
        Op::Log2 => format!("log2({a})"),
        Op::Log10 => format!("log10({a})"),
        Op::Sign => format!("sign({a})"),
        Op::Round => format!("round({a})"),
        Op::Ceil => format!("ceil({a})"),
        Op::Floor => format!("floor({a})"),
        Op::Fract => format!("frac({a})"),
        Op::Sinh => format!("sinh({a})"),
        Op::Cosh => format!("cosh({a})"),
        Op::Tanh => format!("tanh({a})"),
        Op::Atan2 => format!("atan2({a}, {b})"),
        Op::Fmod => format!("({a} - {b} * trunc({a} / {b}))"),
        Op::Mod => format!("({a} - {b} * floor({a} / {b}))"),
        Op::Min => format!("min({a}, {b})"),
        Op::Max => format!("max({a}, {b})"),
        Op::Select => format!("(({a}) < ({b}) ? ({c}) : ({d}))"),
        Op::Clamp => format!("clamp({a}, {b}, {c})"),
        Op::Dot => format!("dot({a}, {b})"),
        Op::Cross => format!("cross({a}, {b})"),
        Op::Length => format!("length({a})"),
        Op::MatrixVectorMul => format!("mul({a}, {b})"),
        Op::Transpose => format!("transpose({a})"),
        Op::Inverse => format!("inverse({a})"),
        Op::ComposeVector => format!("float3({a}, {b}, {c})"),
        Op::DecomposeVector => unreachable!("handled specially by generate_statement"),
        Op::ComposeMatrix => format!("float4x4({})", args.join(", ")),
        Op::ComposeMatrixFromColumns => format!("mat4_from_columns({})", args.join(", ")),
        Op::ComposeMatrixFromRows => format!("mat4_from_rows({})", args.join(", ")),
        Op::VectorFromScalar => format!("float3({a}, {a}, {a})"),
        Op::SignedDistanceToMesh => format!("mesh_sdf_signed({a}, {b}, {c}, PAYLOAD_ARGS)"),
        Op::UnsignedDistanceToMesh => format!("mesh_sdf_unsigned({a}, {b}, {c}, PAYLOAD_ARGS)"),
        Op::ImageSampler => format!("image_sample({a}, {b}, PAYLOAD_ARGS)"),
        Op::BoxMinMax => format!("box_min_max({a}, {b}, {c})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgraph_core::log::SilentSink;
    use fieldgraph_core::ops::Op;
    use fieldgraph_core::types::{Rule, ValueType};
    use fieldgraph_graph::node::FUNCTION_ID_PARAMETER;

    fn sphere_assembly() -> Assembly {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let entry = assembly.add_if_missing(ResourceId::new(0), "Scene");
        let begin = entry.begin();
        entry.add_output(begin, "Pos", ValueType::Vec3).unwrap();
        let pos_port = entry.node(begin).unwrap().outputs()[0];
        entry.port_mut(pos_port).unwrap().set_used(true);

        let length = entry.create_node(NodeKind::Math(Op::Length));
        entry.node_mut(length).unwrap().set_rule(Some(Rule::Fixed));
        let length_in = entry.node(length).unwrap().parameters()[0];
        entry.link(pos_port, length_in, true).unwrap();
        let length_out = entry.node(length).unwrap().outputs()[0];

        let radius = entry.create_node(NodeKind::Constant(ValueType::Scalar));
        let radius_value = entry.node(radius).unwrap().parameters()[0];
        entry.parameter_mut(radius_value).unwrap().set_value(Value::Scalar(1.0));
        let radius_out = entry.node(radius).unwrap().outputs()[0];

        let sub = entry.create_node(NodeKind::Math(Op::Sub));
        entry.node_mut(sub).unwrap().set_rule(Some(Rule::Scalar));
        let sub_params = entry.node(sub).unwrap().parameters().to_vec();
        entry.link(length_out, sub_params[0], true).unwrap();
        entry.link(radius_out, sub_params[1], true).unwrap();
        let sub_out = entry.node(sub).unwrap().outputs()[0];

        let color = entry.create_node(NodeKind::Constant(ValueType::Vec3));
        let color_out = entry.node(color).unwrap().outputs()[0];

        let end = entry.end();
        let end_params = entry.node(end).unwrap().parameters().to_vec();
        let shape_param = end_params.iter().copied().find(|p| entry.parameter(*p).unwrap().name() == "Shape").unwrap();
        let color_param = end_params.iter().copied().find(|p| entry.parameter(*p).unwrap().name() == "Color").unwrap();
        entry.link(sub_out, shape_param, true).unwrap();
        entry.link(color_out, color_param, true).unwrap();
        entry.parameter_mut(shape_param).unwrap().set_consumed_by_function(true);
        entry.parameter_mut(color_param).unwrap().set_consumed_by_function(true);

        entry.rebuild_order().unwrap();
        assembly
    }

    #[test]
    fn emits_a_float4_model_function_for_a_sphere() {
        let assembly = sphere_assembly();
        let mut sink = SilentSink;
        let module = emit_kernel_module(&assembly, &mut sink).unwrap();
        assert!(module.declarations.contains("float4 model(float3 Pos, PAYLOAD_ARGS);"));
        assert!(module.definitions.contains("float4 model(float3 Pos, PAYLOAD_ARGS) {"));
        assert!(module.definitions.contains("length(Pos)"));
        assert!(module.definitions.contains("return float4("));
    }

    #[test]
    fn missing_assembly_function_is_reported() {
        let assembly = Assembly::new(ResourceId::new(0));
        let mut sink = SilentSink;
        let err = emit_kernel_module(&assembly, &mut sink).unwrap_err();
        assert!(matches!(err, BackendError::MissingAssemblyFunction(_)));
    }

    #[test]
    fn invalid_assembly_function_is_fatal() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let entry = assembly.add_if_missing(ResourceId::new(0), "Scene");
        entry.set_valid(false);
        let mut sink = SilentSink;
        let err = emit_kernel_module(&assembly, &mut sink).unwrap_err();
        assert!(matches!(err, BackendError::InvalidAssemblyFunction(_)));
    }

    #[test]
    fn unlowered_gradient_node_is_rejected() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let entry = assembly.add_if_missing(ResourceId::new(0), "Scene");
        let node = entry.create_node(NodeKind::FunctionGradient {
            step_size: 1e-3,
            scalar_output: "Distance".into(),
            vector_input: "Pos".into(),
        });
        let fid = find_parameter_named(entry, entry.node(node).unwrap(), FUNCTION_ID_PARAMETER).unwrap();
        entry.parameter_mut(fid).unwrap().set_value(Value::ResourceId(ResourceId::new(1)));
        entry.rebuild_order().unwrap();

        let mut sink = SilentSink;
        let err = emit_kernel_module(&assembly, &mut sink).unwrap_err();
        assert!(matches!(err, BackendError::UnloweredNode(_)));
    }
}

//! Command-stream backend (§4.5.2): a linear, interpretable opcode buffer
//! over a fixed instruction shape, the second of the two executable forms
//! the system emits from one semantic graph.
//!
//! The closed opcode set has no `CALL` variant, so unlike the kernel
//! backend's one-function-per-callee output, every `FunctionCall` site is
//! *inlined*: the callee's nodes are walked right into the caller's own
//! buffer through the same [`crate::traversal`] driver, with a call-stack
//! guard rejecting a cyclic call chain before it recurses forever.
//! `FunctionGradient` has no opcode at all (§4.4.8) and is logged and
//! skipped rather than inlined — its output falls back to whatever literal
//! its consumer already carries.

#[cfg(not(feature = "std"))]
use alloc::{collections::BTreeMap, format, string::String, vec, vec::Vec};
#[cfg(feature = "std")]
use std::collections::BTreeMap;

use core::fmt;

use fieldgraph_assembly::assembly::{Assembly, AssemblyError};
use fieldgraph_core::log::{LogEvent, LogSink};
use fieldgraph_core::ops::Op;
use fieldgraph_core::types::ValueType;
use fieldgraph_core::value::{Mat4, ResourceId, Value, Vec3};
use fieldgraph_graph::function::Function;
use fieldgraph_graph::id::{NodeId, ParameterId, PortId};
use fieldgraph_graph::node::{Node, NodeKind};

use crate::rules::opcode_for;
use crate::traversal::{drive, resolve_callee, NodeVisitor, TraversalError};

/// Scratch slots `[0, RESERVED_SCRATCH)` are reserved for the entry
/// function's final `(Color.xyz, Distance)` and are never claimed by a
/// node's own output (§4.5.2).
pub const RESERVED_SCRATCH: usize = 4;
/// `Color.xyz` is read from these three slots after the last command runs.
pub const COLOR_SCRATCH_START: usize = 0;
/// `Distance` is read from this slot after the last command runs.
pub const DISTANCE_SCRATCH: usize = 3;
/// The query position is seeded into these three slots before the first
/// command runs — they are overwritten by the color/distance write-back
/// the `END` command performs, since by then nothing else needs `Pos`.
pub const QUERY_POS_SCRATCH_START: usize = 1;

/// Opcode carrying the assembly's final output indices; not one per rule
/// width, since color and distance are always `Vec3`/`Scalar`.
pub const END_OPCODE: &str = "END";

/// A failure building a command stream for an assembly.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandError {
    /// The assembly has no function at its designated entry id.
    MissingAssemblyFunction(ResourceId),
    /// The entry function failed type inference.
    InvalidAssemblyFunction(ResourceId),
    /// A node was visited twice in one function's traversal.
    Traversal(TraversalError),
    /// A `Math` node reached codegen before the inference pass stamped a
    /// rule onto it.
    UnresolvedRule(NodeId),
    /// A `NormalizeDistanceField` node survived to codegen; the lowering
    /// passes should have rewritten it away first.
    UnloweredNode(NodeId),
    /// Inlining a `FunctionCall` chain found a function already on its
    /// own call stack.
    CyclicCall(ResourceId),
}

impl From<TraversalError> for CommandError {
    fn from(err: TraversalError) -> Self {
        CommandError::Traversal(err)
    }
}

impl From<AssemblyError> for CommandError {
    fn from(err: AssemblyError) -> Self {
        match err {
            AssemblyError::MissingAssemblyFunction { id } => CommandError::MissingAssemblyFunction(id),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::MissingAssemblyFunction(id) => write!(f, "assembly function {} is missing", id.0),
            CommandError::InvalidAssemblyFunction(id) => write!(f, "assembly function {} is invalid", id.0),
            CommandError::Traversal(err) => write!(f, "{err}"),
            CommandError::UnresolvedRule(id) => write!(f, "node {} has no rule stamped by inference", id.0),
            CommandError::UnloweredNode(id) => write!(f, "node {} was not lowered before codegen", id.0),
            CommandError::CyclicCall(id) => write!(f, "function {} calls itself through an inlined chain", id.0),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CommandError {}

/// One fixed-shape instruction: an opcode, the node it was generated from
/// (for diagnostics), up to four output scratch indices, and up to
/// sixteen signed argument indices — non-negative into the parameter
/// pool, negative `-idx` into the scratch array (§4.5.2).
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub opcode: String,
    pub node_id: NodeId,
    pub outputs: Vec<i32>,
    pub arguments: Vec<i32>,
}

/// The linear form handed to an interpreter: the command buffer, the
/// literal-float parameter pool those commands index into, and the total
/// scratch size the interpreter must allocate.
#[derive(Debug, Clone, Default)]
pub struct CommandStream {
    pub commands: Vec<Command>,
    pub parameter_pool: Vec<f32>,
    pub scratch_size: usize,
}

/// Where a port or parameter's value lives once resolved: a scratch
/// range written by an earlier command, or a literal run already sitting
/// in the parameter pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Scratch(usize),
    Pool(usize),
}

fn slot_argument(slot: Slot) -> i32 {
    match slot {
        Slot::Scratch(idx) => -(idx as i32),
        Slot::Pool(idx) => idx as i32,
    }
}

/// Emits one combined command stream for `assembly`'s entry function,
/// inlining every reachable `FunctionCall`. Mirrors [`crate::kernel`]'s
/// entry handling: the query position is bound to the reserved scratch
/// slots up front, and the end-of-buffer write-back substitutes
/// [`Assembly::fallback`] the same way the kernel backend's NaN/Inf guard
/// does.
pub fn emit_command_stream(assembly: &Assembly, log: &mut dyn LogSink) -> Result<CommandStream, CommandError> {
    let entry = assembly.require_assembly_function()?;
    if !entry.is_valid() {
        return Err(CommandError::InvalidAssemblyFunction(assembly.assembly_function_id()));
    }

    let mut builder = Builder::new(assembly, log);
    let entry_id = assembly.assembly_function_id();

    let begin = entry.begin();
    if let Some(pos_port) = entry.node(begin).and_then(|n| n.outputs().first().copied()) {
        builder.var_map.insert((entry_id, pos_port), Slot::Scratch(QUERY_POS_SCRATCH_START));
    }

    builder.current_function = entry_id;
    builder.call_stack.push(entry_id);
    drive(entry, &mut builder)?;
    builder.call_stack.pop();

    builder.emit_end(entry_id, entry)?;

    Ok(CommandStream {
        commands: builder.commands,
        parameter_pool: builder.parameter_pool,
        scratch_size: builder.next_scratch,
    })
}

struct Builder<'a> {
    assembly: &'a Assembly,
    log: &'a mut dyn LogSink,
    commands: Vec<Command>,
    parameter_pool: Vec<f32>,
    next_scratch: usize,
    var_map: BTreeMap<(ResourceId, PortId), Slot>,
    call_stack: Vec<ResourceId>,
    current_function: ResourceId,
}

impl<'a> Builder<'a> {
    fn new(assembly: &'a Assembly, log: &'a mut dyn LogSink) -> Self {
        Self {
            assembly,
            log,
            commands: Vec::new(),
            parameter_pool: Vec::new(),
            next_scratch: RESERVED_SCRATCH,
            var_map: BTreeMap::new(),
            call_stack: Vec::new(),
            current_function: ResourceId::new(0),
        }
    }

    fn claim_scratch(&mut self, width: usize) -> usize {
        let start = self.next_scratch;
        self.next_scratch += width;
        start
    }

    fn push_value(&mut self, value: &Value) -> usize {
        let start = self.parameter_pool.len();
        match value {
            Value::Scalar(v) => self.parameter_pool.push(*v),
            Value::Vec3(v) => {
                self.parameter_pool.push(v.x);
                self.parameter_pool.push(v.y);
                self.parameter_pool.push(v.z);
            }
            Value::Mat4(m) => self.parameter_pool.extend_from_slice(&m.m),
            Value::ResourceId(id) => self.parameter_pool.push(id.0 as f32),
        }
        start
    }

    /// Resolves a parameter to the slot its value lives in: the source
    /// port's slot if bound (falling back to the parameter's own literal
    /// if that port never got a slot, e.g. a skipped `FunctionGradient`),
    /// or a fresh pool literal otherwise.
    fn slot_for(&mut self, function_id: ResourceId, function: &Function, pid: ParameterId) -> Slot {
        let Some(param) = function.parameter(pid) else { return Slot::Pool(self.push_value(&Value::Scalar(0.0))) };
        match param.source() {
            Some(source) => match self.var_map.get(&(function_id, source.port)) {
                Some(slot) => *slot,
                None => Slot::Pool(self.push_value(&param.value())),
            },
            None => Slot::Pool(self.push_value(&param.value())),
        }
    }

    fn argument_for(&mut self, function_id: ResourceId, function: &Function, pid: ParameterId) -> i32 {
        slot_argument(self.slot_for(function_id, function, pid))
    }

    fn constant_value(function: &Function, node: &Node, ty: ValueType) -> Value {
        let params = node.parameters();
        let component = |pid: ParameterId| -> f32 {
            function
                .parameter(pid)
                .map(|p| match p.value() {
                    Value::Scalar(v) => v,
                    Value::ResourceId(id) => id.0 as f32,
                    _ => 0.0,
                })
                .unwrap_or(0.0)
        };
        match ty {
            ValueType::Scalar => Value::Scalar(component(params[0])),
            ValueType::ResourceId => {
                let id = function
                    .parameter(params[0])
                    .map(|p| match p.value() {
                        Value::ResourceId(id) => id,
                        _ => ResourceId::INVALID,
                    })
                    .unwrap_or(ResourceId::INVALID);
                Value::ResourceId(id)
            }
            ValueType::Vec3 => Value::Vec3(Vec3::new(component(params[0]), component(params[1]), component(params[2]))),
            ValueType::Mat4 => {
                let mut m = [0.0f32; 16];
                for (i, slot) in m.iter_mut().enumerate() {
                    *slot = component(params[i]);
                }
                Value::Mat4(Mat4::from_row_major(m))
            }
        }
    }

    fn emit_end(&mut self, function_id: ResourceId, function: &Function) -> Result<(), CommandError> {
        let end = function.end();
        let Some(end_node) = function.node(end) else { return Ok(()) };
        let params: BTreeMap<String, ParameterId> = end_node
            .parameters()
            .iter()
            .filter_map(|pid| function.parameter(*pid).map(|p| (String::from(p.name()), *pid)))
            .collect();

        let color_args = match params.get("Color") {
            Some(pid) => {
                let slot = self.slot_for(function_id, function, *pid);
                match slot {
                    Slot::Scratch(idx) => vec![-(idx as i32), -((idx + 1) as i32), -((idx + 2) as i32)],
                    Slot::Pool(idx) => vec![idx as i32, idx as i32 + 1, idx as i32 + 2],
                }
            }
            None => {
                let idx = self.push_value(&Value::Vec3(Vec3::ZERO));
                vec![idx as i32, idx as i32 + 1, idx as i32 + 2]
            }
        };
        let distance_arg = match params.get("Shape") {
            Some(pid) => self.argument_for(function_id, function, *pid),
            None => self.push_value(&Value::Scalar(0.0)) as i32,
        };

        let mut arguments = color_args;
        arguments.push(distance_arg);
        if let Some(Value::Scalar(fallback)) = self.assembly.fallback() {
            arguments.push(self.push_value(&Value::Scalar(fallback)) as i32);
        }

        self.commands.push(Command {
            opcode: String::from(END_OPCODE),
            node_id: end,
            outputs: vec![COLOR_SCRATCH_START as i32, DISTANCE_SCRATCH as i32],
            arguments,
        });
        Ok(())
    }
}

impl<'a> NodeVisitor for Builder<'a> {
    type Error = CommandError;

    fn visit_begin(&mut self, _function: &Function) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_end(&mut self, _function: &Function) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_node(&mut self, function: &Function, node_id: NodeId) -> Result<(), Self::Error> {
        let function_id = self.current_function;
        let node = function.node(node_id).expect("node id came from this function's own order");

        match node.kind() {
            NodeKind::Begin | NodeKind::End => unreachable!("skipped by the traversal driver"),
            NodeKind::Constant(ty) => {
                let value = Self::constant_value(function, node, *ty);
                let start = self.push_value(&value);
                if let Some(port) = node.outputs().first() {
                    self.var_map.insert((function_id, *port), Slot::Pool(start));
                }
            }
            NodeKind::Math(op) => {
                let rule = node.rule().ok_or(CommandError::UnresolvedRule(node.id()))?;
                let params = node.parameters();

                if *op == Op::DecomposeVector {
                    let arg = self.argument_for(function_id, function, params[0]);
                    let mut outputs = Vec::new();
                    for port in node.outputs() {
                        let start = self.claim_scratch(1);
                        self.var_map.insert((function_id, *port), Slot::Scratch(start));
                        outputs.push(start as i32);
                    }
                    self.commands.push(Command {
                        opcode: opcode_for(*op, rule),
                        node_id: node.id(),
                        outputs,
                        arguments: vec![arg],
                    });
                } else {
                    let arguments: Vec<i32> =
                        params.iter().map(|pid| self.argument_for(function_id, function, *pid)).collect();
                    let width = crate::rules::output_value_type(*op, rule).components() as usize;
                    let start = self.claim_scratch(width);
                    if let Some(port) = node.outputs().first() {
                        self.var_map.insert((function_id, *port), Slot::Scratch(start));
                    }
                    self.commands.push(Command {
                        opcode: opcode_for(*op, rule),
                        node_id: node.id(),
                        outputs: vec![start as i32],
                        arguments,
                    });
                }
            }
            NodeKind::FunctionCall => {
                let Some(callee_id) = resolve_callee(function, node.id()) else {
                    self.log.emit(LogEvent::warning("FunctionCall node does not resolve to a known function; skipping"));
                    return Ok(());
                };
                if self.call_stack.contains(&callee_id) {
                    return Err(CommandError::CyclicCall(callee_id));
                }
                let Some(callee) = self.assembly.find(callee_id) else {
                    self.log.emit(LogEvent::warning("FunctionCall target is absent from the assembly; skipping"));
                    return Ok(());
                };
                if !callee.is_valid() {
                    self.log.emit(LogEvent::warning("skipping an invalid function inlined at a call site"));
                    return Ok(());
                }

                for (name, _ty, callee_port) in used_inputs(callee) {
                    if let Some(pid) = find_parameter_named(function, node, &name) {
                        let slot = self.slot_for(function_id, function, pid);
                        self.var_map.insert((callee_id, callee_port), slot);
                    }
                }

                let previous_function = self.current_function;
                self.current_function = callee_id;
                self.call_stack.push(callee_id);
                drive(callee, self)?;
                self.call_stack.pop();
                self.current_function = previous_function;

                for (name, _ty, end_pid) in consumed_outputs(callee) {
                    let Some(out_port) = find_output_named(node, function, &name) else { continue };
                    let slot = self.slot_for(callee_id, callee, end_pid);
                    self.var_map.insert((function_id, out_port), slot);
                }
            }
            NodeKind::FunctionGradient { .. } => {
                self.log.emit(LogEvent::warning(
                    "FunctionGradient has no command-stream opcode; node skipped, consumers fall back to a literal",
                ));
            }
            NodeKind::NormalizeDistanceField { .. } => {
                return Err(CommandError::UnloweredNode(node.id()));
            }
        }
        Ok(())
    }
}

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

fn find_parameter_named(function: &Function, node: &Node, name: &str) -> Option<ParameterId> {
    node.parameters().iter().copied().find(|pid| function.parameter(*pid).map(|p| p.name() == name).unwrap_or(false))
}

fn find_output_named(node: &Node, function: &Function, name: &str) -> Option<PortId> {
    node.outputs().iter().copied().find(|pid| function.port(*pid).map(|p| p.name() == name).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgraph_core::log::SilentSink;
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

        let end = entry.end();
        let end_params = entry.node(end).unwrap().parameters().to_vec();
        let shape_param = end_params.iter().copied().find(|p| entry.parameter(*p).unwrap().name() == "Shape").unwrap();
        entry.link(sub_out, shape_param, true).unwrap();
        entry.parameter_mut(shape_param).unwrap().set_consumed_by_function(true);

        entry.rebuild_order().unwrap();
        assembly
    }

    #[test]
    fn emits_a_command_per_node_plus_one_end_command() {
        let assembly = sphere_assembly();
        let mut sink = SilentSink;
        let stream = emit_command_stream(&assembly, &mut sink).unwrap();
        // Length, Constant(1.0), Sub, End == 4 commands (Constant still
        // emits no command of its own — see below).
        let opcodes: Vec<&str> = stream.commands.iter().map(|c| c.opcode.as_str()).collect();
        assert_eq!(opcodes, vec!["LENGTH", "SUB_SCALAR", "END"]);
        assert!(stream.scratch_size > RESERVED_SCRATCH);
    }

    #[test]
    fn query_position_is_seeded_at_the_reserved_slot() {
        let assembly = sphere_assembly();
        let mut sink = SilentSink;
        let stream = emit_command_stream(&assembly, &mut sink).unwrap();
        let length_command = stream.commands.iter().find(|c| c.opcode == "LENGTH").unwrap();
        assert_eq!(length_command.arguments, vec![-(QUERY_POS_SCRATCH_START as i32)]);
    }

    #[test]
    fn constant_becomes_a_pool_literal_with_no_command() {
        let assembly = sphere_assembly();
        let mut sink = SilentSink;
        let stream = emit_command_stream(&assembly, &mut sink).unwrap();
        assert!(stream.parameter_pool.contains(&1.0));
        assert!(stream.commands.iter().all(|c| c.opcode != "CONSTANT"));
    }

    #[test]
    fn missing_assembly_function_is_reported() {
        let assembly = Assembly::new(ResourceId::new(0));
        let mut sink = SilentSink;
        let err = emit_command_stream(&assembly, &mut sink).unwrap_err();
        assert!(matches!(err, CommandError::MissingAssemblyFunction(_)));
    }

    #[test]
    fn unlowered_normalize_node_is_rejected() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let entry = assembly.add_if_missing(ResourceId::new(0), "Scene");
        entry.create_node(NodeKind::NormalizeDistanceField {
            scalar_output: "Distance".into(),
            vector_input: "Pos".into(),
        });
        entry.rebuild_order().unwrap();

        let mut sink = SilentSink;
        let err = emit_command_stream(&assembly, &mut sink).unwrap_err();
        assert!(matches!(err, CommandError::UnloweredNode(_)));
    }

    #[test]
    fn function_gradient_is_skipped_with_a_warning_not_a_hard_error() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let entry = assembly.add_if_missing(ResourceId::new(0), "Scene");
        let node = entry.create_node(NodeKind::FunctionGradient {
            step_size: 1e-3,
            scalar_output: "Distance".into(),
            vector_input: "Pos".into(),
        });
        let fid = find_parameter_named(entry, entry.node(node).unwrap(), FUNCTION_ID_PARAMETER).unwrap();
        entry.parameter_mut(fid).unwrap().set_value(Value::ResourceId(ResourceId::new(7)));
        entry.rebuild_order().unwrap();

        let mut sink = SilentSink;
        let stream = emit_command_stream(&assembly, &mut sink).unwrap();
        assert!(stream.commands.iter().any(|c| c.opcode == "END"));
    }

    #[test]
    fn a_call_cycle_is_rejected_instead_of_recursing_forever() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let entry_id = ResourceId::new(0);
        let entry = assembly.add_if_missing(entry_id, "Scene");
        let call = entry.create_node(NodeKind::FunctionCall);
        let fid = find_parameter_named(entry, entry.node(call).unwrap(), FUNCTION_ID_PARAMETER).unwrap();
        entry.parameter_mut(fid).unwrap().set_value(Value::ResourceId(entry_id));
        entry.rebuild_order().unwrap();

        let mut sink = SilentSink;
        let err = emit_command_stream(&assembly, &mut sink).unwrap_err();
        assert!(matches!(err, CommandError::CyclicCall(_)));
    }
}

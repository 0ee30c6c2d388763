//! The per-function graph: node/port/parameter registries, linking with
//! cycle checks, removal with consumer-unbinding, and the cached
//! topological order (§4.2 "Function").
//!
//! Generalized from a single
//! fixed `output_node` to a `Begin`/`End` pair and from positional input
//! slots to named, independently typed parameters. Full type inference
//! (rule selection, propagation of literal types) is not run here — it is
//! a separate pass over the function, owned by the compiler crate; this
//! module only guards the structural invariants (registered ids, no
//! cycles) that make running that pass meaningful.

#[cfg(not(feature = "std"))]
use alloc::{collections::BTreeMap, format, string::String, vec::Vec};
#[cfg(feature = "std")]
use std::collections::BTreeMap;

use core::fmt;

use fieldgraph_core::types::ValueType;
use fieldgraph_core::value::ResourceId;

use crate::id::{IdAllocator, NodeId, ParameterId, PortId};
use crate::node::{Node, NodeKind};
use crate::parameter::{Parameter, Source};
use crate::port::Port;

/// Outcome of a successful [`Function::link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOutcome {
    /// Whether the source/target types were checked for compatibility.
    /// `false` only when the caller passed `skip_check`.
    pub type_checked: bool,
}

/// A structural failure from the graph model (§4.2, §7).
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionError {
    /// No node with this id is registered.
    UnknownNode { id: NodeId },
    /// No port with this id is registered.
    UnknownPort { id: PortId },
    /// No parameter with this id is registered.
    UnknownParameter { id: ParameterId },
    /// `Begin` and `End` cannot be removed (§4.2 "remove node").
    CannotRemoveBeginOrEnd,
    /// The source port's type does not match the target parameter's
    /// declared type.
    TypeMismatch { detail: String },
    /// Linking would make the {source-port-node → consumer-node} graph
    /// cyclic (§3 invariant 3).
    WouldCreateCycle,
    /// A parameter's source names a port id no longer present in the
    /// registry; `rebuild_order` aborts without promoting partial state.
    DanglingPortReference { id: PortId },
}

impl fmt::Display for FunctionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionError::UnknownNode { id } => write!(f, "unknown node {}", id.0),
            FunctionError::UnknownPort { id } => write!(f, "unknown port {}", id.0),
            FunctionError::UnknownParameter { id } => write!(f, "unknown parameter {}", id.0),
            FunctionError::CannotRemoveBeginOrEnd => {
                write!(f, "cannot remove the Begin or End node")
            }
            FunctionError::TypeMismatch { detail } => write!(f, "type mismatch: {detail}"),
            FunctionError::WouldCreateCycle => write!(f, "link would create a cycle"),
            FunctionError::DanglingPortReference { id } => {
                write!(f, "dangling reference to port {}", id.0)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FunctionError {}

/// A named dataflow graph with exactly one `Begin` and one `End`,
/// addressable by [`ResourceId`] within an assembly (§3, §4.2).
#[derive(Debug, Clone)]
pub struct Function {
    resource_id: ResourceId,
    display_name: String,
    nodes: BTreeMap<NodeId, Node>,
    ports: BTreeMap<PortId, Port>,
    parameters: BTreeMap<ParameterId, Parameter>,
    ids: IdAllocator,
    begin: NodeId,
    end: NodeId,
    order: Vec<NodeId>,
    dirty: bool,
    /// True for functions synthesized or owned by the system (e.g. the
    /// helper functions lowering produces); skipped by serialization and
    /// by user-facing passes that would otherwise rewrite them (§3).
    managed: bool,
    valid: bool,
}

impl Function {
    /// Creates a function with a freshly allocated `Begin` and `End`.
    pub fn new(resource_id: ResourceId, display_name: impl Into<String>) -> Self {
        let mut func = Self {
            resource_id,
            display_name: display_name.into(),
            nodes: BTreeMap::new(),
            ports: BTreeMap::new(),
            parameters: BTreeMap::new(),
            ids: IdAllocator::new(),
            begin: NodeId(0),
            end: NodeId(0),
            order: Vec::new(),
            dirty: true,
            managed: false,
            valid: true,
        };
        func.begin = func.insert_node(NodeKind::Begin);
        func.end = func.insert_node(NodeKind::End);
        func
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) {
        self.display_name = name.into();
    }

    pub fn begin(&self) -> NodeId {
        self.begin
    }

    pub fn end(&self) -> NodeId {
        self.end
    }

    pub fn managed(&self) -> bool {
        self.managed
    }

    pub fn set_managed(&mut self, managed: bool) {
        self.managed = managed;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Sets the aggregate validity flag. Called by the inference pass
    /// after its final aggregation step (§4.1).
    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Nodes in registration order (ascending id), not topological order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    pub fn port_mut(&mut self, id: PortId) -> Option<&mut Port> {
        self.ports.get_mut(&id)
    }

    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.values()
    }

    pub fn parameter(&self, id: ParameterId) -> Option<&Parameter> {
        self.parameters.get(&id)
    }

    pub fn parameter_mut(&mut self, id: ParameterId) -> Option<&mut Parameter> {
        self.parameters.get_mut(&id)
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.values()
    }

    /// The cached topological order, as of the last [`Self::rebuild_order`].
    /// Empty (and potentially stale) until the first rebuild.
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    fn allocate_unique_name(&self, base: &str) -> String {
        if !self.nodes.values().any(|n| n.unique_name() == base) {
            return base.into();
        }
        let mut suffix = 2u32;
        loop {
            let candidate = format!("{base}{suffix}");
            if !self.nodes.values().any(|n| n.unique_name() == candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    fn insert_node(&mut self, kind: NodeKind) -> NodeId {
        let node_id = self.ids.alloc_node();
        let base_name = kind.default_display_name();
        let unique_name = self.allocate_unique_name(&base_name);
        let default_parameters = kind.default_parameters();
        let default_outputs = kind.default_outputs();
        let mut node = Node::new(node_id, kind, unique_name);

        for (name, ty) in default_parameters {
            let pid = self.ids.alloc_parameter();
            self.parameters.insert(pid, Parameter::new(pid, node_id, name, ty));
            node.push_parameter(pid);
        }
        for (name, ty) in default_outputs {
            let pid = self.ids.alloc_port();
            self.ports.insert(pid, Port::new(pid, node_id, ty, name));
            node.push_output(pid);
        }

        self.nodes.insert(node_id, node);
        self.mark_dirty();
        node_id
    }

    /// *Create node* (§4.2): allocates a node of `kind` with its default
    /// parameters and output ports. Always succeeds; unique-name
    /// collisions are resolved by numeric suffix.
    pub fn create_node(&mut self, kind: NodeKind) -> NodeId {
        self.insert_node(kind)
    }

    /// Grows `node_id` with one more named parameter. Used by the linker
    /// to mirror a callee's arguments onto a `FunctionCall` node, and by
    /// lowering to mirror a callee's signature onto a synthesized helper
    /// (§4.3 "Propagate call I/O").
    pub fn add_parameter(
        &mut self,
        node_id: NodeId,
        name: impl Into<String>,
        value_type: ValueType,
    ) -> Result<ParameterId, FunctionError> {
        if !self.nodes.contains_key(&node_id) {
            return Err(FunctionError::UnknownNode { id: node_id });
        }
        let pid = self.ids.alloc_parameter();
        self.parameters.insert(pid, Parameter::new(pid, node_id, name, value_type));
        self.nodes.get_mut(&node_id).expect("checked above").push_parameter(pid);
        self.mark_dirty();
        Ok(pid)
    }

    /// Removes one parameter previously added with [`Self::add_parameter`]
    /// (or present from construction). Used when a mirrored argument no
    /// longer exists on the callee.
    pub fn remove_parameter(&mut self, parameter_id: ParameterId) -> Result<(), FunctionError> {
        let param = self
            .parameters
            .get(&parameter_id)
            .ok_or(FunctionError::UnknownParameter { id: parameter_id })?;
        let node_id = param.node();
        self.parameters.remove(&parameter_id);
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.retain_parameters(|id| id != parameter_id);
        }
        self.mark_dirty();
        Ok(())
    }

    /// Grows `node_id` with one more named output port. Used by the
    /// linker to mirror a callee's `End` parameters as output ports on a
    /// `FunctionCall` node (§4.3 "Propagate call I/O").
    pub fn add_output(
        &mut self,
        node_id: NodeId,
        name: impl Into<String>,
        value_type: ValueType,
    ) -> Result<PortId, FunctionError> {
        if !self.nodes.contains_key(&node_id) {
            return Err(FunctionError::UnknownNode { id: node_id });
        }
        let pid = self.ids.alloc_port();
        self.ports.insert(pid, Port::new(pid, node_id, value_type, name));
        self.nodes.get_mut(&node_id).expect("checked above").push_output(pid);
        self.mark_dirty();
        Ok(pid)
    }

    /// Removes one output port previously added with [`Self::add_output`],
    /// unbinding every parameter in the function that sourced it (§3
    /// invariant 6, applied at port granularity rather than whole-node).
    pub fn remove_output(&mut self, port_id: PortId) -> Result<(), FunctionError> {
        let port = self.ports.get(&port_id).ok_or(FunctionError::UnknownPort { id: port_id })?;
        let node_id = port.node();
        for param in self.parameters.values_mut() {
            if matches!(param.source(), Some(s) if s.port == port_id) {
                param.set_source(None);
            }
        }
        self.ports.remove(&port_id);
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.retain_outputs(|id| id != port_id);
        }
        self.mark_dirty();
        Ok(())
    }

    /// *Link* (§4.2): binds `target`'s source to `source`. Unless
    /// `skip_check`, validates that both ids are registered, that the
    /// value types match, and that the link would not create a cycle.
    pub fn link(
        &mut self,
        source: PortId,
        target: ParameterId,
        skip_check: bool,
    ) -> Result<LinkOutcome, FunctionError> {
        let source_port = self.ports.get(&source).ok_or(FunctionError::UnknownPort { id: source })?;
        let target_param =
            self.parameters.get(&target).ok_or(FunctionError::UnknownParameter { id: target })?;

        if !skip_check {
            if source_port.value_type() != target_param.value_type() {
                return Err(FunctionError::TypeMismatch {
                    detail: format!(
                        "source is {:?}, target expects {:?}",
                        source_port.value_type(),
                        target_param.value_type()
                    ),
                });
            }
            if self.would_create_cycle(source_port.node(), target_param.node()) {
                return Err(FunctionError::WouldCreateCycle);
            }
        }

        let cached_name = format!(
            "{}.{}",
            self.nodes
                .get(&source_port.node())
                .map(Node::unique_name)
                .unwrap_or_default(),
            source_port.name()
        );
        let param = self.parameters.get_mut(&target).expect("checked above");
        param.set_source(Some(Source { port: source, cached_name }));
        self.mark_dirty();
        Ok(LinkOutcome { type_checked: !skip_check })
    }

    /// *Unlink* (§4.2): clears `target`'s source, if any.
    pub fn unlink(&mut self, target: ParameterId) -> Result<(), FunctionError> {
        let param =
            self.parameters.get_mut(&target).ok_or(FunctionError::UnknownParameter { id: target })?;
        param.set_source(None);
        self.mark_dirty();
        Ok(())
    }

    /// Does a link from `consumer_node`'s parameter into `from`'s output
    /// re-enter `from` transitively? Walks consumer → source-node edges.
    fn would_create_cycle(&self, from: NodeId, consumer_node: NodeId) -> bool {
        let mut visited = BTreeSetShim::new();
        let mut stack = Vec::new();
        stack.push(consumer_node);
        while let Some(current) = stack.pop() {
            if current == from {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                for pid in node.parameters() {
                    if let Some(param) = self.parameters.get(pid) {
                        if let Some(source) = param.source() {
                            if let Some(port) = self.ports.get(&source.port) {
                                stack.push(port.node());
                            }
                        }
                    }
                }
            }
        }
        false
    }

    /// *Remove node* (§4.2): erases `id`, its parameters, and its output
    /// ports, unbinding every consumer that referenced one of its ports.
    /// Fails for `Begin`/`End`.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), FunctionError> {
        if id == self.begin || id == self.end {
            return Err(FunctionError::CannotRemoveBeginOrEnd);
        }
        let node = self.nodes.get(&id).ok_or(FunctionError::UnknownNode { id })?;
        let removed_ports: Vec<PortId> = node.outputs().to_vec();
        let removed_parameters: Vec<ParameterId> = node.parameters().to_vec();

        for param in self.parameters.values_mut() {
            let unbind = matches!(param.source(), Some(s) if removed_ports.contains(&s.port));
            if unbind {
                param.set_source(None);
            }
        }
        for pid in &removed_parameters {
            self.parameters.remove(pid);
        }
        for pid in &removed_ports {
            self.ports.remove(pid);
        }
        self.nodes.remove(&id);
        self.mark_dirty();
        Ok(())
    }

    /// *Rebuild & order* (§4.2): recomputes the topological order from
    /// each parameter's bound source. On success, clears the dirty flag.
    /// If a parameter's source names a port that is no longer registered,
    /// the function is marked invalid and the previous cached order is
    /// left untouched (no partial state is promoted).
    pub fn rebuild_order(&mut self) -> Result<(), FunctionError> {
        let mut indegree: BTreeMap<NodeId, usize> = self.nodes.keys().map(|id| (*id, 0)).collect();
        let mut dependents: BTreeMap<NodeId, Vec<NodeId>> =
            self.nodes.keys().map(|id| (*id, Vec::new())).collect();

        for node in self.nodes.values() {
            for pid in node.parameters() {
                let param = self.parameters.get(pid).expect("parameter registered on its node");
                if let Some(source) = param.source() {
                    let producer = match self.ports.get(&source.port) {
                        Some(port) => port.node(),
                        None => {
                            self.valid = false;
                            return Err(FunctionError::DanglingPortReference { id: source.port });
                        }
                    };
                    *indegree.get_mut(&node.id()).expect("node in indegree map") += 1;
                    dependents.get_mut(&producer).expect("producer in dependents map").push(node.id());
                }
            }
        }

        let mut frontier: Vec<NodeId> =
            indegree.iter().filter(|(_, d)| **d == 0).map(|(id, _)| *id).collect();
        frontier.sort();
        let mut order = Vec::with_capacity(self.nodes.len());

        while !frontier.is_empty() {
            frontier.sort();
            let current = frontier.remove(0);
            order.push(current);
            if let Some(outgoing) = dependents.get(&current) {
                for dependent in outgoing.clone() {
                    let degree = indegree.get_mut(&dependent).expect("dependent in indegree map");
                    *degree -= 1;
                    if *degree == 0 {
                        frontier.push(dependent);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            self.valid = false;
            return Ok(());
        }

        self.order = order;
        self.dirty = false;
        Ok(())
    }

    /// *Simplify* (§4.2, §4.4.4): keeps `End`, its backward-reachable set,
    /// and `Begin`; removes every other node through [`Self::remove_node`]
    /// so consumer-unbinding runs. Returns the count removed. Intended to
    /// be applied only to non-[`Self::managed`] functions (§4.4.4).
    pub fn simplify(&mut self) -> usize {
        let mut reachable = BTreeSetShim::new();
        reachable.insert(self.end);
        reachable.insert(self.begin);
        let mut stack = Vec::new();
        stack.push(self.end);
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                for pid in node.parameters() {
                    if let Some(param) = self.parameters.get(pid) {
                        if let Some(source) = param.source() {
                            if let Some(port) = self.ports.get(&source.port) {
                                let producer = port.node();
                                if reachable.insert(producer) {
                                    stack.push(producer);
                                }
                            }
                        }
                    }
                }
            }
        }

        let dead: Vec<NodeId> =
            self.nodes.keys().filter(|id| !reachable.contains(**id)).copied().collect();
        for id in &dead {
            let _ = self.remove_node(*id);
        }
        dead.len()
    }
}

/// A minimal insertion-order-agnostic set over [`NodeId`], used by the two
/// traversal helpers above. `BTreeMap<NodeId, ()>` would work identically;
/// this newtype just keeps the call sites reading as set operations.
#[derive(Debug, Default)]
struct BTreeSetShim {
    inner: BTreeMap<NodeId, ()>,
}

impl BTreeSetShim {
    fn new() -> Self {
        Self { inner: BTreeMap::new() }
    }

    fn insert(&mut self, id: NodeId) -> bool {
        self.inner.insert(id, ()).is_none()
    }

    fn contains(&self, id: NodeId) -> bool {
        self.inner.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgraph_core::ops::Op;

    fn new_function() -> Function {
        Function::new(ResourceId::new(1), "Test")
    }

    #[test]
    fn fresh_function_has_begin_and_end_only() {
        let func = new_function();
        assert_eq!(func.node_count(), 2);
        assert!(func.node(func.begin()).unwrap().is_begin());
        assert!(func.node(func.end()).unwrap().is_end());
    }

    #[test]
    fn create_node_resolves_name_collisions_by_suffix() {
        let mut func = new_function();
        let a = func.create_node(NodeKind::Math(Op::Add));
        let b = func.create_node(NodeKind::Math(Op::Add));
        assert_ne!(func.node(a).unwrap().unique_name(), func.node(b).unwrap().unique_name());
    }

    #[test]
    fn link_rejects_type_mismatch() {
        let mut func = new_function();
        let add = func.create_node(NodeKind::Math(Op::Add));
        let add_output = func.node(add).unwrap().outputs()[0];
        let end = func.end();
        let color_param = func
            .node(end)
            .unwrap()
            .parameters()
            .iter()
            .copied()
            .find(|id| func.parameter(*id).unwrap().name() == "Color")
            .unwrap();
        let result = func.link(add_output, color_param, false);
        assert!(matches!(result, Err(FunctionError::TypeMismatch { .. })));
    }

    #[test]
    fn link_rejects_cycles() {
        let mut func = new_function();
        let add1 = func.create_node(NodeKind::Math(Op::Add));
        let add2 = func.create_node(NodeKind::Math(Op::Add));
        let add1_out = func.node(add1).unwrap().outputs()[0];
        let add2_out = func.node(add2).unwrap().outputs()[0];
        let add2_in_a = func.node(add2).unwrap().parameters()[0];
        let add1_in_a = func.node(add1).unwrap().parameters()[0];

        func.link(add1_out, add2_in_a, false).unwrap();
        let result = func.link(add2_out, add1_in_a, false);
        assert_eq!(result, Err(FunctionError::WouldCreateCycle));
    }

    #[test]
    fn remove_node_unbinds_consumers() {
        let mut func = new_function();
        let add1 = func.create_node(NodeKind::Math(Op::Add));
        let add2 = func.create_node(NodeKind::Math(Op::Add));
        let add1_out = func.node(add1).unwrap().outputs()[0];
        let add2_in_a = func.node(add2).unwrap().parameters()[0];
        func.link(add1_out, add2_in_a, false).unwrap();

        func.remove_node(add1).unwrap();
        assert!(func.parameter(add2_in_a).unwrap().source().is_none());
        assert!(func.node(add1).is_none());
    }

    #[test]
    fn cannot_remove_begin_or_end() {
        let mut func = new_function();
        let begin = func.begin();
        assert_eq!(func.remove_node(begin), Err(FunctionError::CannotRemoveBeginOrEnd));
    }

    #[test]
    fn rebuild_order_respects_dependencies() {
        let mut func = new_function();
        let add1 = func.create_node(NodeKind::Math(Op::Add));
        let add2 = func.create_node(NodeKind::Math(Op::Add));
        let add1_out = func.node(add1).unwrap().outputs()[0];
        let add2_in_a = func.node(add2).unwrap().parameters()[0];
        func.link(add1_out, add2_in_a, false).unwrap();

        func.rebuild_order().unwrap();
        let order = func.topological_order();
        let pos = |id: NodeId| order.iter().position(|n| *n == id).unwrap();
        assert!(pos(add1) < pos(add2));
    }

    #[test]
    fn add_and_remove_parameter_mirrors_a_call_argument() {
        let mut func = new_function();
        let call = func.create_node(NodeKind::FunctionCall);
        let before = func.node(call).unwrap().parameters().len();
        let pid = func.add_parameter(call, "Radius", ValueType::Scalar).unwrap();
        assert_eq!(func.node(call).unwrap().parameters().len(), before + 1);
        func.remove_parameter(pid).unwrap();
        assert_eq!(func.node(call).unwrap().parameters().len(), before);
        assert!(func.parameter(pid).is_none());
    }

    #[test]
    fn remove_output_unbinds_consumers() {
        let mut func = new_function();
        let call = func.create_node(NodeKind::FunctionCall);
        let consumer = func.create_node(NodeKind::Math(Op::Add));
        let port = func.add_output(call, "Distance", ValueType::Scalar).unwrap();
        let consumer_param = func.node(consumer).unwrap().parameters()[0];
        func.link(port, consumer_param, false).unwrap();

        func.remove_output(port).unwrap();
        assert!(func.parameter(consumer_param).unwrap().source().is_none());
    }

    #[test]
    fn rebuild_order_marks_invalid_on_dangling_port_reference() {
        let mut func = new_function();
        let add1 = func.create_node(NodeKind::Math(Op::Add));
        let add2 = func.create_node(NodeKind::Math(Op::Add));
        let add1_out = func.node(add1).unwrap().outputs()[0];
        let add2_in_a = func.node(add2).unwrap().parameters()[0];
        func.link(add1_out, add2_in_a, false).unwrap();

        // Forcibly remove the port registry entry while leaving add2's
        // parameter source pointing at it, simulating external corruption.
        func.ports.remove(&add1_out);

        let result = func.rebuild_order();
        assert_eq!(result, Err(FunctionError::DanglingPortReference { id: add1_out }));
        assert!(!func.is_valid());
    }

    #[test]
    fn simplify_removes_unreachable_nodes() {
        let mut func = new_function();
        let _orphan = func.create_node(NodeKind::Math(Op::Add));
        let removed = func.simplify();
        assert_eq!(removed, 1);
        assert_eq!(func.node_count(), 2);
    }
}

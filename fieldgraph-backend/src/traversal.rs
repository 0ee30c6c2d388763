//! Shared traversal contract for both backends (§4.5.3).
//!
//! Walks a function's cached topological order, calling one method per
//! node kind, so a single visitor-aware driver exists instead of each
//! backend re-implementing its own graph walk. Two things both backends need that
//! a single function's order alone doesn't give them also live here:
//! cross-function reachability (so a backend skips functions the assembly
//! function never calls) and a memo of which functions have already had a
//! body emitted (so two call sites to the same callee only emit it once).

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;
#[cfg(not(feature = "std"))]
use alloc::collections::BTreeSet;
#[cfg(feature = "std")]
use std::collections::BTreeSet;

use core::fmt;

use fieldgraph_assembly::assembly::Assembly;
use fieldgraph_core::value::{ResourceId, Value};
use fieldgraph_graph::function::Function;
use fieldgraph_graph::id::NodeId;
use fieldgraph_graph::node::{NodeKind, FUNCTION_ID_PARAMETER};

/// A failure from the traversal contract itself, as opposed to a failure in
/// whatever a visitor does with a node (§4.5.3: "double-visiting a node is
/// a bug, rejected").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalError {
    /// `node_id` appeared twice in the function's cached topological order.
    DoubleVisit(NodeId),
}

impl fmt::Display for TraversalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraversalError::DoubleVisit(id) => write!(f, "node {} visited twice in one traversal", id.0),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TraversalError {}

/// Per-node callbacks a backend implements to drive codegen from [`drive`].
/// `Begin` and `End` are never passed to [`Self::visit_node`] — they get
/// their own hooks, since every backend treats them specially (argument
/// list / return value) rather than as ordinary statements.
pub trait NodeVisitor {
    /// The visitor's own error type; must be constructible from a
    /// [`TraversalError`] so [`drive`] can report a double-visit through it.
    type Error: From<TraversalError>;

    fn visit_begin(&mut self, function: &Function) -> Result<(), Self::Error>;
    fn visit_node(&mut self, function: &Function, node_id: NodeId) -> Result<(), Self::Error>;
    fn visit_end(&mut self, function: &Function) -> Result<(), Self::Error>;
}

/// Drives `visitor` over `function`'s cached topological order. A
/// `BTreeSet` guards against a node id appearing more than once in that
/// order — which would only happen from a corrupted or hand-built
/// function, since [`Function::rebuild_order`] never duplicates an id, but
/// a codegen backend is exactly the place that bug must not pass silently.
pub fn drive<V: NodeVisitor>(function: &Function, visitor: &mut V) -> Result<(), V::Error> {
    let mut seen = BTreeSet::new();
    visitor.visit_begin(function)?;
    for &node_id in function.topological_order() {
        let node = match function.node(node_id) {
            Some(node) => node,
            None => continue,
        };
        if node.is_begin() || node.is_end() {
            continue;
        }
        if !seen.insert(node_id) {
            return Err(TraversalError::DoubleVisit(node_id).into());
        }
        visitor.visit_node(function, node_id)?;
    }
    visitor.visit_end(function)?;
    Ok(())
}

/// Resolves a `FunctionCall`/`FunctionGradient`/`NormalizeDistanceField`
/// node's `Function` parameter to a callee id, the same rule the compiler's
/// lowering passes use.
pub(crate) fn resolve_callee(function: &Function, node_id: NodeId) -> Option<ResourceId> {
    let node = function.node(node_id)?;
    node.parameters()
        .iter()
        .filter_map(|pid| function.parameter(*pid))
        .find(|p| p.name() == FUNCTION_ID_PARAMETER)
        .and_then(|p| match p.value() {
            Value::ResourceId(id) if p.source().is_none() => Some(id),
            _ => None,
        })
}

/// Every function reachable from `assembly`'s entry function by following
/// `FunctionCall`/`FunctionGradient`/`NormalizeDistanceField` edges,
/// including the entry itself. Neither backend emits a function outside
/// this set, even if it is present in the assembly's function table.
pub fn reachable_functions(assembly: &Assembly) -> BTreeSet<ResourceId> {
    let mut reachable = BTreeSet::new();
    let mut stack = Vec::new();
    let entry = assembly.assembly_function_id();
    reachable.insert(entry);
    stack.push(entry);

    while let Some(current) = stack.pop() {
        let Some(function) = assembly.find(current) else { continue };
        for node in function.nodes() {
            let is_reference = matches!(
                node.kind(),
                NodeKind::FunctionCall | NodeKind::FunctionGradient { .. } | NodeKind::NormalizeDistanceField { .. }
            );
            if !is_reference {
                continue;
            }
            if let Some(callee_id) = resolve_callee(function, node.id()) {
                if reachable.insert(callee_id) {
                    stack.push(callee_id);
                }
            }
        }
    }
    reachable
}

/// Tracks which functions a backend has already emitted a definition for,
/// so a callee reached from two call sites is still emitted exactly once
/// (§4.5.3 "per-function emission memoization").
#[derive(Debug, Default)]
pub struct EmissionMemo {
    emitted: BTreeSet<ResourceId>,
}

impl EmissionMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time `id` is claimed, `false` on every
    /// later call for the same id.
    pub fn claim(&mut self, id: ResourceId) -> bool {
        self.emitted.insert(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgraph_core::ops::Op;
    use fieldgraph_graph::node::NodeKind;

    struct CountingVisitor {
        begins: u32,
        nodes: u32,
        ends: u32,
    }

    impl NodeVisitor for CountingVisitor {
        type Error = TraversalError;
        fn visit_begin(&mut self, _function: &Function) -> Result<(), Self::Error> {
            self.begins += 1;
            Ok(())
        }
        fn visit_node(&mut self, _function: &Function, _node_id: NodeId) -> Result<(), Self::Error> {
            self.nodes += 1;
            Ok(())
        }
        fn visit_end(&mut self, _function: &Function) -> Result<(), Self::Error> {
            self.ends += 1;
            Ok(())
        }
    }

    #[test]
    fn drive_visits_begin_once_end_once_and_skips_them_as_nodes() {
        let mut function = Function::new(ResourceId::new(0), "F");
        let add = function.create_node(NodeKind::Math(Op::Add));
        let add_out = function.node(add).unwrap().outputs()[0];
        let end = function.end();
        let shape = function
            .node(end)
            .unwrap()
            .parameters()
            .iter()
            .copied()
            .find(|pid| function.parameter(*pid).unwrap().name() == "Shape")
            .unwrap();
        function.link(add_out, shape, true).unwrap();
        function.rebuild_order().unwrap();

        let mut visitor = CountingVisitor { begins: 0, nodes: 0, ends: 0 };
        drive(&function, &mut visitor).unwrap();
        assert_eq!(visitor.begins, 1);
        assert_eq!(visitor.ends, 1);
        assert_eq!(visitor.nodes, 1);
    }

    #[test]
    fn reachable_functions_follows_function_call_edges() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let callee_id = ResourceId::new(1);
        assembly.add_if_missing(callee_id, "Callee");
        let entry = assembly.add_if_missing(ResourceId::new(0), "Scene");
        let call = entry.create_node(NodeKind::FunctionCall);
        let fid = call;
        let fid_param = entry
            .node(fid)
            .unwrap()
            .parameters()
            .iter()
            .copied()
            .find(|pid| entry.parameter(*pid).unwrap().name() == FUNCTION_ID_PARAMETER)
            .unwrap();
        entry.parameter_mut(fid_param).unwrap().set_value(Value::ResourceId(callee_id));

        let reachable = reachable_functions(&assembly);
        assert!(reachable.contains(&ResourceId::new(0)));
        assert!(reachable.contains(&callee_id));
    }

    #[test]
    fn reachable_functions_excludes_an_unreferenced_function() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        assembly.add_if_missing(ResourceId::new(0), "Scene");
        assembly.add_if_missing(ResourceId::new(9), "Orphan");

        let reachable = reachable_functions(&assembly);
        assert!(!reachable.contains(&ResourceId::new(9)));
    }
}

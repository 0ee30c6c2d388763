//! Undo/redo snapshot stacks over the whole assembly (§4.4.7).
//!
//! Snapshots are taken with [`Assembly::clone`] rather than the source
//! system's "deep-clone with fresh ids, rebind sources by unique name"
//! recipe: per-function id allocation (§9, [`fieldgraph_graph::id`]) means
//! a structural clone already yields an independent copy with no id
//! aliasing across snapshots, so re-deriving ids and rebinding by name
//! would duplicate work the allocator design already does for free. See
//! `DESIGN.md` for the full justification of this divergence.

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

use crate::assembly::Assembly;
use crate::linker::functions_equivalent;

fn assemblies_equivalent(a: &Assembly, b: &Assembly) -> bool {
    if a.function_count() != b.function_count() {
        return false;
    }
    if a.assembly_function_id() != b.assembly_function_id() {
        return false;
    }
    a.functions().all(|fa| match b.find(fa.resource_id()) {
        Some(fb) => functions_equivalent(fa, fb),
        None => false,
    })
}

/// Two stacks of `(assembly snapshot, description)` (§4.4.7).
#[derive(Debug, Clone, Default)]
pub struct History {
    undo_stack: Vec<(Assembly, String)>,
    redo_stack: Vec<(Assembly, String)>,
}

impl History {
    pub fn new() -> Self {
        Self { undo_stack: Vec::new(), redo_stack: Vec::new() }
    }

    /// *Store state*: pushes `current` onto the undo stack and clears the
    /// redo stack. Skipped (returns `false`) if the top of the undo stack
    /// is already equivalent to `current`, per the equality predicate
    /// (§4.3).
    pub fn store_state(&mut self, current: &Assembly, description: impl Into<String>) -> bool {
        if let Some((top, _)) = self.undo_stack.last() {
            if assemblies_equivalent(top, current) {
                return false;
            }
        }
        self.undo_stack.push((current.clone(), description.into()));
        self.redo_stack.clear();
        true
    }

    /// Pops the undo stack, pushing `current` onto redo, and returns the
    /// restored snapshot. `None` if nothing to undo.
    pub fn undo(&mut self, current: &Assembly, description: impl Into<String>) -> Option<Assembly> {
        let (previous, _) = self.undo_stack.pop()?;
        self.redo_stack.push((current.clone(), description.into()));
        Some(previous)
    }

    /// Symmetric to [`Self::undo`].
    pub fn redo(&mut self, current: &Assembly, description: impl Into<String>) -> Option<Assembly> {
        let (next, _) = self.redo_stack.pop()?;
        self.undo_stack.push((current.clone(), description.into()));
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgraph_core::value::ResourceId;
    use fieldgraph_graph::node::NodeKind;

    #[test]
    fn store_state_elides_no_op_snapshots() {
        let mut history = History::new();
        let assembly = Assembly::new(ResourceId::new(0));
        assert!(history.store_state(&assembly, "initial"));
        assert!(!history.store_state(&assembly, "no-op"));
        assert_eq!(history.undo_depth(), 1);
    }

    #[test]
    fn undo_redo_round_trips() {
        let mut history = History::new();
        let mut assembly = Assembly::new(ResourceId::new(0));
        history.store_state(&assembly, "empty");

        let function = assembly.add_if_missing(ResourceId::new(0), "Scene");
        function.create_node(NodeKind::Math(fieldgraph_core::ops::Op::Add));
        history.store_state(&assembly, "added add node");

        let restored = history.undo(&assembly, "undo add node").unwrap();
        assert_eq!(restored.function_count(), 0);

        let redone = history.redo(&restored, "redo add node").unwrap();
        assert_eq!(redone.function_count(), 1);
    }

    #[test]
    fn undo_on_empty_history_is_none() {
        let mut history = History::new();
        let assembly = Assembly::new(ResourceId::new(0));
        assert!(history.undo(&assembly, "nothing").is_none());
    }
}

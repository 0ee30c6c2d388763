//! Stable id types and per-function allocation (§3 invariant 7, §9).
//!
//! Ids are owned by the [`Function`](crate::function::Function) that
//! allocates them, not by a process-wide singleton — "History, id
//! counters, and rule tables live on their owning structures" (§9). Port
//! and parameter ids are drawn from disjoint numeric ranges within one
//! allocator so that, even though Rust's type system already keeps the
//! three id kinds apart, a raw integer's *kind* is still recoverable from
//! its value alone.

const PORT_ID_BASE: u64 = 1 << 32;
const PARAMETER_ID_BASE: u64 = 2 << 32;

/// A node's stable id, unique within its owning function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

/// A port's (output endpoint's) stable id, unique within its owning
/// function and disjoint from every [`ParameterId`] and [`NodeId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId(pub u64);

/// A parameter's (input endpoint's) stable id, unique within its owning
/// function and disjoint from every [`PortId`] and [`NodeId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParameterId(pub u64);

/// Per-function monotonic id allocator. Cloning a function for a history
/// snapshot clones its allocator too, so re-entering edits after an undo
/// continues from the correct counters rather than reusing retired ids.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next_node: u64,
    next_port: u64,
    next_parameter: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next_node: 0, next_port: PORT_ID_BASE, next_parameter: PARAMETER_ID_BASE }
    }

    pub fn alloc_node(&mut self) -> NodeId {
        let id = self.next_node;
        self.next_node += 1;
        NodeId(id)
    }

    pub fn alloc_port(&mut self) -> PortId {
        let id = self.next_port;
        self.next_port += 1;
        PortId(id)
    }

    pub fn alloc_parameter(&mut self) -> ParameterId {
        let id = self.next_parameter;
        self.next_parameter += 1;
        ParameterId(id)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_allocated_from_disjoint_ranges() {
        let mut alloc = IdAllocator::new();
        let node = alloc.alloc_node();
        let port = alloc.alloc_port();
        let param = alloc.alloc_parameter();
        assert!(node.0 < PORT_ID_BASE);
        assert!(port.0 >= PORT_ID_BASE && port.0 < PARAMETER_ID_BASE);
        assert!(param.0 >= PARAMETER_ID_BASE);
    }

    #[test]
    fn ids_within_a_kind_are_monotonically_increasing() {
        let mut alloc = IdAllocator::new();
        let a = alloc.alloc_node();
        let b = alloc.alloc_node();
        assert!(b.0 > a.0);
    }
}

//! Output endpoints (§3 "Port").

#[cfg(not(feature = "std"))]
use alloc::string::String;
#[cfg(feature = "std")]
use std::string::String;

use fieldgraph_core::types::ValueType;

use crate::id::{NodeId, PortId};

/// An output endpoint on a node. Created with its node, destroyed only
/// when the node is removed (§3 invariant: lifetime tied to the node).
#[derive(Debug, Clone)]
pub struct Port {
    id: PortId,
    node: NodeId,
    value_type: ValueType,
    name: String,
    /// Set by the output-use propagation pass (§4.4.3).
    used: bool,
    hidden: bool,
}

impl Port {
    pub fn new(id: PortId, node: NodeId, value_type: ValueType, name: impl Into<String>) -> Self {
        Self { id, node, value_type, name: name.into(), used: false, hidden: false }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Re-stamps this port's type after rule selection (§4.4.1). Only the
    /// inference pass calls this; a port's declared type otherwise never
    /// changes after creation.
    pub fn set_value_type(&mut self, value_type: ValueType) {
        self.value_type = value_type;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn used(&self) -> bool {
        self.used
    }

    pub fn set_used(&mut self, used: bool) {
        self.used = used;
    }

    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_port_starts_unused() {
        let port = Port::new(PortId(0), NodeId(0), ValueType::Scalar, "value");
        assert!(!port.used());
        assert_eq!(port.name(), "value");
    }
}

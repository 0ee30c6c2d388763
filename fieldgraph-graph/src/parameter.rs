//! Input endpoints (§3 "Parameter").

#[cfg(not(feature = "std"))]
use alloc::string::String;
#[cfg(feature = "std")]
use std::string::String;

use fieldgraph_core::types::ValueType;
use fieldgraph_core::value::Value;

use crate::id::{NodeId, ParameterId, PortId};

/// A parameter's binding to a port: the port id plus a cached name, used
/// by the 3MF boundary's `"node.port"` source-name form (§4.2) without a
/// registry lookup on every read.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub port: PortId,
    pub cached_name: String,
}

/// An input endpoint on a node. Exactly one of (literal value, bound
/// source) is authoritative: when `source` is set, `value` is ignored
/// (§3 invariant).
#[derive(Debug, Clone)]
pub struct Parameter {
    id: ParameterId,
    node: NodeId,
    name: String,
    value_type: ValueType,
    value: Value,
    source: Option<Source>,
    input_source_required: bool,
    modifiable: bool,
    is_argument: bool,
    /// Propagated across function calls by the linker (§4.3 "Propagate
    /// call I/O"); true when some `FunctionCall` output mirroring this
    /// `End` parameter is itself used.
    consumed_by_function: bool,
}

impl Parameter {
    pub fn new(id: ParameterId, node: NodeId, name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            id,
            node,
            name: name.into(),
            value_type,
            value: Value::default_for(value_type),
            source: None,
            input_source_required: false,
            modifiable: true,
            is_argument: false,
            consumed_by_function: false,
        }
    }

    pub fn id(&self) -> ParameterId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Re-stamps this parameter's type after rule selection (§4.4.1),
    /// also resetting its literal value to the new type's default so a
    /// stale value of the old width is never observed.
    pub fn set_value_type(&mut self, value_type: ValueType) {
        self.value_type = value_type;
        if self.source.is_none() {
            self.value = Value::default_for(value_type);
        }
    }

    /// The parameter's literal value. Meaningless while [`Self::source`]
    /// is `Some` (§3 invariant 1 of this entity).
    pub fn value(&self) -> Value {
        self.value
    }

    pub fn set_value(&mut self, value: Value) {
        debug_assert_eq!(value.value_type(), self.value_type, "literal value type must match parameter type");
        self.value = value;
    }

    pub fn source(&self) -> Option<&Source> {
        self.source.as_ref()
    }

    pub fn set_source(&mut self, source: Option<Source>) {
        self.source = source;
    }

    /// Is this parameter currently bound to a port? Equivalent to
    /// `self.source().is_some()`.
    pub fn is_bound(&self) -> bool {
        self.source.is_some()
    }

    pub fn input_source_required(&self) -> bool {
        self.input_source_required
    }

    pub fn set_input_source_required(&mut self, required: bool) {
        self.input_source_required = required;
    }

    pub fn modifiable(&self) -> bool {
        self.modifiable
    }

    pub fn set_modifiable(&mut self, modifiable: bool) {
        self.modifiable = modifiable;
    }

    pub fn is_argument(&self) -> bool {
        self.is_argument
    }

    pub fn set_is_argument(&mut self, is_argument: bool) {
        self.is_argument = is_argument;
    }

    pub fn consumed_by_function(&self) -> bool {
        self.consumed_by_function
    }

    pub fn set_consumed_by_function(&mut self, consumed: bool) {
        self.consumed_by_function = consumed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_parameter_has_default_value_and_no_source() {
        let param = Parameter::new(ParameterId(0), NodeId(0), "a", ValueType::Vec3);
        assert!(!param.is_bound());
        assert_eq!(param.value(), Value::default_for(ValueType::Vec3));
    }

    #[test]
    fn setting_source_marks_bound() {
        let mut param = Parameter::new(ParameterId(0), NodeId(0), "a", ValueType::Scalar);
        param.set_source(Some(Source { port: PortId(1), cached_name: "n.out".into() }));
        assert!(param.is_bound());
    }
}

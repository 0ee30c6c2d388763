//! Tiny op/rule helpers shared by both backends (§4.1, §4.5), so the
//! kernel and command-stream emitters can't quietly drift on what type
//! or opcode family a node produces.

#[cfg(not(feature = "std"))]
use alloc::{format, string::String};
#[cfg(feature = "std")]
use std::string::String;

use fieldgraph_core::ops::Op;
use fieldgraph_core::types::{Rule, ValueType};

/// The output type `op` produces once `rule` is resolved. Elementwise ops
/// just take the rule's own type; the fixed-shape ops (`Rule::Fixed`
/// carries no [`ValueType`] of its own) are named individually.
pub(crate) fn output_value_type(op: Op, rule: Rule) -> ValueType {
    match op {
        Op::Dot | Op::Length => ValueType::Scalar,
        Op::Cross | Op::MatrixVectorMul | Op::ComposeVector | Op::VectorFromScalar | Op::ImageSampler => {
            ValueType::Vec3
        }
        Op::SignedDistanceToMesh | Op::UnsignedDistanceToMesh | Op::BoxMinMax => ValueType::Scalar,
        Op::Transpose | Op::Inverse | Op::ComposeMatrix | Op::ComposeMatrixFromColumns | Op::ComposeMatrixFromRows => {
            ValueType::Mat4
        }
        _ => rule.value_type().unwrap_or(ValueType::Scalar),
    }
}

/// Opcode name for `op` under `rule` (§4.5.2): `ADD_SCALAR`/`ADD_VECTOR`/
/// `ADD_MATRIX` for an elementwise op, plain `DOT`/`MESH_SDF`/... for a
/// fixed-shape op (`Rule::Fixed.opcode_suffix()` is empty).
pub(crate) fn opcode_for(op: Op, rule: Rule) -> String {
    let suffix = rule.opcode_suffix();
    if suffix.is_empty() {
        String::from(op.name())
    } else {
        format!("{}_{}", op.name(), suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elementwise_opcode_carries_the_rule_suffix() {
        assert_eq!(opcode_for(Op::Add, Rule::Scalar), "ADD_SCALAR");
        assert_eq!(opcode_for(Op::Add, Rule::Vec3), "ADD_VECTOR");
        assert_eq!(opcode_for(Op::Add, Rule::Mat4), "ADD_MATRIX");
    }

    #[test]
    fn fixed_shape_opcode_has_no_suffix() {
        assert_eq!(opcode_for(Op::Dot, Rule::Fixed), "DOT");
        assert_eq!(opcode_for(Op::SignedDistanceToMesh, Rule::Fixed), "MESH_SDF");
    }

    #[test]
    fn fixed_shape_output_types_are_named_individually() {
        assert_eq!(output_value_type(Op::Dot, Rule::Fixed), ValueType::Scalar);
        assert_eq!(output_value_type(Op::Cross, Rule::Fixed), ValueType::Vec3);
        assert_eq!(output_value_type(Op::ComposeMatrix, Rule::Fixed), ValueType::Mat4);
        assert_eq!(output_value_type(Op::Add, Rule::Vec3), ValueType::Vec3);
    }
}
